use std::collections::BTreeSet;

use rstest::rstest;
use serde_json::{json, Value};

use datasweep::analytics::columns_info;
use datasweep::context::DatasweepContext;
use datasweep::copy_manager::RepairOutcome;
use datasweep::data_types::{DatasetKey, Variant};
use datasweep::datasets::{list_datasets, repair_copy, revert_changes, save_changes};
use datasweep::error::DatasetError;
use datasweep::metadata::DatasetMetadata;
use datasweep::operations::{parse_mutation, run_mutation, MutationReport};

use crate::{ada, test_context, upload_iris};

const IRIS: &str = "iris";

async fn mutate(
    context: &DatasweepContext,
    operation: &str,
    payload: Value,
) -> Result<MutationReport, DatasetError> {
    let mutation = parse_mutation(operation, payload)?.unwrap();
    run_mutation(context, &ada(), IRIS, mutation.as_ref()).await
}

fn iris_key() -> DatasetKey {
    DatasetKey::new(ada().id, IRIS).unwrap()
}

async fn copy_record(context: &DatasweepContext) -> DatasetMetadata {
    context
        .metadata()
        .get(&iris_key().copy_key())
        .await
        .unwrap()
        .unwrap()
}

async fn original_record(context: &DatasweepContext) -> DatasetMetadata {
    context.copies.original_metadata(&iris_key()).await.unwrap()
}

/// Check the copy's record against its stored file
async fn assert_copy_in_sync(context: &DatasweepContext) {
    let key = iris_key();
    let record = copy_record(context).await;
    let frame = context.datasets().read(&key.path(Variant::Copy)).await.unwrap();

    assert_eq!(record.column_list, frame.column_names());
    assert_eq!(record.n_rows, frame.num_rows());
    assert_eq!(record.n_columns, frame.num_columns());
    assert_eq!(record.n_values, record.n_rows * record.n_columns);

    let numerical: BTreeSet<_> = record.numerical_column_list.iter().collect();
    let categorical: BTreeSet<_> = record.categorical_column_list.iter().collect();
    assert!(numerical.is_disjoint(&categorical));
    assert_eq!(
        numerical.union(&categorical).cloned().collect::<BTreeSet<_>>(),
        record.column_list.iter().collect::<BTreeSet<_>>()
    );
    assert_eq!(
        record.column_datatypes.keys().collect::<BTreeSet<_>>(),
        record.column_list.iter().collect::<BTreeSet<_>>()
    );
}

#[tokio::test]
async fn test_metadata_tracks_every_mutation() {
    let context = test_context().await;
    let original = upload_iris(&context).await;

    let steps = vec![
        ("drop-rows-by-index", json!({"row_start": 0, "row_end": 4})),
        (
            "rename-columns",
            json!({"col_name_change_info": {"petal_width": "pw"}}),
        ),
        (
            "transform",
            json!({"method": "standardization", "column_list": ["sepal_length"]}),
        ),
        (
            "drop-rows-by-numerical-range",
            json!({"col_range_info": {"pw": [0.0, 0.3]}}),
        ),
        (
            "discretize",
            json!({
                "column_name": "sepal_width",
                "strategy": "uniform",
                "n_bins": 3,
                "encoding": "onehot",
                "prefix": "sw_"
            }),
        ),
        ("frequency-encode", json!({"column_list": ["species"]})),
        ("drop-columns", json!({"col_list": ["petal_length"]})),
    ];

    for (operation, payload) in steps {
        mutate(&context, operation, payload).await.unwrap();
        assert_copy_in_sync(&context).await;

        let record = copy_record(&context).await;
        assert!(record.is_copy_modified);
        // Deletion history only ever covers the original's columns
        assert_eq!(
            record.column_deleted_status.keys().collect::<BTreeSet<_>>(),
            original.column_list.iter().collect::<BTreeSet<_>>()
        );
    }

    assert_eq!(original_record(&context).await, original);
}

#[tokio::test]
async fn test_half_present_copy_is_a_conflict() {
    let context = test_context().await;
    upload_iris(&context).await;
    let key = iris_key();

    mutate(&context, "drop-columns", json!({"col_list": ["species"]}))
        .await
        .unwrap();
    context.datasets().delete(&key.path(Variant::Copy)).await.unwrap();

    assert!(matches!(
        context.copies.copy_exists(&key).await,
        Err(DatasetError::Conflict {
            file_present: false,
            metadata_present: true,
            ..
        })
    ));
    assert!(matches!(
        context.copies.ensure_copy(&key).await,
        Err(DatasetError::Conflict { .. })
    ));
    assert!(matches!(
        mutate(&context, "drop-columns", json!({"col_list": ["pw"]})).await,
        Err(DatasetError::Conflict { .. })
    ));

    // Reads fall back to the committed original
    let info = columns_info(&context, &ada(), IRIS).await.unwrap();
    assert!(!info.is_copy);
    assert!(info.column_list.contains(&"species".to_string()));

    assert_eq!(
        repair_copy(&context, &ada(), IRIS).await.unwrap(),
        RepairOutcome::RemovedOrphanMetadata
    );
    assert!(!context.copies.copy_exists(&key).await.unwrap());
    assert!(matches!(
        repair_copy(&context, &ada(), IRIS).await,
        Err(DatasetError::NoChanges { .. })
    ));
}

#[tokio::test]
async fn test_ensure_copy_is_idempotent() {
    let context = test_context().await;
    upload_iris(&context).await;
    let key = iris_key();

    assert!(context.copies.ensure_copy(&key).await.unwrap());
    let first = copy_record(&context).await;
    assert!(!context.copies.ensure_copy(&key).await.unwrap());

    assert_eq!(copy_record(&context).await, first);
    assert!(!first.is_copy_modified);
    let records = context.metadata().list_for_user(ada().id).await.unwrap();
    assert_eq!(records.iter().filter(|r| r.is_copy).count(), 1);
}

#[tokio::test]
async fn test_reads_observe_the_copy() {
    let context = test_context().await;
    upload_iris(&context).await;

    mutate(&context, "drop-columns", json!({"col_list": ["sepal_width"]}))
        .await
        .unwrap();

    let info = columns_info(&context, &ada(), IRIS).await.unwrap();
    assert!(info.is_copy);
    assert!(!info.column_list.contains(&"sepal_width".to_string()));
    assert_eq!(info.column_deleted_status.get("sepal_width"), Some(&true));

    let listed = list_datasets(&context, &ada()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].has_unsaved_changes);
    assert_eq!(listed[0].n_columns, 5);
}

#[tokio::test]
async fn test_save_replaces_the_original() {
    let context = test_context().await;
    upload_iris(&context).await;
    let key = iris_key();

    mutate(&context, "drop-rows-by-index", json!({"row_start": 0, "row_end": 9}))
        .await
        .unwrap();
    mutate(&context, "drop-columns", json!({"col_list": ["species"]}))
        .await
        .unwrap();
    let before = copy_record(&context).await;

    let saved = save_changes(&context, &ada(), IRIS).await.unwrap();
    assert_eq!(
        saved,
        DatasetMetadata {
            dataset_file_name: key.original_key(),
            is_copy: false,
            is_copy_modified: false,
            column_deleted_status: Default::default(),
            ..before
        }
    );
    assert_eq!(original_record(&context).await, saved);

    assert!(!context.copies.copy_exists(&key).await.unwrap());
    assert!(context.metadata().get(&key.copy_key()).await.unwrap().is_none());
    let frame = context
        .datasets()
        .read(&key.path(Variant::Original))
        .await
        .unwrap();
    assert_eq!(frame.num_rows(), 140);
    assert_eq!(frame.column_names(), saved.column_list);
}

#[tokio::test]
async fn test_revert_restores_the_original() {
    let context = test_context().await;
    let uploaded = upload_iris(&context).await;
    let key = iris_key();
    let stored_before = context
        .datasets()
        .read(&key.path(Variant::Original))
        .await
        .unwrap();

    mutate(&context, "one-hot-encode", json!({"column_list": ["species"]}))
        .await
        .unwrap();
    mutate(
        &context,
        "impute",
        json!({"strategy": "constant", "value": 0.0, "column_list": ["sepal_length"]}),
    )
    .await
    .unwrap();
    revert_changes(&context, &ada(), IRIS).await.unwrap();

    assert_eq!(original_record(&context).await, uploaded);
    let stored_after = context
        .datasets()
        .read(&key.path(Variant::Original))
        .await
        .unwrap();
    assert_eq!(stored_after.batch(), stored_before.batch());
    assert!(!context.copies.copy_exists(&key).await.unwrap());
}

#[tokio::test]
async fn test_drop_rows_leaves_the_original_alone() {
    let context = test_context().await;
    upload_iris(&context).await;
    let key = iris_key();

    assert!(context.copies.ensure_copy(&key).await.unwrap());
    let report = mutate(&context, "drop-rows-by-index", json!({"row_start": 0, "row_end": 9}))
        .await
        .unwrap();
    assert!(!report.copy_created);

    assert_eq!(copy_record(&context).await.n_rows, 140);
    assert_eq!(original_record(&context).await.n_rows, 150);
}

#[tokio::test]
async fn test_rename_column_updates_every_list() {
    let context = test_context().await;
    upload_iris(&context).await;

    mutate(
        &context,
        "rename-columns",
        json!({"col_name_change_info": {"sepal_length": "sl"}}),
    )
    .await
    .unwrap();

    let record = copy_record(&context).await;
    let sl = "sl".to_string();
    let old = "sepal_length".to_string();
    assert_eq!(record.column_list[0], sl);
    assert!(record.numerical_column_list.contains(&sl));
    assert!(record.column_datatypes.contains_key(&sl));
    assert!(!record.column_list.contains(&old));
    assert!(!record.numerical_column_list.contains(&old));
    assert!(!record.column_datatypes.contains_key(&old));
}

#[tokio::test]
async fn test_dropped_column_keeps_its_history() {
    let context = test_context().await;
    upload_iris(&context).await;

    mutate(&context, "drop-columns", json!({"col_list": ["species"]}))
        .await
        .unwrap();

    let record = copy_record(&context).await;
    let species = "species".to_string();
    assert_eq!(record.column_deleted_status.get(&species), Some(&true));
    assert!(!record.column_list.contains(&species));
    assert!(!record.categorical_column_list.contains(&species));
    assert_eq!(record.column_deleted_status.get("sepal_length"), Some(&false));
}

#[tokio::test]
async fn test_one_hot_marks_the_source_deleted() {
    let context = test_context().await;
    upload_iris(&context).await;

    mutate(
        &context,
        "one-hot-encode",
        json!({"column_list": ["species"], "prefix": "sp_"}),
    )
    .await
    .unwrap();

    let record = copy_record(&context).await;
    assert_eq!(record.column_deleted_status.get("species"), Some(&true));
    for column in ["sp_0", "sp_1", "sp_2"] {
        let column = column.to_string();
        assert!(record.column_list.contains(&column));
        assert!(record.numerical_column_list.contains(&column));
    }
    assert!(record.categorical_column_list.is_empty());
    assert_eq!(record.n_columns, 7);
}

#[rstest]
#[case::save("save")]
#[case::revert("revert")]
#[tokio::test]
async fn test_no_copy_means_no_changes(#[case] action: &str) {
    let context = test_context().await;
    let uploaded = upload_iris(&context).await;

    let result = match action {
        "save" => save_changes(&context, &ada(), IRIS).await.map(|_| ()),
        _ => revert_changes(&context, &ada(), IRIS).await,
    };
    assert!(matches!(result, Err(DatasetError::NoChanges { .. })));

    assert_eq!(original_record(&context).await, uploaded);
    assert!(!context.copies.copy_exists(&iris_key()).await.unwrap());
}

#[tokio::test]
async fn test_invalid_mutation_leaves_no_copy() {
    let context = test_context().await;
    upload_iris(&context).await;

    assert!(matches!(
        mutate(&context, "drop-columns", json!({"col_list": ["nope"]})).await,
        Err(DatasetError::InvalidInput { .. })
    ));
    assert!(matches!(
        mutate(&context, "drop-columns", json!({"columns": ["species"]})).await,
        Err(DatasetError::InvalidInput { .. })
    ));
    assert!(!context.copies.copy_exists(&iris_key()).await.unwrap());
}

#[tokio::test]
async fn test_users_are_isolated() {
    let context = test_context().await;
    upload_iris(&context).await;
    let bob = datasweep::data_types::UserIdentity::new(2, "bob@example.com");

    assert!(matches!(
        columns_info(&context, &bob, IRIS).await,
        Err(DatasetError::DatasetNotFound { .. })
    ));
    assert!(list_datasets(&context, &bob).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_mutations_are_serialised() {
    const WRITERS: usize = 16;

    let context = test_context().await;
    let original = upload_iris(&context).await;

    // Every writer drops whatever row comes first, so each one must see the previous result
    let writers: Vec<_> = (0..WRITERS)
        .map(|_| {
            let context = context.clone();
            tokio::spawn(async move {
                mutate(
                    &context,
                    "drop-rows-by-index",
                    json!({"row_start": 0, "row_end": 0}),
                )
                .await
            })
        })
        .collect();
    for writer in writers {
        writer.await.unwrap().unwrap();
    }

    let frame = context
        .datasets()
        .read(&iris_key().path(Variant::Copy))
        .await
        .unwrap();
    assert_eq!(frame.num_rows(), original.n_rows - WRITERS);
    assert_eq!(copy_record(&context).await.n_rows, original.n_rows - WRITERS);
    assert_copy_in_sync(&context).await;
    assert_eq!(original_record(&context).await, original);
    assert!(context.locks.is_empty());
}
