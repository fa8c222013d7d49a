//! Whole-dataset lifecycle: upload, listing, export, rename, delete and the commit/discard
//! operations on a working copy. Every write holds the dataset's lock for its full duration.

use std::collections::HashSet;
use std::path::Path as FilePath;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::context::DatasweepContext;
use crate::copy_manager::RepairOutcome;
use crate::data_types::{DatasetKey, UserIdentity, Variant};
use crate::error::{DatasetError, DatasetResult};
use crate::frame::io::{read_csv, write_csv};
use crate::metadata::DatasetMetadata;
use crate::repository::interface::Error as RepositoryError;

const DEFAULT_EXTENSION: &str = "csv";

/// One row of a user's dataset listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetSummary {
    pub dataset_name: String,
    pub dataset_file_name: String,
    pub dataset_extension: String,
    pub dataset_size: u64,
    pub n_rows: usize,
    pub n_columns: usize,
    pub date_created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub has_unsaved_changes: bool,
}

fn file_extension(file_name: &str) -> String {
    FilePath::new(file_name.trim())
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

async fn original_present(context: &DatasweepContext, key: &DatasetKey) -> DatasetResult<bool> {
    Ok(context.metadata().get(&key.original_key()).await?.is_some()
        || context.datasets().exists(&key.path(Variant::Original)).await?)
}

pub async fn upload_dataset(
    context: &DatasweepContext,
    user: &UserIdentity,
    file_name: &str,
    data: &[u8],
) -> DatasetResult<DatasetMetadata> {
    let key = DatasetKey::new(user.id, file_name)?;
    let frame = read_csv(data)?;

    let _guard = context.locks.lock(&key).await;

    let owned = context
        .metadata()
        .list_for_user(user.id)
        .await?
        .iter()
        .filter(|record| !record.is_copy)
        .count();
    if owned >= context.max_datasets_per_user {
        return Err(DatasetError::invalid(format!(
            "Can't store more than {} datasets, delete one first",
            context.max_datasets_per_user
        )));
    }

    if original_present(context, &key).await? {
        return Err(DatasetError::AlreadyExists {
            name: key.name.clone(),
        });
    }

    let size = context
        .datasets()
        .write(&key.path(Variant::Original), &frame)
        .await?;
    let record =
        DatasetMetadata::new_original(&key, user, &file_extension(file_name), &frame, size);
    context.metadata().put(&key.original_key(), &record).await?;

    info!(
        dataset = %key,
        rows = record.n_rows,
        columns = record.n_columns,
        size,
        "Uploaded dataset"
    );
    Ok(record)
}

/// The user's originals, flagging the ones with a working copy
pub async fn list_datasets(
    context: &DatasweepContext,
    user: &UserIdentity,
) -> DatasetResult<Vec<DatasetSummary>> {
    let records = context.metadata().list_for_user(user.id).await?;
    let with_copies: HashSet<&str> = records
        .iter()
        .filter(|record| record.is_copy)
        .map(|record| record.dataset_name.as_str())
        .collect();

    Ok(records
        .iter()
        .filter(|record| !record.is_copy)
        .map(|record| DatasetSummary {
            dataset_name: record.dataset_name.clone(),
            dataset_file_name: record.dataset_file_name.clone(),
            dataset_extension: record.dataset_extension.clone(),
            dataset_size: record.dataset_size,
            n_rows: record.n_rows,
            n_columns: record.n_columns,
            date_created: record.date_created,
            last_modified: record.last_modified,
            has_unsaved_changes: with_copies.contains(record.dataset_name.as_str()),
        })
        .collect())
}

pub async fn get_metadata(
    context: &DatasweepContext,
    user: &UserIdentity,
    dataset_name: &str,
) -> DatasetResult<DatasetMetadata> {
    let key = DatasetKey::new(user.id, dataset_name)?;
    let (_, record) = context.copies.active_metadata(&key).await?;
    Ok(record)
}

/// CSV rendering of the active variant
pub async fn export_dataset(
    context: &DatasweepContext,
    user: &UserIdentity,
    dataset_name: &str,
) -> DatasetResult<Vec<u8>> {
    let key = DatasetKey::new(user.id, dataset_name)?;
    let active = context.copies.load_active(&key).await?;
    write_csv(&active.frame)
}

fn already_exists(key: &DatasetKey) -> impl Fn(RepositoryError) -> DatasetError + '_ {
    move |err| match err {
        RepositoryError::UniqueConstraintViolation(_) => DatasetError::AlreadyExists {
            name: key.name.clone(),
        },
        err => err.into(),
    }
}

/// Move a dataset (and its working copy, if any) to a new logical name
pub async fn rename_dataset(
    context: &DatasweepContext,
    user: &UserIdentity,
    dataset_name: &str,
    new_name: &str,
) -> DatasetResult<DatasetMetadata> {
    let key = DatasetKey::new(user.id, dataset_name)?;
    let new_key = DatasetKey::new(user.id, new_name)?;
    if key == new_key {
        return Err(DatasetError::invalid(format!(
            "Dataset is already called {:?}",
            key.name
        )));
    }

    let (_guard, _new_guard) = context.locks.lock_pair(&key, &new_key).await;

    let mut original = context.copies.original_metadata(&key).await?;
    let has_copy = context.copies.copy_exists(&key).await?;
    if original_present(context, &new_key).await? {
        return Err(DatasetError::AlreadyExists {
            name: new_key.name.clone(),
        });
    }

    original.rekey(&new_key, Variant::Original);
    context
        .metadata()
        .rename(&key.original_key(), &new_key.original_key(), &original)
        .await
        .map_err(already_exists(&new_key))?;
    context
        .datasets()
        .rename(&key.path(Variant::Original), &new_key.path(Variant::Original))
        .await?;

    if has_copy {
        let mut copy = context
            .metadata()
            .get(&key.copy_key())
            .await?
            .ok_or_else(|| DatasetError::CopyNotFound {
                name: key.copy_key(),
            })?;
        copy.rekey(&new_key, Variant::Copy);
        context
            .metadata()
            .rename(&key.copy_key(), &new_key.copy_key(), &copy)
            .await
            .map_err(already_exists(&new_key))?;
        context
            .datasets()
            .rename(&key.path(Variant::Copy), &new_key.path(Variant::Copy))
            .await?;
    }

    info!(dataset = %key, new_name = %new_key, has_copy, "Renamed dataset");
    Ok(original)
}

/// Remove the original and any trace of a working copy
pub async fn delete_dataset(
    context: &DatasweepContext,
    user: &UserIdentity,
    dataset_name: &str,
) -> DatasetResult<()> {
    let key = DatasetKey::new(user.id, dataset_name)?;
    let _guard = context.locks.lock(&key).await;

    context.copies.original_metadata(&key).await?;

    // Copy halves go first and individually, so a conflicted copy can still be deleted
    context.datasets().delete(&key.path(Variant::Copy)).await?;
    context.metadata().delete(&key.copy_key()).await?;
    context
        .datasets()
        .delete(&key.path(Variant::Original))
        .await?;
    context.metadata().delete(&key.original_key()).await?;

    info!(dataset = %key, "Deleted dataset");
    Ok(())
}

pub async fn save_changes(
    context: &DatasweepContext,
    user: &UserIdentity,
    dataset_name: &str,
) -> DatasetResult<DatasetMetadata> {
    let key = DatasetKey::new(user.id, dataset_name)?;
    let _guard = context.locks.lock(&key).await;
    context.copies.save_copy_as_original(&key).await
}

pub async fn revert_changes(
    context: &DatasweepContext,
    user: &UserIdentity,
    dataset_name: &str,
) -> DatasetResult<()> {
    let key = DatasetKey::new(user.id, dataset_name)?;
    let _guard = context.locks.lock(&key).await;
    context.copies.revert_copy(&key).await
}

pub async fn repair_copy(
    context: &DatasweepContext,
    user: &UserIdentity,
    dataset_name: &str,
) -> DatasetResult<RepairOutcome> {
    let key = DatasetKey::new(user.id, dataset_name)?;
    let _guard = context.locks.lock(&key).await;
    context.copies.repair_copy(&key).await
}
