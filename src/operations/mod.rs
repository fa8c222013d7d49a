//! Mutations of a dataset's working copy.
//!
//! Every cleaning, transformation, discretization and encoding operation is a [`Mutation`]: a
//! payload that knows which columns it touches, how to validate itself against the current
//! metadata and how to turn one frame into another. [`run_mutation`] is the only code that
//! creates, loads, persists and re-synchronises the copy on their behalf.

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::context::DatasweepContext;
use crate::data_types::{DatasetKey, UserIdentity};
use crate::error::{DatasetError, DatasetResult};
use crate::frame::{ColumnClass, Frame};
use crate::metadata::DatasetMetadata;

pub mod cleaning;
pub mod discretization;
pub mod encoding;
pub mod imputation;
pub mod transformation;

/// What a mutation did to the frame's shape, and so which metadata bookkeeping it needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeImpact {
    /// Same columns, types and row count
    ValuesOnly,
    RowsChanged,
    ColumnsRetyped,
    /// `(old, new)` pairs
    ColumnsRenamed(Vec<(String, String)>),
    /// Columns dropped or replaced by new ones
    ColumnsRemoved(Vec<String>),
}

#[derive(Debug)]
pub struct Transformed {
    pub frame: Frame,
    pub impact: ShapeImpact,
    /// Operation-specific summary returned to the caller
    pub details: Option<Value>,
}

impl Transformed {
    pub fn new(frame: Frame, impact: ShapeImpact) -> Self {
        Self {
            frame,
            impact,
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

pub trait Mutation: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Columns of the current dataset the payload refers to
    fn referenced_columns(&self) -> Vec<String>;

    /// Check the payload against the current metadata before anything is written
    fn validate(&self, metadata: &DatasetMetadata) -> DatasetResult<()> {
        require_columns(metadata, &self.referenced_columns())
    }

    /// Compute the new frame. Must not have side effects.
    fn apply(&self, frame: Frame, metadata: &DatasetMetadata) -> DatasetResult<Transformed>;
}

pub fn require_columns(metadata: &DatasetMetadata, columns: &[String]) -> DatasetResult<()> {
    match columns.iter().find(|c| !metadata.has_column(c)) {
        Some(missing) => Err(DatasetError::invalid(format!(
            "Column {missing:?} doesn't exist in dataset {:?}",
            metadata.dataset_name
        ))),
        None => Ok(()),
    }
}

pub fn require_class(
    metadata: &DatasetMetadata,
    columns: &[String],
    class: ColumnClass,
) -> DatasetResult<()> {
    require_columns(metadata, columns)?;
    match columns
        .iter()
        .find(|c| metadata.class_of(c) != Some(class))
    {
        Some(column) => Err(DatasetError::invalid(format!(
            "Column {column:?} isn't {class}"
        ))),
        None => Ok(()),
    }
}

pub fn require_non_empty<T>(items: &[T], what: &str) -> DatasetResult<()> {
    if items.is_empty() {
        return Err(DatasetError::invalid(format!("{what} can't be empty")));
    }
    Ok(())
}

fn boxed<M>(payload: Value) -> DatasetResult<Box<dyn Mutation>>
where
    M: Mutation + DeserializeOwned + 'static,
{
    let mutation: M = serde_json::from_value(payload)
        .map_err(|e| DatasetError::invalid(format!("Invalid payload: {e}")))?;
    Ok(Box::new(mutation))
}

/// Build the mutation an operation name refers to from its JSON payload. Names are
/// snake_case; kebab-case is accepted too. `None` if no mutation has that name.
pub fn parse_mutation(
    operation: &str,
    payload: Value,
) -> DatasetResult<Option<Box<dyn Mutation>>> {
    let mutation = match operation.replace('-', "_").as_str() {
        "drop_rows_by_index" => boxed::<cleaning::DropRowsByIndex>(payload)?,
        "drop_rows_by_value" => boxed::<cleaning::DropRowsByValue>(payload)?,
        "drop_rows_by_numerical_range" => {
            boxed::<cleaning::DropRowsByNumericalRange>(payload)?
        }
        "drop_columns" => boxed::<cleaning::DropColumns>(payload)?,
        "rename_columns" => boxed::<cleaning::RenameColumns>(payload)?,
        "find_and_replace" => boxed::<cleaning::FindAndReplace>(payload)?,
        "change_data_type" => boxed::<cleaning::ChangeDataType>(payload)?,
        "change_column_class" => boxed::<cleaning::ChangeColumnClass>(payload)?,
        "impute" => boxed::<imputation::Impute>(payload)?,
        "transform" => boxed::<transformation::Transform>(payload)?,
        "discretize" => boxed::<discretization::Discretize>(payload)?,
        "one_hot_encode" => boxed::<encoding::OneHotEncode>(payload)?,
        "ordinal_encode" => boxed::<encoding::OrdinalEncode>(payload)?,
        "frequency_encode" => boxed::<encoding::FrequencyEncode>(payload)?,
        "binary_encode" => boxed::<encoding::BinaryEncode>(payload)?,
        "target_encode" => boxed::<encoding::TargetEncode>(payload)?,
        _ => return Ok(None),
    };
    Ok(Some(mutation))
}

/// Outcome of a mutation, as reported to the caller
#[derive(Debug, Clone, Serialize)]
pub struct MutationReport {
    pub operation: &'static str,
    pub dataset_name: String,
    pub copy_created: bool,
    pub n_rows: usize,
    pub n_columns: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

fn apply_bookkeeping(metadata: &mut DatasetMetadata, frame: &Frame, impact: &ShapeImpact) {
    match impact {
        ShapeImpact::ValuesOnly => {
            if let Some(drift) = metadata.drift_from(frame) {
                warn!(drift = %drift, "Values-only mutation changed the schema");
                metadata.sync_shape_and_schema(frame);
            }
            return;
        }
        ShapeImpact::ColumnsRenamed(pairs) => {
            for (old_name, new_name) in pairs {
                metadata.rename_column(old_name, new_name);
            }
        }
        ShapeImpact::ColumnsRemoved(columns) => {
            for column in columns {
                metadata.mark_column_deleted(column);
            }
        }
        ShapeImpact::RowsChanged | ShapeImpact::ColumnsRetyped => {}
    }
    metadata.sync_shape_and_schema(frame);
}

/// Run one mutation against the dataset's working copy, creating the copy if needed.
///
/// Holds the dataset lock throughout. Payload validation happens before the copy is created,
/// so an invalid request leaves no trace; a failing transform leaves the copy as it was.
pub async fn run_mutation(
    context: &DatasweepContext,
    user: &UserIdentity,
    dataset_name: &str,
    mutation: &dyn Mutation,
) -> DatasetResult<MutationReport> {
    let key = DatasetKey::new(user.id, dataset_name)?;
    let _guard = context.locks.lock(&key).await;
    let copies = &context.copies;

    let current = copies.current_metadata(&key).await?;
    mutation.validate(&current)?;

    let copy_created = copies.ensure_copy(&key).await?;
    let (frame, mut handle) = copies.load_copy(&key).await?;
    // The loaded record may have been resynchronised with the file
    if handle.record != current {
        mutation.validate(&handle.record)?;
    }

    let Transformed {
        frame,
        impact,
        details,
    } = mutation.apply(frame, &handle.record)?;
    debug!(operation = mutation.name(), dataset = %key, ?impact, "Applied mutation");

    apply_bookkeeping(&mut handle.record, &frame, &impact);
    handle.record.dataset_size = copies.persist_copy(&frame, &key).await?;
    let saved = copies.save_metadata(handle).await?;

    info!(
        operation = mutation.name(),
        dataset = %key,
        rows = saved.n_rows,
        columns = saved.n_columns,
        copy_created,
        "Mutated working copy"
    );
    Ok(MutationReport {
        operation: mutation.name(),
        dataset_name: key.name,
        copy_created,
        n_rows: saved.n_rows,
        n_columns: saved.n_columns,
        details,
    })
}
