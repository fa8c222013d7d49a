//! Read-only views of a dataset. Every function here reads whatever variant is active: the
//! working copy when there is one, otherwise the original. None of them take the dataset lock
//! or write anything.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use tracing::debug;

use crate::context::DatasweepContext;
use crate::copy_manager::ActiveDataset;
use crate::data_types::{DatasetKey, UserIdentity, Variant};
use crate::error::{DatasetError, DatasetResult};
use crate::frame::stats::{
    mean, mode, pearson, quantile, round_to, sorted, std_dev, value_counts,
};
use crate::frame::values::{to_f64_values, to_string_values};
use crate::frame::{type_name, ColumnClass, Frame};
use crate::operations::require_class;

pub mod tabular;

pub use tabular::{tabular_representation, TableView, TabularQuery, TabularRepresentation};

// Distinct values listed per categorical column in `columns_info`
const MAX_DISTINCT_VALUES: usize = 100;
const PREVIEW_ROWS: usize = 5;

async fn load(
    context: &DatasweepContext,
    user: &UserIdentity,
    dataset_name: &str,
) -> DatasetResult<ActiveDataset> {
    let key = DatasetKey::new(user.id, dataset_name)?;
    let active = context.copies.load_active(&key).await?;
    debug!(dataset = %key, variant = ?active.variant, "Reading dataset");
    Ok(active)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnsInfo {
    pub is_copy: bool,
    pub n_rows: usize,
    pub n_columns: usize,
    pub column_list: Vec<String>,
    pub numerical_column_list: Vec<String>,
    pub categorical_column_list: Vec<String>,
    pub column_datatypes: BTreeMap<String, String>,
    pub column_deleted_status: BTreeMap<String, bool>,
    /// Up to a hundred distinct values of every categorical column, in order of appearance
    pub categorical_values: BTreeMap<String, Vec<String>>,
}

pub async fn columns_info(
    context: &DatasweepContext,
    user: &UserIdentity,
    dataset_name: &str,
) -> DatasetResult<ColumnsInfo> {
    let ActiveDataset {
        variant,
        frame,
        metadata,
    } = load(context, user, dataset_name).await?;

    let mut categorical_values = BTreeMap::new();
    for column in &metadata.categorical_column_list {
        let distinct = value_counts(&to_string_values(frame.column(column)?)?)
            .into_iter()
            .map(|(value, _)| value)
            .take(MAX_DISTINCT_VALUES)
            .collect();
        categorical_values.insert(column.clone(), distinct);
    }

    Ok(ColumnsInfo {
        is_copy: variant == Variant::Copy,
        n_rows: metadata.n_rows,
        n_columns: metadata.n_columns,
        column_list: metadata.column_list,
        numerical_column_list: metadata.numerical_column_list,
        categorical_column_list: metadata.categorical_column_list,
        column_datatypes: metadata.column_datatypes,
        column_deleted_status: metadata.column_deleted_status,
        categorical_values,
    })
}

pub async fn categorical_columns(
    context: &DatasweepContext,
    user: &UserIdentity,
    dataset_name: &str,
) -> DatasetResult<Vec<String>> {
    let key = DatasetKey::new(user.id, dataset_name)?;
    let (_, metadata) = context.copies.active_metadata(&key).await?;
    Ok(metadata.categorical_column_list)
}

pub async fn numerical_columns(
    context: &DatasweepContext,
    user: &UserIdentity,
    dataset_name: &str,
) -> DatasetResult<Vec<String>> {
    let key = DatasetKey::new(user.id, dataset_name)?;
    let (_, metadata) = context.copies.active_metadata(&key).await?;
    Ok(metadata.numerical_column_list)
}

/// Distinct values of a categorical column starting with `query`, ignoring case
pub async fn search_categorical_value(
    context: &DatasweepContext,
    user: &UserIdentity,
    dataset_name: &str,
    column: &str,
    query: &str,
) -> DatasetResult<Vec<String>> {
    let ActiveDataset {
        frame, metadata, ..
    } = load(context, user, dataset_name).await?;
    require_class(&metadata, &[column.to_string()], ColumnClass::Categorical)?;

    let query = query.to_lowercase();
    Ok(value_counts(&to_string_values(frame.column(column)?)?)
        .into_iter()
        .map(|(value, _)| value)
        .filter(|value| value.to_lowercase().starts_with(&query))
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BasicInformation {
    pub n_rows: usize,
    pub n_columns: usize,
    pub n_values: usize,
    /// Column name and type, in column order
    pub dtypes: Vec<(String, String)>,
    pub head: TableView,
}

pub async fn basic_information(
    context: &DatasweepContext,
    user: &UserIdentity,
    dataset_name: &str,
) -> DatasetResult<BasicInformation> {
    let ActiveDataset { frame, .. } = load(context, user, dataset_name).await?;
    let preview = PREVIEW_ROWS.min(frame.num_rows());

    Ok(BasicInformation {
        n_rows: frame.num_rows(),
        n_columns: frame.num_columns(),
        n_values: frame.num_values(),
        dtypes: frame
            .fields()
            .into_iter()
            .map(|(name, data_type)| (name, type_name(&data_type)))
            .collect(),
        head: TableView::from_frame(&frame.slice(0, preview), (0..preview).collect())?,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericalSummary {
    pub column: String,
    pub count: usize,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub min: Option<f64>,
    #[serde(rename = "25%")]
    pub q25: Option<f64>,
    #[serde(rename = "50%")]
    pub q50: Option<f64>,
    #[serde(rename = "75%")]
    pub q75: Option<f64>,
    pub max: Option<f64>,
}

fn describe_numerical_column(frame: &Frame, column: &str) -> DatasetResult<NumericalSummary> {
    let values = sorted(&to_f64_values(frame.column(column)?)?);
    Ok(NumericalSummary {
        column: column.to_string(),
        count: values.len(),
        mean: mean(&values),
        std: std_dev(&values, 1),
        min: values.first().copied(),
        q25: quantile(&values, 0.25),
        q50: quantile(&values, 0.5),
        q75: quantile(&values, 0.75),
        max: values.last().copied(),
    })
}

/// Count, mean, sample standard deviation and quartiles of every numerical column
pub async fn describe_numerical(
    context: &DatasweepContext,
    user: &UserIdentity,
    dataset_name: &str,
) -> DatasetResult<Vec<NumericalSummary>> {
    let ActiveDataset {
        frame, metadata, ..
    } = load(context, user, dataset_name).await?;
    metadata
        .numerical_column_list
        .iter()
        .map(|column| describe_numerical_column(&frame, column))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoricalSummary {
    pub column: String,
    pub count: usize,
    pub unique: usize,
    pub top: Option<String>,
    pub freq: usize,
}

pub async fn describe_categorical(
    context: &DatasweepContext,
    user: &UserIdentity,
    dataset_name: &str,
) -> DatasetResult<Vec<CategoricalSummary>> {
    let ActiveDataset {
        frame, metadata, ..
    } = load(context, user, dataset_name).await?;

    metadata
        .categorical_column_list
        .iter()
        .map(|column| {
            let values = to_string_values(frame.column(column)?)?;
            let counts = value_counts(&values);
            let top = mode(&values);
            let freq = counts
                .iter()
                .find(|(value, _)| Some(value) == top.as_ref())
                .map_or(0, |(_, count)| *count);
            Ok(CategoricalSummary {
                column: column.clone(),
                count: counts.iter().map(|(_, count)| count).sum(),
                unique: counts.len(),
                top,
                freq,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnMissing {
    pub column: String,
    pub missing: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingValues {
    pub columns: Vec<ColumnMissing>,
    pub total_missing: usize,
    pub total_percentage: f64,
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round_to(part as f64 * 100.0 / whole as f64, 2)
    }
}

pub async fn missing_values(
    context: &DatasweepContext,
    user: &UserIdentity,
    dataset_name: &str,
) -> DatasetResult<MissingValues> {
    let ActiveDataset { frame, .. } = load(context, user, dataset_name).await?;

    let columns = frame
        .column_names()
        .into_iter()
        .map(|column| {
            let missing = frame.null_count(&column)?;
            Ok(ColumnMissing {
                percentage: percentage(missing, frame.num_rows()),
                column,
                missing,
            })
        })
        .collect::<DatasetResult<Vec<_>>>()?;
    let total_missing = columns.iter().map(|c| c.missing).sum();

    Ok(MissingValues {
        total_percentage: percentage(total_missing, frame.num_values()),
        total_missing,
        columns,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationMatrix {
    pub columns: Vec<String>,
    /// `matrix[i][j]` correlates `columns[i]` with `columns[j]`. Missing where a column is
    /// constant or fewer than two rows are complete.
    pub matrix: Vec<Vec<Option<f64>>>,
}

/// Pairwise-complete Pearson correlation between numerical columns, all of them by default
pub async fn correlation_matrix(
    context: &DatasweepContext,
    user: &UserIdentity,
    dataset_name: &str,
    column_list: Option<Vec<String>>,
) -> DatasetResult<CorrelationMatrix> {
    let ActiveDataset {
        frame, metadata, ..
    } = load(context, user, dataset_name).await?;

    let columns = match column_list {
        Some(columns) => {
            require_class(&metadata, &columns, ColumnClass::Numerical)?;
            let mut seen = HashSet::new();
            columns
                .into_iter()
                .filter(|c| seen.insert(c.clone()))
                .collect()
        }
        None => metadata.numerical_column_list.clone(),
    };
    if columns.is_empty() {
        return Err(DatasetError::invalid(format!(
            "Dataset {dataset_name:?} has no numerical columns to correlate"
        )));
    }

    let values = columns
        .iter()
        .map(|column| to_f64_values(frame.column(column)?))
        .collect::<DatasetResult<Vec<_>>>()?;
    let matrix = values
        .iter()
        .map(|x| {
            values
                .iter()
                .map(|y| pearson(x, y).map(|r| round_to(r, 2)))
                .collect()
        })
        .collect();

    Ok(CorrelationMatrix { columns, matrix })
}
