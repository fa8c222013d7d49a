//! Categorical encoders. One-hot and binary encoding replace a column with several numerical
//! ones; the others replace its values in place.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array};
use serde::Deserialize;
use serde_json::json;

use crate::error::{DatasetError, DatasetResult};
use crate::frame::stats::{mean, present, value_counts};
use crate::frame::values::{to_f64_values, to_string_values};
use crate::frame::{ColumnClass, Frame};
use crate::metadata::DatasetMetadata;

use super::{
    require_class, require_columns, require_non_empty, Mutation, ShapeImpact, Transformed,
};

fn int_column(values: impl IntoIterator<Item = i64>) -> ArrayRef {
    Arc::new(Int64Array::from_iter_values(values))
}

/// Distinct values in order of first appearance
fn categories(values: &[Option<String>]) -> Vec<String> {
    value_counts(values)
        .into_iter()
        .map(|(value, _)| value)
        .collect()
}

/// One indicator column per category. Missing cells are zero in every indicator.
#[derive(Debug, Clone, Deserialize)]
pub struct OneHotEncode {
    pub column_list: Vec<String>,
    /// Defaults to `{column}_`
    #[serde(default)]
    pub prefix: Option<String>,
    /// Suffix columns with the category itself rather than its position
    #[serde(default)]
    pub use_cat_name: bool,
}

impl Mutation for OneHotEncode {
    fn name(&self) -> &'static str {
        "one_hot_encode"
    }

    fn referenced_columns(&self) -> Vec<String> {
        self.column_list.clone()
    }

    fn validate(&self, metadata: &DatasetMetadata) -> DatasetResult<()> {
        require_non_empty(&self.column_list, "column_list")?;
        require_columns(metadata, &self.column_list)
    }

    fn apply(&self, mut frame: Frame, _: &DatasetMetadata) -> DatasetResult<Transformed> {
        let mut created = BTreeMap::new();
        for column in &self.column_list {
            let values = to_string_values(frame.column(column)?)?;
            let prefix = self
                .prefix
                .clone()
                .unwrap_or_else(|| format!("{column}_"));

            let categories = categories(&values);
            if categories.is_empty() {
                return Err(DatasetError::invalid(format!(
                    "Column {column:?} has no values to one-hot encode"
                )));
            }

            let indicators: Vec<(String, ArrayRef)> = categories
                .into_iter()
                .enumerate()
                .map(|(i, category)| {
                    let name = if self.use_cat_name {
                        format!("{prefix}{category}")
                    } else {
                        format!("{prefix}{i}")
                    };
                    let indicator = values
                        .iter()
                        .map(|v| (v.as_deref() == Some(category.as_str())) as i64);
                    (name, int_column(indicator))
                })
                .collect();

            created.insert(
                column.clone(),
                indicators.iter().map(|(name, _)| name.clone()).collect::<Vec<_>>(),
            );
            frame = frame.splice_column(column, indicators)?;
        }

        Ok(Transformed::new(
            frame,
            ShapeImpact::ColumnsRemoved(self.column_list.clone()),
        )
        .with_details(json!({ "columns_created": created })))
    }
}

/// Replace categories with integers, from a mapping or by sorted order
#[derive(Debug, Clone, Deserialize)]
pub struct OrdinalEncode {
    pub column_name: String,
    #[serde(default)]
    pub mapping: Option<HashMap<String, i64>>,
}

impl Mutation for OrdinalEncode {
    fn name(&self) -> &'static str {
        "ordinal_encode"
    }

    fn referenced_columns(&self) -> Vec<String> {
        vec![self.column_name.clone()]
    }

    fn apply(&self, frame: Frame, _: &DatasetMetadata) -> DatasetResult<Transformed> {
        let values = to_string_values(frame.column(&self.column_name)?)?;
        let mapping = match &self.mapping {
            Some(mapping) => mapping.clone(),
            None => values
                .iter()
                .flatten()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .enumerate()
                .map(|(i, category)| (category.clone(), i as i64))
                .collect(),
        };

        let encoded = values
            .iter()
            .map(|v| match v {
                None => Ok(None),
                Some(category) => mapping.get(category).copied().map(Some).ok_or_else(|| {
                    DatasetError::invalid(format!(
                        "Category {category:?} of column {:?} has no mapping",
                        self.column_name
                    ))
                }),
            })
            .collect::<DatasetResult<Int64Array>>()?;

        Ok(Transformed::new(
            frame.replace_column(&self.column_name, Arc::new(encoded))?,
            ShapeImpact::ColumnsRetyped,
        ))
    }
}

/// Replace categories with how often they occur
#[derive(Debug, Clone, Deserialize)]
pub struct FrequencyEncode {
    pub column_list: Vec<String>,
    /// Use the share of rows instead of the count
    #[serde(default)]
    pub normalize: bool,
}

impl Mutation for FrequencyEncode {
    fn name(&self) -> &'static str {
        "frequency_encode"
    }

    fn referenced_columns(&self) -> Vec<String> {
        self.column_list.clone()
    }

    fn validate(&self, metadata: &DatasetMetadata) -> DatasetResult<()> {
        require_non_empty(&self.column_list, "column_list")?;
        require_columns(metadata, &self.column_list)
    }

    fn apply(&self, mut frame: Frame, _: &DatasetMetadata) -> DatasetResult<Transformed> {
        let n_rows = frame.num_rows();
        for column in &self.column_list {
            let values = to_string_values(frame.column(column)?)?;
            // Missing cells count as a category of their own
            let mut counts: HashMap<Option<&str>, i64> = HashMap::new();
            for value in &values {
                *counts.entry(value.as_deref()).or_default() += 1;
            }
            let counted = values.iter().map(|v| counts[&v.as_deref()]);

            let encoded: ArrayRef = if self.normalize {
                Arc::new(Float64Array::from_iter_values(
                    counted.map(|count| count as f64 / n_rows as f64),
                ))
            } else {
                int_column(counted)
            };
            frame = frame.replace_column(column, encoded)?;
        }
        Ok(Transformed::new(frame, ShapeImpact::ColumnsRetyped))
    }
}

/// Number each category from 1 in order of appearance and spread the number's bits over
/// `{column}_0..` columns, most significant first. Missing cells are all zeros.
#[derive(Debug, Clone, Deserialize)]
pub struct BinaryEncode {
    pub column_list: Vec<String>,
}

impl Mutation for BinaryEncode {
    fn name(&self) -> &'static str {
        "binary_encode"
    }

    fn referenced_columns(&self) -> Vec<String> {
        self.column_list.clone()
    }

    fn validate(&self, metadata: &DatasetMetadata) -> DatasetResult<()> {
        require_non_empty(&self.column_list, "column_list")?;
        require_columns(metadata, &self.column_list)
    }

    fn apply(&self, mut frame: Frame, _: &DatasetMetadata) -> DatasetResult<Transformed> {
        for column in &self.column_list {
            let values = to_string_values(frame.column(column)?)?;
            let ids: HashMap<String, u64> = categories(&values)
                .into_iter()
                .enumerate()
                .map(|(i, category)| (category, i as u64 + 1))
                .collect();
            let max_id = ids.len().max(1) as u64;
            let n_digits = (u64::BITS - max_id.leading_zeros()) as usize;

            let codes: Vec<u64> = values
                .iter()
                .map(|v| v.as_ref().and_then(|v| ids.get(v)).copied().unwrap_or(0))
                .collect();
            let digits = (0..n_digits)
                .map(|digit| {
                    let shift = n_digits - 1 - digit;
                    let bits = codes.iter().map(|code| ((code >> shift) & 1) as i64);
                    (format!("{column}_{digit}"), int_column(bits))
                })
                .collect();
            frame = frame.splice_column(column, digits)?;
        }

        Ok(Transformed::new(
            frame,
            ShapeImpact::ColumnsRemoved(self.column_list.clone()),
        ))
    }
}

/// Replace categories with the mean of a numerical target over the category's rows
#[derive(Debug, Clone, Deserialize)]
pub struct TargetEncode {
    pub column_list: Vec<String>,
    pub target_column: String,
    /// Leave each row's own target out of its category mean
    #[serde(default, alias = "leaveOneOut")]
    pub leave_one_out: bool,
}

impl Mutation for TargetEncode {
    fn name(&self) -> &'static str {
        "target_encode"
    }

    fn referenced_columns(&self) -> Vec<String> {
        let mut columns = self.column_list.clone();
        columns.push(self.target_column.clone());
        columns
    }

    fn validate(&self, metadata: &DatasetMetadata) -> DatasetResult<()> {
        require_non_empty(&self.column_list, "column_list")?;
        require_columns(metadata, &self.column_list)?;
        require_class(
            metadata,
            &[self.target_column.clone()],
            ColumnClass::Numerical,
        )?;
        if self.column_list.contains(&self.target_column) {
            return Err(DatasetError::invalid(
                "The target column can't encode itself",
            ));
        }
        Ok(())
    }

    fn apply(&self, mut frame: Frame, _: &DatasetMetadata) -> DatasetResult<Transformed> {
        let target = to_f64_values(frame.column(&self.target_column)?)?;
        let global_mean = mean(&present(&target)).unwrap_or(0.0);

        for column in &self.column_list {
            let values = to_string_values(frame.column(column)?)?;
            let mut totals: HashMap<Option<&str>, (f64, usize)> = HashMap::new();
            for (value, y) in values.iter().zip(&target) {
                let entry = totals.entry(value.as_deref()).or_default();
                if let Some(y) = y {
                    entry.0 += y;
                    entry.1 += 1;
                }
            }

            let encoded: Float64Array = values
                .iter()
                .zip(&target)
                .map(|(value, y)| {
                    let (sum, count) = totals[&value.as_deref()];
                    let (sum, count) = match (self.leave_one_out, y) {
                        (true, Some(y)) => (sum - y, count - 1),
                        _ => (sum, count),
                    };
                    Some(if count == 0 {
                        global_mean
                    } else {
                        sum / count as f64
                    })
                })
                .collect();
            frame = frame.replace_column(column, Arc::new(encoded))?;
        }

        Ok(Transformed::new(frame, ShapeImpact::ColumnsRetyped))
    }
}
