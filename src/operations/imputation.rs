//! Filling missing values.

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::DataType;
use serde::Deserialize;
use serde_json::{json, Value};
use strum_macros::Display;

use crate::error::{DatasetError, DatasetResult};
use crate::frame::stats::{mean, median, mode, numeric_mode, present};
use crate::frame::values::{
    json_to_f64, json_to_i64, json_to_key, to_f64_values, to_i64_values, to_string_values,
};
use crate::frame::{ColumnClass, Frame};
use crate::metadata::DatasetMetadata;

use super::{require_class, require_columns, Mutation, ShapeImpact, Transformed};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ImputeStrategy {
    Mean,
    Median,
    Mode,
    Constant,
}

/// Replace missing cells with a per-column statistic or a constant.
///
/// Without a `column_list` the strategy picks its own columns: the numerical ones for mean and
/// median, every column for mode, and the columns of the constant's class for constant.
/// Columns with no values to compute a statistic from are left alone and reported as skipped.
#[derive(Debug, Clone, Deserialize)]
pub struct Impute {
    pub strategy: ImputeStrategy,
    #[serde(default)]
    pub column_list: Option<Vec<String>>,
    #[serde(default)]
    pub value: Option<Value>,
}

impl Impute {
    fn value_class(&self) -> DatasetResult<ColumnClass> {
        match &self.value {
            Some(Value::Number(_)) => Ok(ColumnClass::Numerical),
            Some(Value::String(_)) | Some(Value::Bool(_)) => Ok(ColumnClass::Categorical),
            Some(other) => Err(DatasetError::invalid(format!(
                "Can't impute with {other}"
            ))),
            None => Err(DatasetError::invalid(
                "Constant imputation needs a value",
            )),
        }
    }

    /// Columns the strategy applies to, in dataset order
    fn target_columns(&self, metadata: &DatasetMetadata) -> DatasetResult<Vec<String>> {
        let class = match self.strategy {
            ImputeStrategy::Mean | ImputeStrategy::Median => Some(ColumnClass::Numerical),
            ImputeStrategy::Mode => None,
            ImputeStrategy::Constant => Some(self.value_class()?),
        };

        let columns = match (&self.column_list, class) {
            (Some(columns), Some(class)) => {
                require_class(metadata, columns, class)?;
                columns.clone()
            }
            (Some(columns), None) => {
                require_columns(metadata, columns)?;
                columns.clone()
            }
            (None, Some(class)) => metadata
                .column_list
                .iter()
                .filter(|c| metadata.class_of(c) == Some(class))
                .cloned()
                .collect(),
            (None, None) => metadata.column_list.clone(),
        };

        if columns.is_empty() {
            return Err(DatasetError::invalid(format!(
                "No columns {} imputation applies to",
                self.strategy
            )));
        }
        Ok(columns)
    }

    /// Filled column, the number of cells filled and whether the fill fits an integer column
    fn fill_numerical(
        &self,
        array: &ArrayRef,
    ) -> DatasetResult<Option<(ArrayRef, usize, bool)>> {
        let values = to_f64_values(array)?;
        let fill = match self.strategy {
            ImputeStrategy::Mean => mean(&present(&values)),
            ImputeStrategy::Median => median(&values),
            ImputeStrategy::Mode => numeric_mode(&values),
            ImputeStrategy::Constant => self.value.as_ref().and_then(json_to_f64),
        };
        let Some(fill) = fill else {
            return Ok(None);
        };

        let missing = values.iter().filter(|v| v.is_none()).count();

        // Integer columns with an integral fill are filled in place, never through floats
        if array.data_type().is_integer() && *array.data_type() != DataType::UInt64 {
            let exact = match self.strategy {
                ImputeStrategy::Constant => self.value.as_ref().and_then(json_to_i64),
                _ => (fill.fract() == 0.0).then_some(fill as i64),
            };
            if let Some(fill) = exact {
                let filled: Int64Array = to_i64_values(array)?
                    .into_iter()
                    .map(|v| v.or(Some(fill)))
                    .collect();
                return Ok(Some((Arc::new(filled), missing, true)));
            }
        }

        let filled: Float64Array = values.into_iter().map(|v| v.or(Some(fill))).collect();
        Ok(Some((Arc::new(filled), missing, fill.fract() == 0.0)))
    }

    fn fill_categorical(
        &self,
        array: &ArrayRef,
    ) -> DatasetResult<Option<(ArrayRef, usize, bool)>> {
        let values = to_string_values(array)?;
        let fill = match self.strategy {
            ImputeStrategy::Constant => self.value.as_ref().and_then(json_to_key),
            _ => mode(&values),
        };
        let Some(fill) = fill else {
            return Ok(None);
        };

        let missing = values.iter().filter(|v| v.is_none()).count();
        let filled: StringArray = values
            .into_iter()
            .map(|v| v.or_else(|| Some(fill.clone())))
            .collect();
        Ok(Some((Arc::new(filled), missing, true)))
    }
}

impl Mutation for Impute {
    fn name(&self) -> &'static str {
        "impute"
    }

    fn referenced_columns(&self) -> Vec<String> {
        self.column_list.clone().unwrap_or_default()
    }

    fn validate(&self, metadata: &DatasetMetadata) -> DatasetResult<()> {
        self.target_columns(metadata).map(|_| ())
    }

    fn apply(&self, mut frame: Frame, metadata: &DatasetMetadata) -> DatasetResult<Transformed> {
        let mut imputed = BTreeMap::new();
        let mut skipped = vec![];
        let mut retyped = false;

        for column in self.target_columns(metadata)? {
            let array = frame.column(&column)?.clone();
            let original_type = array.data_type().clone();
            let filled = match frame.class_of(&column)? {
                ColumnClass::Numerical => self.fill_numerical(&array)?,
                ColumnClass::Categorical => self.fill_categorical(&array)?,
            };
            let Some((values, missing, fits_type)) = filled else {
                skipped.push(column);
                continue;
            };

            frame = frame.replace_column(&column, values)?;
            if fits_type {
                // Back to the column's own type: a constant it can't hold is an error
                frame = frame.cast_column(&column, &original_type, true)?;
            } else if original_type.is_integer() {
                // A fractional fill turns an integer column into a float one
                retyped = true;
            } else {
                frame = frame.cast_column(&column, &original_type, true)?;
            }
            imputed.insert(column, missing);
        }

        let impact = if retyped {
            ShapeImpact::ColumnsRetyped
        } else {
            ShapeImpact::ValuesOnly
        };
        Ok(Transformed::new(frame, impact)
            .with_details(json!({ "imputed": imputed, "skipped": skipped })))
    }
}
