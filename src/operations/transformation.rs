//! Numerical column transformations. Results are always float columns.

use std::sync::Arc;

use arrow::array::Float64Array;
use serde::Deserialize;
use strum_macros::Display;

use crate::error::{DatasetError, DatasetResult};
use crate::frame::stats::{mean, min_max, present, std_dev};
use crate::frame::values::to_f64_values;
use crate::frame::{ColumnClass, Frame};
use crate::metadata::DatasetMetadata;

use super::{require_class, require_non_empty, Mutation, ShapeImpact, Transformed};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum TransformMethod {
    /// Min-max scaling into `[0, 1]`
    Normalization,
    /// Zero mean, unit (population) standard deviation
    Standardization,
    #[serde(alias = "log")]
    LogTransformation,
    #[serde(alias = "exp")]
    ExponentialTransformation,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Transform {
    #[serde(alias = "transformation_method")]
    pub method: TransformMethod,
    pub column_list: Vec<String>,
}

impl Transform {
    fn transform(&self, column: &str, values: Vec<Option<f64>>) -> DatasetResult<Float64Array> {
        let present = present(&values);
        let transformed = match self.method {
            TransformMethod::Normalization => {
                let (min, max) = min_max(&present).unwrap_or((0.0, 0.0));
                let range = max - min;
                values
                    .into_iter()
                    .map(|v| v.map(|x| if range == 0.0 { 0.0 } else { (x - min) / range }))
                    .collect()
            }
            TransformMethod::Standardization => {
                let mean = mean(&present).unwrap_or(0.0);
                let std = std_dev(&present, 0).unwrap_or(0.0);
                values
                    .into_iter()
                    .map(|v| v.map(|x| if std == 0.0 { 0.0 } else { (x - mean) / std }))
                    .collect()
            }
            TransformMethod::LogTransformation => {
                if let Some(x) = present.iter().find(|x| **x <= 0.0) {
                    return Err(DatasetError::invalid(format!(
                        "Can't take the log of column {column:?}: it contains {x}"
                    )));
                }
                values.into_iter().map(|v| v.map(f64::ln)).collect()
            }
            TransformMethod::ExponentialTransformation => {
                values.into_iter().map(|v| v.map(f64::exp)).collect()
            }
        };
        Ok(transformed)
    }
}

impl Mutation for Transform {
    fn name(&self) -> &'static str {
        "transform"
    }

    fn referenced_columns(&self) -> Vec<String> {
        self.column_list.clone()
    }

    fn validate(&self, metadata: &DatasetMetadata) -> DatasetResult<()> {
        require_non_empty(&self.column_list, "column_list")?;
        require_class(metadata, &self.column_list, ColumnClass::Numerical)
    }

    fn apply(&self, mut frame: Frame, _: &DatasetMetadata) -> DatasetResult<Transformed> {
        for column in &self.column_list {
            let values = to_f64_values(frame.column(column)?)?;
            let transformed = self.transform(column, values)?;
            frame = frame.replace_column(column, Arc::new(transformed))?;
        }
        Ok(Transformed::new(frame, ShapeImpact::ColumnsRetyped))
    }
}
