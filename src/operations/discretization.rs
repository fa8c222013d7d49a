//! Binning a numerical column, either into computed bins or into user-defined ranges.

use std::collections::BTreeSet;
use std::sync::Arc;

use arrow::array::{ArrayRef, Int64Array, StringArray};
use serde::Deserialize;
use serde_json::json;
use strum_macros::Display;

use crate::error::{DatasetError, DatasetResult};
use crate::frame::stats::{min_max, quantile, sorted};
use crate::frame::values::to_f64_values;
use crate::frame::{ColumnClass, Frame};
use crate::metadata::DatasetMetadata;

use super::{require_class, Mutation, ShapeImpact, Transformed};

const KMEANS_MAX_ITERATIONS: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BinStrategy {
    /// Equal-width bins
    Uniform,
    /// Equal-frequency bins
    Quantile,
    /// Bins around one-dimensional k-means centroids
    Kmeans,
    /// User-supplied value ranges, each with its own category name
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinEncoding {
    Ordinal,
    Onehot,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RangeBound {
    pub value: f64,
    #[serde(default = "included_by_default")]
    pub included: bool,
}

fn included_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CustomRange {
    pub start: RangeBound,
    pub end: RangeBound,
    pub category: String,
}

impl CustomRange {
    fn contains(&self, x: f64) -> bool {
        let above_start = if self.start.included {
            x >= self.start.value
        } else {
            x > self.start.value
        };
        let below_end = if self.end.included {
            x <= self.end.value
        } else {
            x < self.end.value
        };
        above_start && below_end
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Discretize {
    pub column_name: String,
    pub strategy: BinStrategy,
    #[serde(default)]
    pub n_bins: Option<usize>,
    #[serde(alias = "encoding_type")]
    pub encoding: BinEncoding,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub range_list: Option<Vec<CustomRange>>,
    #[serde(default)]
    pub default_category: Option<String>,
}

/// Interior edges as a search boundary: a value's bin is the number of interior edges at or
/// below it
fn assign_bins(values: &[f64], edges: &[f64]) -> Vec<usize> {
    let bins = edges.len().saturating_sub(1).max(1);
    let inner = if edges.len() > 2 {
        &edges[1..edges.len() - 1]
    } else {
        &[][..]
    };
    values
        .iter()
        .map(|x| inner.partition_point(|edge| edge <= x).min(bins - 1))
        .collect()
}

fn uniform_edges(values: &[f64], n_bins: usize) -> Vec<f64> {
    let (min, max) = min_max(values).unwrap_or((0.0, 0.0));
    let width = (max - min) / n_bins as f64;
    (0..=n_bins).map(|i| min + width * i as f64).collect()
}

fn quantile_edges(values: &[f64], n_bins: usize) -> Vec<f64> {
    let sorted = sorted(&values.iter().copied().map(Some).collect::<Vec<_>>());
    let mut edges: Vec<f64> = (0..=n_bins)
        .filter_map(|i| quantile(&sorted, i as f64 / n_bins as f64))
        .collect();
    // Repeated values collapse bins
    edges.dedup();
    if edges.len() == 1 {
        edges.push(edges[0]);
    }
    edges
}

/// Lloyd's algorithm in one dimension, seeded with the midpoints of equal-width bins
fn kmeans_edges(values: &[f64], n_bins: usize) -> Vec<f64> {
    let (min, max) = min_max(values).unwrap_or((0.0, 0.0));
    let uniform = uniform_edges(values, n_bins);
    let mut centers: Vec<f64> = uniform.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect();

    for _ in 0..KMEANS_MAX_ITERATIONS {
        let mut sums = vec![0.0; n_bins];
        let mut counts = vec![0usize; n_bins];
        for x in values {
            let nearest = centers
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    (*a - x)
                        .abs()
                        .partial_cmp(&(*b - x).abs())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(i, _)| i)
                .unwrap_or(0);
            sums[nearest] += x;
            counts[nearest] += 1;
        }

        let updated: Vec<f64> = centers
            .iter()
            .enumerate()
            .map(|(i, center)| {
                // An empty cluster keeps its centre
                if counts[i] == 0 {
                    *center
                } else {
                    sums[i] / counts[i] as f64
                }
            })
            .collect();
        if updated == centers {
            break;
        }
        centers = updated;
    }

    centers.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mut edges = vec![min];
    edges.extend(centers.windows(2).map(|w| (w[0] + w[1]) / 2.0));
    edges.push(max);
    edges
}

fn one_hot(names: Vec<String>, bins: &[usize]) -> Vec<(String, ArrayRef)> {
    names
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            let indicator = Int64Array::from_iter_values(bins.iter().map(|b| (*b == i) as i64));
            (name, Arc::new(indicator) as ArrayRef)
        })
        .collect()
}

impl Discretize {
    fn prefix(&self) -> DatasetResult<&str> {
        self.prefix
            .as_deref()
            .ok_or_else(|| DatasetError::invalid("One-hot encoded bins need a prefix"))
    }

    fn ranges(&self) -> DatasetResult<&[CustomRange]> {
        match self.range_list.as_deref() {
            Some(ranges) if !ranges.is_empty() => Ok(ranges),
            _ => Err(DatasetError::invalid("Custom bins need a range_list")),
        }
    }

    fn default_category(&self) -> DatasetResult<&str> {
        self.default_category
            .as_deref()
            .ok_or_else(|| DatasetError::invalid("Custom bins need a default_category"))
    }

    fn computed_bins(
        &self,
        frame: Frame,
        values: &[f64],
        edges: Vec<f64>,
    ) -> DatasetResult<Transformed> {
        let bins = assign_bins(values, &edges);
        let details = json!({ "bin_edges": edges });

        let transformed = match self.encoding {
            BinEncoding::Ordinal => {
                let ordinal = Int64Array::from_iter_values(bins.iter().map(|b| *b as i64));
                Transformed::new(
                    frame.replace_column(&self.column_name, Arc::new(ordinal))?,
                    ShapeImpact::ColumnsRetyped,
                )
            }
            BinEncoding::Onehot => {
                let prefix = self.prefix()?;
                let names = (0..edges.len() - 1).map(|i| format!("{prefix}{i}")).collect();
                Transformed::new(
                    frame.splice_column(&self.column_name, one_hot(names, &bins))?,
                    ShapeImpact::ColumnsRemoved(vec![self.column_name.clone()]),
                )
            }
        };
        Ok(transformed.with_details(details))
    }

    fn custom_bins(&self, frame: Frame, values: &[f64]) -> DatasetResult<Transformed> {
        let ranges = self.ranges()?;
        let default_category = self.default_category()?;
        let labels: Vec<&str> = values
            .iter()
            .map(|x| {
                ranges
                    .iter()
                    .find(|range| range.contains(*x))
                    .map_or(default_category, |range| range.category.as_str())
            })
            .collect();

        match self.encoding {
            BinEncoding::Ordinal => {
                let labels = StringArray::from(labels);
                Ok(Transformed::new(
                    frame.replace_column(&self.column_name, Arc::new(labels))?,
                    ShapeImpact::ColumnsRetyped,
                ))
            }
            BinEncoding::Onehot => {
                let prefix = self.prefix()?;
                let categories: Vec<&str> = labels
                    .iter()
                    .copied()
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                let bins: Vec<usize> = labels
                    .iter()
                    .map(|label| categories.iter().position(|c| c == label).unwrap_or(0))
                    .collect();
                let names = categories
                    .iter()
                    .map(|category| format!("{prefix}_{category}"))
                    .collect();
                Ok(Transformed::new(
                    frame.splice_column(&self.column_name, one_hot(names, &bins))?,
                    ShapeImpact::ColumnsRemoved(vec![self.column_name.clone()]),
                ))
            }
        }
    }
}

impl Mutation for Discretize {
    fn name(&self) -> &'static str {
        "discretize"
    }

    fn referenced_columns(&self) -> Vec<String> {
        vec![self.column_name.clone()]
    }

    fn validate(&self, metadata: &DatasetMetadata) -> DatasetResult<()> {
        require_class(
            metadata,
            &self.referenced_columns(),
            ColumnClass::Numerical,
        )?;
        if self.encoding == BinEncoding::Onehot {
            self.prefix()?;
        }

        if self.strategy == BinStrategy::Custom {
            self.default_category()?;
            for range in self.ranges()? {
                if range.start.value > range.end.value {
                    return Err(DatasetError::invalid(format!(
                        "Range for {:?} starts after it ends",
                        range.category
                    )));
                }
                if metadata.has_column(&range.category) {
                    return Err(DatasetError::invalid(format!(
                        "Category {:?} is already a column name",
                        range.category
                    )));
                }
            }
            return Ok(());
        }

        match self.n_bins {
            Some(n_bins) if n_bins >= 2 && n_bins <= metadata.n_rows => Ok(()),
            Some(n_bins) => Err(DatasetError::invalid(format!(
                "Number of bins must be between 2 and {}, not {n_bins}",
                metadata.n_rows
            ))),
            None => Err(DatasetError::invalid(format!(
                "{} bins need n_bins",
                self.strategy
            ))),
        }
    }

    fn apply(&self, frame: Frame, _: &DatasetMetadata) -> DatasetResult<Transformed> {
        if frame.null_count(&self.column_name)? > 0 {
            return Err(DatasetError::invalid(format!(
                "Column {:?} has missing values, impute them before discretizing",
                self.column_name
            )));
        }
        let values: Vec<f64> = to_f64_values(frame.column(&self.column_name)?)?
            .into_iter()
            .collect::<Option<_>>()
            .ok_or_else(|| {
                DatasetError::invalid(format!(
                    "Column {:?} has non-numeric values",
                    self.column_name
                ))
            })?;

        let n_bins = self.n_bins.unwrap_or(2);
        let edges = match self.strategy {
            BinStrategy::Custom => return self.custom_bins(frame, &values),
            BinStrategy::Uniform => uniform_edges(&values, n_bins),
            BinStrategy::Quantile => quantile_edges(&values, n_bins),
            BinStrategy::Kmeans => kmeans_edges(&values, n_bins),
        };
        self.computed_bins(frame, &values, edges)
    }
}
