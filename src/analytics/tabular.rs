//! Windowed table views: search, then sort, then a row window and column projection.

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::array::{BooleanArray, UInt32Array};
use arrow::compute::{lexsort_to_indices, SortColumn, SortOptions};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::DatasweepContext;
use crate::data_types::UserIdentity;
use crate::error::{DatasetError, DatasetResult};
use crate::frame::values::{to_json_values, value_matches};
use crate::frame::Frame;
use crate::metadata::DatasetMetadata;
use crate::operations::require_columns;

use super::load;

// Above this many rows only the head and tail are returned
const FULL_VIEW_MAX_ROWS: usize = 50;
const HEAD_TAIL_ROWS: usize = 10;

/// A table in "split" orientation. `index` holds each row's position in the stored dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableView {
    pub columns: Vec<String>,
    pub index: Vec<usize>,
    pub data: Vec<Vec<Value>>,
}

impl TableView {
    pub fn from_frame(frame: &Frame, index: Vec<usize>) -> DatasetResult<Self> {
        let cells = frame
            .batch()
            .columns()
            .iter()
            .map(to_json_values)
            .collect::<DatasetResult<Vec<_>>>()?;
        let data = (0..frame.num_rows())
            .map(|row| cells.iter().map(|column| column[row].clone()).collect())
            .collect();
        Ok(Self {
            columns: frame.column_names(),
            index,
            data,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SortKey {
    pub column: String,
    #[serde(default = "ascending")]
    pub ascending: bool,
}

fn ascending() -> bool {
    true
}

/// Row window `[row_start, row_end)` over the searched and sorted rows, projected to
/// `columns` when given
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RowFilter {
    pub columns: Option<Vec<String>>,
    #[serde(default)]
    pub row_start: usize,
    pub row_end: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TabularQuery {
    /// Keep rows whose value in every listed column is one of the given values
    #[serde(default)]
    pub search: BTreeMap<String, Vec<Value>>,
    /// Applied in order, earlier keys taking precedence
    #[serde(default)]
    pub sort: Vec<SortKey>,
    pub filter: Option<RowFilter>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TabularRepresentation {
    pub n_rows: usize,
    pub n_columns: usize,
    /// The whole result, for small results
    pub data: Option<TableView>,
    pub head: Option<TableView>,
    pub tail: Option<TableView>,
}

impl TabularQuery {
    fn validate(&self, metadata: &DatasetMetadata) -> DatasetResult<()> {
        let search: Vec<String> = self.search.keys().cloned().collect();
        require_columns(metadata, &search)?;
        let sort: Vec<String> = self.sort.iter().map(|k| k.column.clone()).collect();
        require_columns(metadata, &sort)?;
        if let Some(filter) = &self.filter {
            if let Some(columns) = &filter.columns {
                require_columns(metadata, columns)?;
            }
            if let Some(end) = filter.row_end {
                if end < filter.row_start {
                    return Err(DatasetError::invalid(format!(
                        "Row window {}..{} is empty",
                        filter.row_start, end
                    )));
                }
            }
        }
        Ok(())
    }

    /// Rows of `frame` the query selects, in output order
    fn row_positions(&self, frame: &Frame) -> DatasetResult<Vec<usize>> {
        let mut keep = vec![true; frame.num_rows()];
        for (column, values) in &self.search {
            for (row, matched) in value_matches(frame.column(column)?, values)?
                .into_iter()
                .enumerate()
            {
                keep[row] &= matched;
            }
        }
        let mut positions: Vec<usize> = (0..frame.num_rows()).filter(|i| keep[*i]).collect();

        if !self.sort.is_empty() && !positions.is_empty() {
            let mask: BooleanArray = keep.iter().map(|k| Some(*k)).collect();
            let searched = frame.filter_rows(&mask)?;
            let mut sort_columns = self
                .sort
                .iter()
                .map(|key| {
                    Ok(SortColumn {
                        values: searched.column(&key.column)?.clone(),
                        options: Some(SortOptions {
                            descending: !key.ascending,
                            nulls_first: false,
                        }),
                    })
                })
                .collect::<DatasetResult<Vec<_>>>()?;
            // Ties keep their stored order
            sort_columns.push(SortColumn {
                values: Arc::new(UInt32Array::from_iter_values(
                    0..searched.num_rows() as u32,
                )),
                options: None,
            });
            let order = lexsort_to_indices(&sort_columns, None)?;
            positions = order
                .values()
                .iter()
                .map(|i| positions[*i as usize])
                .collect();
        }

        if let Some(filter) = &self.filter {
            let end = filter.row_end.unwrap_or(positions.len()).min(positions.len());
            let start = filter.row_start.min(end);
            positions = positions[start..end].to_vec();
        }
        Ok(positions)
    }

    pub fn run(&self, frame: &Frame) -> DatasetResult<TabularRepresentation> {
        let positions = self.row_positions(frame)?;
        let rows = UInt32Array::from_iter_values(positions.iter().map(|p| *p as u32));
        let mut selected = frame.take_rows(&rows)?;
        if let Some(columns) = self.filter.as_ref().and_then(|f| f.columns.as_ref()) {
            selected = selected.select(columns)?;
        }

        let n_rows = selected.num_rows();
        let view = |offset: usize, length: usize| {
            TableView::from_frame(
                &selected.slice(offset, length),
                positions[offset..offset + length].to_vec(),
            )
        };

        let (data, head, tail) = if n_rows <= FULL_VIEW_MAX_ROWS {
            (Some(view(0, n_rows)?), None, None)
        } else {
            (
                None,
                Some(view(0, HEAD_TAIL_ROWS)?),
                Some(view(n_rows - HEAD_TAIL_ROWS, HEAD_TAIL_ROWS)?),
            )
        };

        Ok(TabularRepresentation {
            n_rows,
            n_columns: selected.num_columns(),
            data,
            head,
            tail,
        })
    }
}

pub async fn tabular_representation(
    context: &DatasweepContext,
    user: &UserIdentity,
    dataset_name: &str,
    query: &TabularQuery,
) -> DatasetResult<TabularRepresentation> {
    let active = load(context, user, dataset_name).await?;
    query.validate(&active.metadata)?;
    query.run(&active.frame)
}
