//! A typed, ordered table of columns backed by a single Arrow [`RecordBatch`].
//!
//! Everything above this module (metadata synchronisation, mutations, analytics) talks to
//! datasets only through [`Frame`], never to Arrow directly.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, BooleanArray, UInt32Array};
use arrow::compute::{cast_with_options, filter_record_batch, take, CastOptions};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::{DatasetError, DatasetResult};

pub mod io;
pub mod stats;
pub mod values;

/// The classification every metadata record partitions its columns into.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ColumnClass {
    #[strum(to_string = "numerical", serialize = "numeric")]
    Numerical,
    Categorical,
}

/// Textual and boolean columns are categorical, everything else is numerical. This is the
/// only place the rule lives.
pub fn classify(data_type: &DataType) -> ColumnClass {
    match data_type {
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Boolean => ColumnClass::Categorical,
        _ => ColumnClass::Numerical,
    }
}

pub fn type_name(data_type: &DataType) -> String {
    data_type.to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    batch: RecordBatch,
}

impl Frame {
    pub fn new(batch: RecordBatch) -> Self {
        Self { batch }
    }

    /// Build a frame from named columns, in order. All fields are nullable.
    pub fn try_new(columns: Vec<(String, ArrayRef)>) -> DatasetResult<Self> {
        if columns.is_empty() {
            return Err(DatasetError::invalid("A dataset needs at least one column"));
        }

        let mut seen = HashSet::new();
        for (name, _) in &columns {
            if name.is_empty() {
                return Err(DatasetError::invalid("Column names can't be empty"));
            }
            if !seen.insert(name.as_str()) {
                return Err(DatasetError::invalid(format!(
                    "Duplicate column name {name:?}"
                )));
            }
        }

        let fields: Vec<Field> = columns
            .iter()
            .map(|(name, array)| Field::new(name, array.data_type().clone(), true))
            .collect();
        let arrays = columns.into_iter().map(|(_, array)| array).collect();

        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?;
        Ok(Self { batch })
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn into_batch(self) -> RecordBatch {
        self.batch
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    pub fn num_values(&self) -> usize {
        self.num_rows() * self.num_columns()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    /// Column names paired with their Arrow types, in order
    pub fn fields(&self) -> Vec<(String, DataType)> {
        self.batch
            .schema()
            .fields()
            .iter()
            .map(|f| (f.name().clone(), f.data_type().clone()))
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.batch.schema().index_of(name).is_ok()
    }

    pub fn column(&self, name: &str) -> DatasetResult<&ArrayRef> {
        self.batch
            .column_by_name(name)
            .ok_or_else(|| DatasetError::ColumnNotFound {
                name: name.to_string(),
            })
    }

    pub fn data_type(&self, name: &str) -> DatasetResult<DataType> {
        Ok(self.column(name)?.data_type().clone())
    }

    pub fn class_of(&self, name: &str) -> DatasetResult<ColumnClass> {
        Ok(classify(self.column(name)?.data_type()))
    }

    fn named_columns(&self) -> Vec<(String, ArrayRef)> {
        self.column_names()
            .into_iter()
            .zip(self.batch.columns().iter().cloned())
            .collect()
    }

    fn ensure_columns(&self, names: &[String]) -> DatasetResult<()> {
        for name in names {
            self.column(name)?;
        }
        Ok(())
    }

    pub fn select(&self, names: &[String]) -> DatasetResult<Frame> {
        let columns = names
            .iter()
            .map(|name| Ok((name.clone(), self.column(name)?.clone())))
            .collect::<DatasetResult<Vec<_>>>()?;
        Frame::try_new(columns)
    }

    pub fn drop_columns(&self, names: &[String]) -> DatasetResult<Frame> {
        self.ensure_columns(names)?;
        let columns = self
            .named_columns()
            .into_iter()
            .filter(|(name, _)| !names.contains(name))
            .collect();
        Frame::try_new(columns)
    }

    pub fn rename_columns(&self, mapping: &HashMap<String, String>) -> DatasetResult<Frame> {
        self.ensure_columns(&mapping.keys().cloned().collect::<Vec<_>>())?;
        let columns = self
            .named_columns()
            .into_iter()
            .map(|(name, array)| match mapping.get(&name) {
                Some(new_name) => (new_name.clone(), array),
                None => (name, array),
            })
            .collect();
        Frame::try_new(columns)
    }

    /// Cast a column in place. With `strict`, values that can't be represented in the
    /// target type are an error rather than becoming missing.
    pub fn cast_column(&self, name: &str, to: &DataType, strict: bool) -> DatasetResult<Frame> {
        let options = CastOptions {
            safe: !strict,
            ..Default::default()
        };
        let cast = cast_with_options(self.column(name)?, to, &options).map_err(|e| {
            DatasetError::invalid(format!("Can't convert column {name:?} to {to}: {e}"))
        })?;
        self.replace_column(name, cast)
    }

    /// Swap a column's values (and possibly its type), keeping its position
    pub fn replace_column(&self, name: &str, array: ArrayRef) -> DatasetResult<Frame> {
        self.splice_column(name, vec![(name.to_string(), array)])
    }

    /// Replace one column with any number of new ones at the same position
    pub fn splice_column(
        &self,
        name: &str,
        replacements: Vec<(String, ArrayRef)>,
    ) -> DatasetResult<Frame> {
        self.column(name)?;
        let mut replacements = Some(replacements);
        let mut columns = Vec::with_capacity(self.num_columns());
        for (column_name, array) in self.named_columns() {
            if column_name == name {
                columns.extend(replacements.take().unwrap_or_default());
            } else {
                columns.push((column_name, array));
            }
        }
        Frame::try_new(columns)
    }

    /// Keep only the rows where `keep` is true
    pub fn filter_rows(&self, keep: &BooleanArray) -> DatasetResult<Frame> {
        Ok(Frame::new(filter_record_batch(&self.batch, keep)?))
    }

    pub fn take_rows(&self, indices: &UInt32Array) -> DatasetResult<Frame> {
        let columns = self
            .batch
            .columns()
            .iter()
            .map(|c| take(c.as_ref(), indices, None))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Frame::new(RecordBatch::try_new(self.batch.schema(), columns)?))
    }

    pub fn slice(&self, offset: usize, length: usize) -> Frame {
        let offset = offset.min(self.num_rows());
        let length = length.min(self.num_rows() - offset);
        Frame::new(self.batch.slice(offset, length))
    }

    pub fn null_count(&self, name: &str) -> DatasetResult<usize> {
        Ok(self.column(name)?.null_count())
    }
}
