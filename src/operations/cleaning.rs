//! Row and column cleaning: dropping, renaming, find-and-replace and retyping.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::DataType;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{DatasetError, DatasetResult};
use crate::frame::values::{
    json_to_f64, json_to_i64, json_to_key, to_f64_values, to_i64_values, to_string_values,
    value_matches,
};
use crate::frame::{ColumnClass, Frame};
use crate::metadata::DatasetMetadata;

use super::{
    require_class, require_columns, require_non_empty, Mutation, ShapeImpact, Transformed,
};

fn keep_mask(drop: &[bool]) -> BooleanArray {
    drop.iter().map(|d| Some(!d)).collect()
}

fn rows_dropped(frame: Frame, drop: &[bool]) -> DatasetResult<Transformed> {
    let dropped = drop.iter().filter(|d| **d).count();
    let frame = frame.filter_rows(&keep_mask(drop))?;
    Ok(Transformed::new(frame, ShapeImpact::RowsChanged)
        .with_details(json!({ "rows_dropped": dropped })))
}

/// Drop an inclusive range of row positions
#[derive(Debug, Clone, Deserialize)]
pub struct DropRowsByIndex {
    pub row_start: usize,
    pub row_end: usize,
}

impl Mutation for DropRowsByIndex {
    fn name(&self) -> &'static str {
        "drop_rows_by_index"
    }

    fn referenced_columns(&self) -> Vec<String> {
        vec![]
    }

    fn validate(&self, metadata: &DatasetMetadata) -> DatasetResult<()> {
        if self.row_start > self.row_end || self.row_end >= metadata.n_rows {
            return Err(DatasetError::invalid(format!(
                "Row range {}..={} is outside 0..{}",
                self.row_start, self.row_end, metadata.n_rows
            )));
        }
        Ok(())
    }

    fn apply(&self, frame: Frame, _: &DatasetMetadata) -> DatasetResult<Transformed> {
        let drop: Vec<bool> = (0..frame.num_rows())
            .map(|i| (self.row_start..=self.row_end).contains(&i))
            .collect();
        rows_dropped(frame, &drop)
    }
}

/// Drop rows holding any of the listed values. `null` matches missing cells.
#[derive(Debug, Clone, Deserialize)]
pub struct DropRowsByValue {
    pub col_value_info: BTreeMap<String, Vec<Value>>,
}

impl Mutation for DropRowsByValue {
    fn name(&self) -> &'static str {
        "drop_rows_by_value"
    }

    fn referenced_columns(&self) -> Vec<String> {
        self.col_value_info.keys().cloned().collect()
    }

    fn validate(&self, metadata: &DatasetMetadata) -> DatasetResult<()> {
        require_non_empty(&self.referenced_columns(), "col_value_info")?;
        require_columns(metadata, &self.referenced_columns())
    }

    fn apply(&self, frame: Frame, _: &DatasetMetadata) -> DatasetResult<Transformed> {
        let mut drop = vec![false; frame.num_rows()];
        for (column, values) in &self.col_value_info {
            for (row, matched) in value_matches(frame.column(column)?, values)?
                .into_iter()
                .enumerate()
            {
                drop[row] |= matched;
            }
        }

        rows_dropped(frame, &drop)
    }
}

/// Drop rows whose value falls inside `[from, to]`. Missing cells are kept.
#[derive(Debug, Clone, Deserialize)]
pub struct DropRowsByNumericalRange {
    pub col_range_info: BTreeMap<String, (f64, f64)>,
}

impl Mutation for DropRowsByNumericalRange {
    fn name(&self) -> &'static str {
        "drop_rows_by_numerical_range"
    }

    fn referenced_columns(&self) -> Vec<String> {
        self.col_range_info.keys().cloned().collect()
    }

    fn validate(&self, metadata: &DatasetMetadata) -> DatasetResult<()> {
        require_non_empty(&self.referenced_columns(), "col_range_info")?;
        require_class(
            metadata,
            &self.referenced_columns(),
            ColumnClass::Numerical,
        )?;
        for (column, (from, to)) in &self.col_range_info {
            if from > to || from.is_nan() || to.is_nan() {
                return Err(DatasetError::invalid(format!(
                    "Invalid range [{from}, {to}] for column {column:?}"
                )));
            }
        }
        Ok(())
    }

    fn apply(&self, frame: Frame, _: &DatasetMetadata) -> DatasetResult<Transformed> {
        let mut drop = vec![false; frame.num_rows()];
        for (column, (from, to)) in &self.col_range_info {
            for (row, cell) in to_f64_values(frame.column(column)?)?.into_iter().enumerate() {
                drop[row] |= cell.map_or(false, |x| *from <= x && x <= *to);
            }
        }
        rows_dropped(frame, &drop)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DropColumns {
    pub col_list: Vec<String>,
}

impl Mutation for DropColumns {
    fn name(&self) -> &'static str {
        "drop_columns"
    }

    fn referenced_columns(&self) -> Vec<String> {
        self.col_list.clone()
    }

    fn validate(&self, metadata: &DatasetMetadata) -> DatasetResult<()> {
        require_non_empty(&self.col_list, "col_list")?;
        require_columns(metadata, &self.col_list)?;
        let dropping: HashSet<&String> = self.col_list.iter().collect();
        if dropping.len() >= metadata.column_list.len() {
            return Err(DatasetError::invalid(
                "Can't drop every column of a dataset",
            ));
        }
        Ok(())
    }

    fn apply(&self, frame: Frame, _: &DatasetMetadata) -> DatasetResult<Transformed> {
        let frame = frame.drop_columns(&self.col_list)?;
        Ok(Transformed::new(
            frame,
            ShapeImpact::ColumnsRemoved(self.col_list.clone()),
        ))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenameColumns {
    pub col_name_change_info: BTreeMap<String, String>,
}

impl Mutation for RenameColumns {
    fn name(&self) -> &'static str {
        "rename_columns"
    }

    fn referenced_columns(&self) -> Vec<String> {
        self.col_name_change_info.keys().cloned().collect()
    }

    fn validate(&self, metadata: &DatasetMetadata) -> DatasetResult<()> {
        require_non_empty(&self.referenced_columns(), "col_name_change_info")?;
        require_columns(metadata, &self.referenced_columns())?;

        let mut seen = HashSet::new();
        for column in &metadata.column_list {
            let name = self
                .col_name_change_info
                .get(column)
                .map(|n| n.trim())
                .unwrap_or(column);
            if name.is_empty() {
                return Err(DatasetError::invalid(format!(
                    "New name for column {column:?} is empty"
                )));
            }
            if !seen.insert(name) {
                return Err(DatasetError::invalid(format!(
                    "Renaming would leave two columns called {name:?}"
                )));
            }
        }
        Ok(())
    }

    fn apply(&self, frame: Frame, _: &DatasetMetadata) -> DatasetResult<Transformed> {
        let mapping: HashMap<String, String> = self
            .col_name_change_info
            .iter()
            .map(|(old, new)| (old.clone(), new.trim().to_string()))
            .collect();
        let frame = frame.rename_columns(&mapping)?;
        Ok(Transformed::new(
            frame,
            ShapeImpact::ColumnsRenamed(mapping.into_iter().collect()),
        ))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Replacement {
    pub find: Value,
    pub replace: Value,
}

/// Replace exact cell values, keeping each column's type
#[derive(Debug, Clone, Deserialize)]
pub struct FindAndReplace {
    pub fill_info: BTreeMap<String, Vec<Replacement>>,
}

impl FindAndReplace {
    fn replace_integer(
        column: &str,
        array: &ArrayRef,
        replacements: &[Replacement],
    ) -> DatasetResult<(ArrayRef, usize)> {
        let pairs = replacements
            .iter()
            .map(|r| {
                let find = json_to_i64(&r.find);
                let replace = json_to_i64(&r.replace);
                if (find.is_none() && !r.find.is_null()) || (replace.is_none() && !r.replace.is_null())
                {
                    return Err(DatasetError::invalid(format!(
                        "Can't replace {} with {} in integer column {column:?}",
                        r.find, r.replace
                    )));
                }
                Ok((find, replace))
            })
            .collect::<DatasetResult<Vec<_>>>()?;

        let mut replaced = 0;
        let values: Int64Array = to_i64_values(array)?
            .into_iter()
            .map(|cell| match pairs.iter().find(|(find, _)| *find == cell) {
                Some((_, replace)) => {
                    replaced += 1;
                    *replace
                }
                None => cell,
            })
            .collect();
        Ok((Arc::new(values), replaced))
    }

    fn replace_numeric(
        column: &str,
        array: &ArrayRef,
        replacements: &[Replacement],
    ) -> DatasetResult<(ArrayRef, usize)> {
        let pairs = replacements
            .iter()
            .map(|r| {
                let find = json_to_f64(&r.find);
                let replace = json_to_f64(&r.replace);
                if (find.is_none() && !r.find.is_null()) || (replace.is_none() && !r.replace.is_null())
                {
                    return Err(DatasetError::invalid(format!(
                        "Can't replace {} with {} in numerical column {column:?}",
                        r.find, r.replace
                    )));
                }
                Ok((find, replace))
            })
            .collect::<DatasetResult<Vec<_>>>()?;

        let mut replaced = 0;
        let values: Float64Array = to_f64_values(array)?
            .into_iter()
            .map(|cell| match pairs.iter().find(|(find, _)| *find == cell) {
                Some((_, replace)) => {
                    replaced += 1;
                    *replace
                }
                None => cell,
            })
            .collect();
        Ok((Arc::new(values), replaced))
    }

    fn replace_text(
        array: &ArrayRef,
        replacements: &[Replacement],
    ) -> DatasetResult<(ArrayRef, usize)> {
        let pairs: Vec<(Option<String>, Option<String>)> = replacements
            .iter()
            .map(|r| (json_to_key(&r.find), json_to_key(&r.replace)))
            .collect();

        let mut replaced = 0;
        let values: StringArray = to_string_values(array)?
            .into_iter()
            .map(|cell| match pairs.iter().find(|(find, _)| *find == cell) {
                Some((_, replace)) => {
                    replaced += 1;
                    replace.clone()
                }
                None => cell,
            })
            .collect();
        Ok((Arc::new(values), replaced))
    }
}

impl Mutation for FindAndReplace {
    fn name(&self) -> &'static str {
        "find_and_replace"
    }

    fn referenced_columns(&self) -> Vec<String> {
        self.fill_info.keys().cloned().collect()
    }

    fn validate(&self, metadata: &DatasetMetadata) -> DatasetResult<()> {
        require_non_empty(&self.referenced_columns(), "fill_info")?;
        require_columns(metadata, &self.referenced_columns())
    }

    fn apply(&self, mut frame: Frame, _: &DatasetMetadata) -> DatasetResult<Transformed> {
        let mut counts = BTreeMap::new();

        for (column, replacements) in &self.fill_info {
            let array = frame.column(column)?.clone();
            let original_type = array.data_type().clone();
            let (values, replaced) = if original_type.is_integer() && original_type != DataType::UInt64
            {
                Self::replace_integer(column, &array, replacements)?
            } else if original_type.is_numeric() {
                Self::replace_numeric(column, &array, replacements)?
            } else {
                Self::replace_text(&array, replacements)?
            };
            counts.insert(column.clone(), replaced);

            // Back to the column's own type: a replacement it can't hold is an error
            frame = frame
                .replace_column(column, values)?
                .cast_column(column, &original_type, true)?;
        }

        Ok(Transformed::new(frame, ShapeImpact::ValuesOnly)
            .with_details(json!({ "values_replaced": counts })))
    }
}

/// Target types a column can be converted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    #[serde(alias = "int", alias = "integer")]
    Int64,
    #[serde(alias = "float", alias = "double")]
    Float64,
    #[serde(alias = "str", alias = "object", alias = "utf8")]
    String,
    #[serde(alias = "boolean")]
    Bool,
}

impl TargetType {
    fn data_type(&self) -> DataType {
        match self {
            TargetType::Int64 => DataType::Int64,
            TargetType::Float64 => DataType::Float64,
            TargetType::String => DataType::Utf8,
            TargetType::Bool => DataType::Boolean,
        }
    }
}

/// Strictly convert columns to another type
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeDataType {
    pub col_type_info: BTreeMap<String, TargetType>,
}

impl Mutation for ChangeDataType {
    fn name(&self) -> &'static str {
        "change_data_type"
    }

    fn referenced_columns(&self) -> Vec<String> {
        self.col_type_info.keys().cloned().collect()
    }

    fn validate(&self, metadata: &DatasetMetadata) -> DatasetResult<()> {
        require_non_empty(&self.referenced_columns(), "col_type_info")?;
        require_columns(metadata, &self.referenced_columns())
    }

    fn apply(&self, mut frame: Frame, _: &DatasetMetadata) -> DatasetResult<Transformed> {
        for (column, target) in &self.col_type_info {
            let source = frame.data_type(column)?;
            // Float to integer casts truncate rather than fail
            if *target == TargetType::Int64 && source.is_floating() {
                let lossy = to_f64_values(frame.column(column)?)?
                    .into_iter()
                    .flatten()
                    .any(|x| x.fract() != 0.0);
                if lossy {
                    return Err(DatasetError::invalid(format!(
                        "Column {column:?} has fractional values and can't become int64"
                    )));
                }
            }
            frame = frame.cast_column(column, &target.data_type(), true)?;
        }
        Ok(Transformed::new(frame, ShapeImpact::ColumnsRetyped))
    }
}

/// Move columns between the numerical and categorical classes. Class names parse
/// case-insensitively and `numeric` is accepted for `numerical`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeColumnClass {
    pub col_class_info: BTreeMap<String, String>,
}

impl ChangeColumnClass {
    fn targets(&self) -> DatasetResult<Vec<(&String, ColumnClass)>> {
        self.col_class_info
            .iter()
            .map(|(column, class)| {
                let target = class.parse::<ColumnClass>().map_err(|e: strum::ParseError| {
                    DatasetError::invalid(format!(
                        "Can't move column {column:?} to class {class:?}: {e}"
                    ))
                })?;
                Ok((column, target))
            })
            .collect()
    }
}

impl Mutation for ChangeColumnClass {
    fn name(&self) -> &'static str {
        "change_column_class"
    }

    fn referenced_columns(&self) -> Vec<String> {
        self.col_class_info.keys().cloned().collect()
    }

    fn validate(&self, metadata: &DatasetMetadata) -> DatasetResult<()> {
        require_non_empty(&self.referenced_columns(), "col_class_info")?;
        require_columns(metadata, &self.referenced_columns())?;
        self.targets().map(|_| ())
    }

    fn apply(&self, mut frame: Frame, _: &DatasetMetadata) -> DatasetResult<Transformed> {
        let mut coerced_to_missing = BTreeMap::new();
        for (column, class) in self.targets()? {
            if frame.class_of(column)? == class {
                continue;
            }
            frame = match class {
                ColumnClass::Numerical => {
                    let before = frame.null_count(column)?;
                    let frame = frame.cast_column(column, &DataType::Float64, false)?;
                    coerced_to_missing.insert(column.clone(), frame.null_count(column)? - before);
                    frame
                }
                ColumnClass::Categorical => frame.cast_column(column, &DataType::Utf8, true)?,
            };
        }
        Ok(Transformed::new(frame, ShapeImpact::ColumnsRetyped)
            .with_details(json!({ "coerced_to_missing": coerced_to_missing })))
    }
}
