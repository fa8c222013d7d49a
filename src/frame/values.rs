//! Conversions between Arrow columns and plain Rust / JSON values.

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int64Type};
use serde_json::{Number, Value};

use crate::error::DatasetResult;

/// Column values as floats, with missing (and non-numeric) values as `None`
pub fn to_f64_values(array: &ArrayRef) -> DatasetResult<Vec<Option<f64>>> {
    let floats = cast(array, &DataType::Float64)?;
    Ok(floats
        .as_primitive::<Float64Type>()
        .iter()
        .map(|v| v.filter(|v| !v.is_nan()))
        .collect())
}

/// Integer column values without going through floats
pub fn to_i64_values(array: &ArrayRef) -> DatasetResult<Vec<Option<i64>>> {
    let ints = cast(array, &DataType::Int64)?;
    Ok(ints.as_primitive::<Int64Type>().iter().collect())
}

pub fn to_string_values(array: &ArrayRef) -> DatasetResult<Vec<Option<String>>> {
    let strings = cast(array, &DataType::Utf8)?;
    Ok(strings
        .as_string::<i32>()
        .iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

/// The string a JSON payload value compares equal to. `None` stands for a missing cell.
pub fn json_to_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

pub fn json_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// An integral payload value. `2`, `2.0` and `"2"` all qualify; `2.5` doesn't.
pub fn json_to_i64(value: &Value) -> Option<i64> {
    let exact = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    exact.or_else(|| {
        json_to_f64(value)
            .filter(|x| x.fract() == 0.0 && x.abs() < i64::MAX as f64)
            .map(|x| x as i64)
    })
}

fn float_to_json(value: f64) -> Value {
    Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
}

/// One column rendered as JSON cells
pub fn to_json_values(array: &ArrayRef) -> DatasetResult<Vec<Value>> {
    let values = match array.data_type() {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32 => cast(array, &DataType::Int64)?
            .as_primitive::<Int64Type>()
            .iter()
            .map(|v| v.map(Value::from).unwrap_or(Value::Null))
            .collect(),
        DataType::UInt64
        | DataType::Float16
        | DataType::Float32
        | DataType::Float64
        | DataType::Decimal128(_, _)
        | DataType::Decimal256(_, _) => to_f64_values(array)?
            .into_iter()
            .map(|v| v.map(float_to_json).unwrap_or(Value::Null))
            .collect(),
        DataType::Boolean => array
            .as_boolean()
            .iter()
            .map(|v| v.map(Value::Bool).unwrap_or(Value::Null))
            .collect(),
        _ => to_string_values(array)?
            .into_iter()
            .map(|v| v.map(Value::String).unwrap_or(Value::Null))
            .collect(),
    };
    Ok(values)
}

/// Which cells equal one of `values`. Numeric columns compare numerically, everything else by
/// string form; a JSON `null` matches missing cells.
pub fn value_matches(array: &ArrayRef, values: &[Value]) -> DatasetResult<Vec<bool>> {
    if array.data_type().is_integer() && *array.data_type() != DataType::UInt64 {
        let targets: Vec<Option<i64>> = values
            .iter()
            .filter(|v| v.is_null() || json_to_i64(v).is_some())
            .map(json_to_i64)
            .collect();
        Ok(to_i64_values(array)?
            .into_iter()
            .map(|cell| targets.contains(&cell))
            .collect())
    } else if array.data_type().is_numeric() {
        let targets: Vec<Option<f64>> = values
            .iter()
            .filter(|v| v.is_null() || json_to_f64(v).is_some())
            .map(json_to_f64)
            .collect();
        Ok(to_f64_values(array)?
            .into_iter()
            .map(|cell| targets.contains(&cell))
            .collect())
    } else {
        let targets: Vec<Option<String>> = values.iter().map(json_to_key).collect();
        Ok(to_string_values(array)?
            .into_iter()
            .map(|cell| targets.contains(&cell))
            .collect())
    }
}
