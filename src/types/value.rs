//! Value and `DataType` definitions for vexel.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use arrow::array::{
    new_null_array, Array, ArrayRef, AsArray, BooleanArray, Date32Array, Float32Array,
    Float64Array, Int64Array, StringArray, TimestampMicrosecondArray,
};
use arrow::datatypes::{
    DataType as ArrowDataType, Date32Type, Float32Type, Float64Type, Int32Type, Int64Type,
    TimeUnit, TimestampMicrosecondType,
};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{ExecResult, ExecutionCause};

/// Days between 0001-01-01 (CE day 1) and the Unix epoch.
const EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Supported data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// 64-bit signed integer.
    #[serde(alias = "bigint")]
    Int64,
    /// 32-bit floating point.
    #[serde(alias = "float", alias = "real")]
    Float32,
    /// 64-bit floating point.
    #[serde(alias = "double")]
    Float64,
    /// Boolean.
    #[serde(alias = "boolean")]
    Bool,
    /// UTF-8 string.
    #[serde(alias = "utf8", alias = "varchar")]
    String,
    /// Date (stored as days since epoch).
    Date,
    /// Timestamp (stored as microseconds since epoch).
    Timestamp,
}

impl DataType {
    /// Returns the canonical name of the data type.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Int64 => "INT64",
            DataType::Float32 => "FLOAT32",
            DataType::Float64 => "FLOAT64",
            DataType::Bool => "BOOL",
            DataType::String => "STRING",
            DataType::Date => "DATE",
            DataType::Timestamp => "TIMESTAMP",
        }
    }

    /// Parses a type name as written in plan documents (case-insensitive).
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "int64" | "bigint" => Some(DataType::Int64),
            "float32" | "float" | "real" => Some(DataType::Float32),
            "float64" | "double" => Some(DataType::Float64),
            "bool" | "boolean" => Some(DataType::Bool),
            "string" | "utf8" | "varchar" => Some(DataType::String),
            "date" => Some(DataType::Date),
            "timestamp" => Some(DataType::Timestamp),
            _ => None,
        }
    }

    /// Returns whether this type is numeric.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Int64 | DataType::Float32 | DataType::Float64
        )
    }

    /// Returns whether this type is orderable.
    #[must_use]
    pub fn is_orderable(&self) -> bool {
        matches!(
            self,
            DataType::Int64
                | DataType::Float32
                | DataType::Float64
                | DataType::Bool
                | DataType::String
                | DataType::Date
                | DataType::Timestamp
        )
    }

    /// Returns the common type two operands are coerced to, if any.
    ///
    /// Identical types are their own common type. Numeric types widen
    /// (`Int64` with `Float32` widens to `Float64`).
    #[must_use]
    pub fn common_type(a: DataType, b: DataType) -> Option<DataType> {
        if a == b {
            return Some(a);
        }
        match (a, b) {
            (DataType::Float64, x) | (x, DataType::Float64) if x.is_numeric() => {
                Some(DataType::Float64)
            }
            (DataType::Int64, DataType::Float32) | (DataType::Float32, DataType::Int64) => {
                Some(DataType::Float64)
            }
            _ => None,
        }
    }

    /// Converts to an Arrow data type.
    #[must_use]
    pub fn to_arrow(&self) -> ArrowDataType {
        match self {
            DataType::Int64 => ArrowDataType::Int64,
            DataType::Float32 => ArrowDataType::Float32,
            DataType::Float64 => ArrowDataType::Float64,
            DataType::Bool => ArrowDataType::Boolean,
            DataType::String => ArrowDataType::Utf8,
            DataType::Date => ArrowDataType::Date32,
            DataType::Timestamp => ArrowDataType::Timestamp(TimeUnit::Microsecond, None),
        }
    }

    /// Converts from an Arrow data type.
    ///
    /// Dictionary types map to their value type. Returns None for unsupported
    /// Arrow types.
    #[must_use]
    pub fn from_arrow(arrow_type: &ArrowDataType) -> Option<Self> {
        match arrow_type {
            ArrowDataType::Int64 => Some(DataType::Int64),
            ArrowDataType::Float32 => Some(DataType::Float32),
            ArrowDataType::Float64 => Some(DataType::Float64),
            ArrowDataType::Boolean => Some(DataType::Bool),
            ArrowDataType::Utf8 => Some(DataType::String),
            ArrowDataType::Date32 => Some(DataType::Date),
            ArrowDataType::Timestamp(TimeUnit::Microsecond, None) => Some(DataType::Timestamp),
            ArrowDataType::Dictionary(_, value_type) => Self::from_arrow(value_type),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Runtime value container for data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// 64-bit signed integer value.
    Int64(i64),
    /// 32-bit floating point value.
    Float32(f32),
    /// 64-bit floating point value.
    Float64(f64),
    /// Boolean value.
    Bool(bool),
    /// String value.
    String(String),
    /// Date value (days since Unix epoch).
    Date(i32),
    /// Timestamp value (microseconds since Unix epoch).
    Timestamp(i64),
    /// Null value.
    Null,
}

/// Bit pattern used for float equality and hashing: all NaNs are one value,
/// and `-0.0` equals `0.0`.
fn canonical_f64_bits(v: f64) -> u64 {
    if v.is_nan() {
        f64::NAN.to_bits()
    } else if v == 0.0 {
        0.0f64.to_bits()
    } else {
        v.to_bits()
    }
}

fn canonical_f32_bits(v: f32) -> u32 {
    if v.is_nan() {
        f32::NAN.to_bits()
    } else if v == 0.0 {
        0.0f32.to_bits()
    } else {
        v.to_bits()
    }
}

// Equality is structural, for values used as map keys; SQL comparison
// semantics live in `Value::compare`. Operators compare row encodings.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int64(a), Value::Int64(b)) | (Value::Timestamp(a), Value::Timestamp(b)) => {
                a == b
            }
            (Value::Float32(a), Value::Float32(b)) => canonical_f32_bits(*a) == canonical_f32_bits(*b),
            (Value::Float64(a), Value::Float64(b)) => canonical_f64_bits(*a) == canonical_f64_bits(*b),
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Null, Value::Null) => true,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Int64(v) | Value::Timestamp(v) => v.hash(state),
            Value::Float32(v) => canonical_f32_bits(*v).hash(state),
            Value::Float64(v) => canonical_f64_bits(*v).hash(state),
            Value::Bool(v) => v.hash(state),
            Value::String(v) => v.hash(state),
            Value::Date(v) => v.hash(state),
            Value::Null => {}
        }
    }
}

impl Value {
    /// Returns true if this value is null.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Attempts to extract an i64 value.
    #[must_use]
    pub fn as_int64(&self) -> Option<i64> {
        match self {
            Value::Int64(i) => Some(*i),
            _ => None,
        }
    }

    /// Attempts to extract a string reference.
    #[must_use]
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Attempts to extract an f64 value.
    #[must_use]
    pub fn as_float64(&self) -> Option<f64> {
        match self {
            Value::Float64(f) => Some(*f),
            _ => None,
        }
    }

    /// Attempts to extract a bool value.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the data type of this value, or None for Null.
    #[must_use]
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Int64(_) => Some(DataType::Int64),
            Value::Float32(_) => Some(DataType::Float32),
            Value::Float64(_) => Some(DataType::Float64),
            Value::Bool(_) => Some(DataType::Bool),
            Value::String(_) => Some(DataType::String),
            Value::Date(_) => Some(DataType::Date),
            Value::Timestamp(_) => Some(DataType::Timestamp),
            Value::Null => None,
        }
    }

    /// Compares two values using SQL null semantics.
    ///
    /// Returns None if either value is null or types don't match.
    #[must_use]
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int64(a), Value::Int64(b))
            | (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Float32(a), Value::Float32(b)) => a.partial_cmp(b),
            (Value::Float64(a), Value::Float64(b)) => a.partial_cmp(b),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            // Null or type mismatch
            _ => None,
        }
    }

    /// Parses a textual value of the given type (CSV fields, date literals).
    ///
    /// # Errors
    ///
    /// Returns `InvalidData` if the text is not a valid value of the type.
    pub fn parse(text: &str, data_type: DataType) -> ExecResult<Value> {
        let invalid = || {
            ExecutionCause::InvalidData(format!("cannot parse '{text}' as {data_type}"))
        };
        let trimmed = text.trim();
        match data_type {
            DataType::Int64 => trimmed.parse().map(Value::Int64).map_err(|_| invalid()),
            DataType::Float32 => trimmed.parse().map(Value::Float32).map_err(|_| invalid()),
            DataType::Float64 => trimmed.parse().map(Value::Float64).map_err(|_| invalid()),
            DataType::Bool => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Ok(Value::Bool(true)),
                "false" | "f" | "0" => Ok(Value::Bool(false)),
                _ => Err(invalid()),
            },
            DataType::String => Ok(Value::String(text.to_string())),
            DataType::Date => parse_date(trimmed).map(Value::Date).ok_or_else(invalid),
            DataType::Timestamp => parse_timestamp(trimmed)
                .map(Value::Timestamp)
                .ok_or_else(invalid),
        }
    }

    /// Reads the logical value at `index` of an Arrow array.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` for Arrow types vexel does not model.
    pub fn from_array(array: &dyn Array, index: usize) -> ExecResult<Value> {
        if array.is_null(index) {
            return Ok(Value::Null);
        }
        let value = match array.data_type() {
            ArrowDataType::Int64 => Value::Int64(array.as_primitive::<Int64Type>().value(index)),
            ArrowDataType::Float32 => {
                Value::Float32(array.as_primitive::<Float32Type>().value(index))
            }
            ArrowDataType::Float64 => {
                Value::Float64(array.as_primitive::<Float64Type>().value(index))
            }
            ArrowDataType::Boolean => Value::Bool(array.as_boolean().value(index)),
            ArrowDataType::Utf8 => Value::String(array.as_string::<i32>().value(index).to_string()),
            ArrowDataType::Date32 => Value::Date(array.as_primitive::<Date32Type>().value(index)),
            ArrowDataType::Timestamp(TimeUnit::Microsecond, None) => {
                Value::Timestamp(array.as_primitive::<TimestampMicrosecondType>().value(index))
            }
            ArrowDataType::Dictionary(key, _) if **key == ArrowDataType::Int32 => {
                let dict = array.as_dictionary::<Int32Type>();
                let key = dict.keys().value(index);
                let key = usize::try_from(key).map_err(|_| {
                    ExecutionCause::InvalidData(format!("negative dictionary key {key}"))
                })?;
                return Value::from_array(dict.values().as_ref(), key);
            }
            ArrowDataType::Null => Value::Null,
            other => {
                return Err(ExecutionCause::type_mismatch(
                    "a supported column type",
                    other.to_string(),
                ))
            }
        };
        Ok(value)
    }

    /// Creates an array with this value repeated `len` times.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if a non-null value does not have `data_type`.
    pub fn to_array(&self, data_type: DataType, len: usize) -> ExecResult<ArrayRef> {
        if self.is_null() {
            return Ok(new_null_array(&data_type.to_arrow(), len));
        }
        if self.data_type() != Some(data_type) {
            return Err(self.mismatch(data_type));
        }
        let array: ArrayRef = match self {
            Value::Int64(v) => Arc::new(Int64Array::from(vec![*v; len])),
            Value::Float32(v) => Arc::new(Float32Array::from(vec![*v; len])),
            Value::Float64(v) => Arc::new(Float64Array::from(vec![*v; len])),
            Value::Bool(v) => Arc::new(BooleanArray::from(vec![*v; len])),
            Value::String(v) => Arc::new(StringArray::from(vec![v.as_str(); len])),
            Value::Date(v) => Arc::new(Date32Array::from(vec![*v; len])),
            Value::Timestamp(v) => Arc::new(TimestampMicrosecondArray::from(vec![*v; len])),
            Value::Null => new_null_array(&data_type.to_arrow(), len),
        };
        Ok(array)
    }

    /// Builds an array of `data_type` from a slice of values.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if any non-null value has a different type.
    pub fn build_array(data_type: DataType, values: &[Value]) -> ExecResult<ArrayRef> {
        let array: ArrayRef = match data_type {
            DataType::Int64 => Arc::new(Int64Array::from(collect_typed(values, data_type, |v| {
                match v {
                    Value::Int64(x) => Some(*x),
                    _ => None,
                }
            })?)),
            DataType::Float32 => Arc::new(Float32Array::from(collect_typed(
                values,
                data_type,
                |v| match v {
                    Value::Float32(x) => Some(*x),
                    _ => None,
                },
            )?)),
            DataType::Float64 => Arc::new(Float64Array::from(collect_typed(
                values,
                data_type,
                |v| match v {
                    Value::Float64(x) => Some(*x),
                    _ => None,
                },
            )?)),
            DataType::Bool => Arc::new(BooleanArray::from(collect_typed(values, data_type, |v| {
                match v {
                    Value::Bool(x) => Some(*x),
                    _ => None,
                }
            })?)),
            DataType::String => Arc::new(StringArray::from(collect_typed(
                values,
                data_type,
                |v| match v {
                    Value::String(x) => Some(x.as_str()),
                    _ => None,
                },
            )?)),
            DataType::Date => Arc::new(Date32Array::from(collect_typed(values, data_type, |v| {
                match v {
                    Value::Date(x) => Some(*x),
                    _ => None,
                }
            })?)),
            DataType::Timestamp => Arc::new(TimestampMicrosecondArray::from(collect_typed(
                values,
                data_type,
                |v| match v {
                    Value::Timestamp(x) => Some(*x),
                    _ => None,
                },
            )?)),
        };
        Ok(array)
    }

    fn mismatch(&self, expected: DataType) -> ExecutionCause {
        ExecutionCause::type_mismatch(
            expected.name(),
            self.data_type().map_or("NULL", |t| t.name()),
        )
    }
}

/// Extracts the native representation of each value, keeping nulls.
fn collect_typed<'a, T>(
    values: &'a [Value],
    data_type: DataType,
    extract: impl Fn(&'a Value) -> Option<T>,
) -> ExecResult<Vec<Option<T>>> {
    values
        .iter()
        .map(|v| {
            if v.is_null() {
                Ok(None)
            } else {
                extract(v).map(Some).ok_or_else(|| v.mismatch(data_type))
            }
        })
        .collect()
}

/// Parses an ISO-8601 date into days since the Unix epoch.
#[must_use]
pub fn parse_date(text: &str) -> Option<i32> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .map(|d| d.num_days_from_ce() - EPOCH_DAYS_FROM_CE)
}

/// Parses an ISO-8601 timestamp (`T` or space separated, optional fraction)
/// into microseconds since the Unix epoch.
#[must_use]
pub fn parse_timestamp(text: &str) -> Option<i64> {
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|dt| dt.and_utc().timestamp_micros())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Timestamp(v) => match DateTime::from_timestamp(
                v.div_euclid(1_000_000),
                (v.rem_euclid(1_000_000) * 1_000) as u32,
            ) {
                Some(dt) => write!(f, "{}", dt.naive_utc().format("%Y-%m-%dT%H:%M:%S%.6f")),
                None => write!(f, "{v}"),
            },
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v}"),
            Value::Date(v) => match NaiveDate::from_num_days_from_ce_opt(v + EPOCH_DAYS_FROM_CE) {
                Some(d) => write!(f, "{}", d.format("%Y-%m-%d")),
                None => write!(f, "{v}"),
            },
            Value::Null => f.write_str("null"),
        }
    }
}
