//! Columnar vectors.
//!
//! A [`Vector`] holds a fixed number of values of one logical type in one of
//! three encodings:
//!
//! - `Plain`: an Arrow array, one slot per logical value.
//! - `Constant`: a single value repeated logically `len` times.
//! - `Dictionary`: Int32 keys into an array of dictionary values.
//!
//! Encodings are transparent. [`Vector::decode`] and [`Vector::value_at`]
//! give the same logical values for every encoding; kernels that benefit
//! from an encoding (filter, take, comparisons) work on it directly.

mod batch;

pub use batch::{QueryResult, ResultBatch, RowIter, RowView};

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, BooleanArray, Int32Array, UInt32Array};
use arrow::compute;
use arrow::datatypes::{DataType as ArrowDataType, Int32Type};

use crate::error::{ExecResult, ExecutionCause};
use crate::types::{DataType, Value};

/// Physical representation of a vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Plain,
    Constant,
    Dictionary,
}

impl Encoding {
    /// Returns the lower-case name of the encoding.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Plain => "plain",
            Encoding::Constant => "constant",
            Encoding::Dictionary => "dictionary",
        }
    }
}

/// Encoded storage of a vector.
#[derive(Debug, Clone)]
pub enum VectorData {
    /// One Arrow slot per logical value.
    Plain(ArrayRef),
    /// A single value repeated `len` times.
    Constant { value: Value, len: usize },
    /// Logical value `i` is `values[keys[i]]`; a null key is a null value.
    Dictionary { keys: Int32Array, values: ArrayRef },
}

/// A typed column of values with a fixed length.
#[derive(Debug, Clone)]
pub struct Vector {
    data_type: DataType,
    data: VectorData,
}

impl Vector {
    /// Wraps an Arrow array.
    ///
    /// Arrow dictionary arrays become dictionary vectors (keys are cast to
    /// Int32 when needed).
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` for Arrow types vexel does not model.
    pub fn plain(array: ArrayRef) -> ExecResult<Self> {
        let data_type = DataType::from_arrow(array.data_type()).ok_or_else(|| {
            ExecutionCause::type_mismatch("a supported column type", array.data_type().to_string())
        })?;

        if let ArrowDataType::Dictionary(key_type, value_type) = array.data_type() {
            let array = if **key_type == ArrowDataType::Int32 {
                array
            } else {
                let target = ArrowDataType::Dictionary(
                    Box::new(ArrowDataType::Int32),
                    value_type.clone(),
                );
                compute::cast(array.as_ref(), &target)?
            };
            let dict = array.as_dictionary::<Int32Type>();
            return Vector::dictionary(dict.keys().clone(), Arc::clone(dict.values()));
        }

        Ok(Vector {
            data_type,
            data: VectorData::Plain(array),
        })
    }

    /// Creates a constant vector.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if a non-null value does not have `data_type`.
    pub fn constant(value: Value, data_type: DataType, len: usize) -> ExecResult<Self> {
        if let Some(actual) = value.data_type() {
            if actual != data_type {
                return Err(ExecutionCause::type_mismatch(data_type.name(), actual.name()));
            }
        }
        Ok(Vector {
            data_type,
            data: VectorData::Constant { value, len },
        })
    }

    /// Creates a dictionary vector from keys and dictionary values.
    ///
    /// # Errors
    ///
    /// Returns an error if the values are not a supported plain type or a
    /// key is out of range.
    pub fn dictionary(keys: Int32Array, values: ArrayRef) -> ExecResult<Self> {
        let data_type = match values.data_type() {
            ArrowDataType::Dictionary(_, _) => None,
            other => DataType::from_arrow(other),
        }
        .ok_or_else(|| {
            ExecutionCause::type_mismatch(
                "a supported dictionary value type",
                values.data_type().to_string(),
            )
        })?;

        let dict_len = values.len();
        if let Some(bad) = keys
            .iter()
            .flatten()
            .find(|k| usize::try_from(*k).map_or(true, |k| k >= dict_len))
        {
            return Err(ExecutionCause::InvalidData(format!(
                "dictionary key {bad} out of range for {dict_len} values"
            )));
        }

        Ok(Vector {
            data_type,
            data: VectorData::Dictionary { keys, values },
        })
    }

    /// Dictionary-encodes a plain array.
    ///
    /// # Errors
    ///
    /// Returns an error if Arrow cannot dictionary-encode the array's type.
    pub fn dictionary_encode(array: &dyn Array) -> ExecResult<Self> {
        let target = ArrowDataType::Dictionary(
            Box::new(ArrowDataType::Int32),
            Box::new(array.data_type().clone()),
        );
        let encoded = compute::cast(array, &target)?;
        let dict = encoded.as_dictionary::<Int32Type>();
        Vector::dictionary(dict.keys().clone(), Arc::clone(dict.values()))
    }

    /// Creates a vector of `len` nulls.
    #[must_use]
    pub fn nulls(data_type: DataType, len: usize) -> Self {
        Vector {
            data_type,
            data: VectorData::Constant {
                value: Value::Null,
                len,
            },
        }
    }

    /// Returns the logical type.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Returns the encoding.
    #[must_use]
    pub fn encoding(&self) -> Encoding {
        match self.data {
            VectorData::Plain(_) => Encoding::Plain,
            VectorData::Constant { .. } => Encoding::Constant,
            VectorData::Dictionary { .. } => Encoding::Dictionary,
        }
    }

    /// Returns the encoded storage.
    #[must_use]
    pub fn data(&self) -> &VectorData {
        &self.data
    }

    /// Returns the logical length.
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.data {
            VectorData::Plain(array) => array.len(),
            VectorData::Constant { len, .. } => *len,
            VectorData::Dictionary { keys, .. } => keys.len(),
        }
    }

    /// Returns true if the vector has no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the constant value if this is a constant vector.
    #[must_use]
    pub fn as_constant(&self) -> Option<&Value> {
        match &self.data {
            VectorData::Constant { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Materializes the logical values as a plain Arrow array.
    ///
    /// Plain vectors return their array without copying.
    ///
    /// # Errors
    ///
    /// Returns an error if the Arrow take kernel fails.
    pub fn decode(&self) -> ExecResult<ArrayRef> {
        match &self.data {
            VectorData::Plain(array) => Ok(Arc::clone(array)),
            VectorData::Constant { value, len } => value.to_array(self.data_type, *len),
            VectorData::Dictionary { keys, values } => Ok(compute::take(values.as_ref(), keys, None)?),
        }
    }

    /// Reads the logical value at `index`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidData` if `index` is out of bounds.
    pub fn value_at(&self, index: usize) -> ExecResult<Value> {
        if index >= self.len() {
            return Err(ExecutionCause::InvalidData(format!(
                "index {index} out of bounds for vector of length {}",
                self.len()
            )));
        }
        match &self.data {
            VectorData::Plain(array) => Value::from_array(array.as_ref(), index),
            VectorData::Constant { value, .. } => Ok(value.clone()),
            VectorData::Dictionary { keys, values } => {
                if keys.is_null(index) {
                    return Ok(Value::Null);
                }
                Value::from_array(values.as_ref(), keys.value(index) as usize)
            }
        }
    }

    /// Returns true if the logical value at `index` is null.
    #[must_use]
    pub fn is_null(&self, index: usize) -> bool {
        match &self.data {
            VectorData::Plain(array) => array.is_null(index),
            VectorData::Constant { value, .. } => value.is_null(),
            VectorData::Dictionary { keys, values } => {
                keys.is_null(index) || values.is_null(keys.value(index) as usize)
            }
        }
    }

    /// Returns the number of null logical values.
    #[must_use]
    pub fn null_count(&self) -> usize {
        match &self.data {
            VectorData::Plain(array) => array.null_count(),
            VectorData::Constant { value, len } => {
                if value.is_null() {
                    *len
                } else {
                    0
                }
            }
            VectorData::Dictionary { keys, values } => keys
                .iter()
                .filter(|k| k.map_or(true, |k| values.is_null(k as usize)))
                .count(),
        }
    }

    /// Returns a zero-copy slice of the vector.
    #[must_use]
    pub fn slice(&self, offset: usize, len: usize) -> Self {
        let data = match &self.data {
            VectorData::Plain(array) => VectorData::Plain(array.slice(offset, len)),
            VectorData::Constant { value, .. } => VectorData::Constant {
                value: value.clone(),
                len,
            },
            VectorData::Dictionary { keys, values } => VectorData::Dictionary {
                keys: keys.slice(offset, len),
                values: Arc::clone(values),
            },
        };
        Vector {
            data_type: self.data_type,
            data,
        }
    }

    /// Keeps the positions where `predicate` is true (null counts as false).
    ///
    /// The encoding is preserved: dictionary keys are filtered against the
    /// shared dictionary, constants only change length.
    ///
    /// # Errors
    ///
    /// Returns an error if the Arrow filter kernel fails.
    pub fn filter(&self, predicate: &BooleanArray) -> ExecResult<Self> {
        let data = match &self.data {
            VectorData::Plain(array) => VectorData::Plain(compute::filter(array.as_ref(), predicate)?),
            VectorData::Constant { value, .. } => VectorData::Constant {
                value: value.clone(),
                len: predicate.true_count(),
            },
            VectorData::Dictionary { keys, values } => {
                let filtered = compute::filter(keys, predicate)?;
                VectorData::Dictionary {
                    keys: filtered.as_primitive::<Int32Type>().clone(),
                    values: Arc::clone(values),
                }
            }
        };
        Ok(Vector {
            data_type: self.data_type,
            data,
        })
    }

    /// Gathers the positions in `indices`; a null index produces a null value.
    ///
    /// # Errors
    ///
    /// Returns an error if an index is out of bounds.
    pub fn take(&self, indices: &UInt32Array) -> ExecResult<Self> {
        let data = match &self.data {
            VectorData::Plain(array) => {
                VectorData::Plain(compute::take(array.as_ref(), indices, None)?)
            }
            VectorData::Constant { value, len } => {
                if let Some(bad) = indices.iter().flatten().find(|i| *i as usize >= *len) {
                    return Err(ExecutionCause::InvalidData(format!(
                        "take index {bad} out of bounds for length {len}"
                    )));
                }
                if indices.null_count() > 0 && !value.is_null() {
                    let array = value.to_array(self.data_type, *len)?;
                    VectorData::Plain(compute::take(array.as_ref(), indices, None)?)
                } else {
                    VectorData::Constant {
                        value: value.clone(),
                        len: indices.len(),
                    }
                }
            }
            VectorData::Dictionary { keys, values } => {
                let taken = compute::take(keys, indices, None)?;
                VectorData::Dictionary {
                    keys: taken.as_primitive::<Int32Type>().clone(),
                    values: Arc::clone(values),
                }
            }
        };
        Ok(Vector {
            data_type: self.data_type,
            data,
        })
    }

    /// Approximate heap size of the encoded data in bytes.
    #[must_use]
    pub fn memory_size(&self) -> usize {
        match &self.data {
            VectorData::Plain(array) => array.get_array_memory_size(),
            VectorData::Constant { value, .. } => match value {
                Value::String(s) => s.len() + std::mem::size_of::<Value>(),
                _ => std::mem::size_of::<Value>(),
            },
            VectorData::Dictionary { keys, values } => {
                keys.get_array_memory_size() + values.get_array_memory_size()
            }
        }
    }
}
