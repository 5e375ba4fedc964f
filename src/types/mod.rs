//! Scalar types and values.

mod value;

pub use value::{parse_date, parse_timestamp, DataType, Value};
