//! Binder module for semantic analysis of plan expressions.
//!
//! The binder turns the expression parts of a plan document into typed
//! [`BoundExpression`] trees, resolving:
//! - Column references against the input schema
//! - Function names and their arities
//! - Operand types, inserting casts for numeric coercion
//!
//! Errors are [`BindError`]s without location; the plan deserializer attaches
//! the JSON path of the offending expression.

mod expression;
mod scope;

pub use expression::{
    AggregateExpr, AggregateFunction, ArithmeticOp, BoundExpression, ComparisonOp, LogicalOp,
};
pub use scope::{BinderScope, ColumnRef};

use thiserror::Error;

use crate::catalog::Schema;
use crate::types::{DataType, Value};

/// Errors that can occur during binding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    #[error("ambiguous column reference '{0}'")]
    AmbiguousColumn(String),

    #[error("column index {index} out of range for {len} columns")]
    ColumnIndexOutOfRange { index: usize, len: usize },

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("unknown aggregate function '{0}'")]
    UnknownAggregate(String),

    #[error("function '{function}' expects {expected} argument(s), got {actual}")]
    WrongArity {
        function: String,
        expected: String,
        actual: usize,
    },

    /// A specific argument has the wrong type.
    #[error("argument {index} of '{function}' must be {expected}, got {actual}")]
    ArgumentType {
        function: String,
        index: usize,
        expected: String,
        actual: DataType,
    },

    #[error("cannot apply '{function}' to {left} and {right}")]
    IncompatibleTypes {
        function: String,
        left: DataType,
        right: DataType,
    },

    #[error("null literal requires an explicit type")]
    NullLiteralNeedsType,

    #[error("invalid literal: {0}")]
    InvalidLiteral(String),

    #[error("cannot cast {from} to {to}")]
    InvalidCast { from: DataType, to: DataType },

    #[error("predicate must be BOOL, got {0}")]
    PredicateNotBoolean(DataType),
}

impl BindError {
    /// Returns the argument position the error refers to, if any.
    #[must_use]
    pub fn argument_index(&self) -> Option<usize> {
        match self {
            BindError::ArgumentType { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Returns whether a value of type `from` can be cast to `to`.
#[must_use]
pub fn can_cast(from: DataType, to: DataType) -> bool {
    use DataType::{Bool, Date, Float32, Float64, Int64, String, Timestamp};
    match (from, to) {
        _ if from == to => true,
        (_, String) | (String, _) => true,
        (Int64 | Float32 | Float64 | Bool, Int64 | Float32 | Float64 | Bool) => true,
        (Date, Timestamp) | (Timestamp, Date) => true,
        _ => false,
    }
}

/// Binds expressions against one input schema.
#[derive(Debug, Clone, Copy)]
pub struct ExpressionBinder<'a> {
    scope: BinderScope<'a>,
}

impl<'a> ExpressionBinder<'a> {
    /// Creates a binder whose column references resolve against `schema`.
    #[must_use]
    pub fn new(schema: &'a Schema) -> Self {
        ExpressionBinder {
            scope: BinderScope::new(schema),
        }
    }

    /// Resolves a column reference.
    ///
    /// # Errors
    ///
    /// See [`BinderScope::resolve`].
    pub fn column(&self, column: &ColumnRef) -> Result<BoundExpression, BindError> {
        self.scope.resolve(column)
    }

    /// Binds a literal. Without an explicit type, the type follows the JSON
    /// value: integers are INT64, other numbers FLOAT64.
    ///
    /// # Errors
    ///
    /// Returns an error for untyped nulls and values that do not fit the type.
    pub fn literal(
        &self,
        json: &serde_json::Value,
        data_type: Option<DataType>,
    ) -> Result<BoundExpression, BindError> {
        let (value, data_type) = literal_value(json, data_type)?;
        Ok(BoundExpression::literal(value, data_type))
    }

    /// Binds a cast.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCast` if the conversion is not supported.
    pub fn cast(
        &self,
        operand: BoundExpression,
        data_type: DataType,
    ) -> Result<BoundExpression, BindError> {
        let from = operand.data_type();
        if !can_cast(from, data_type) {
            return Err(BindError::InvalidCast {
                from,
                to: data_type,
            });
        }
        if from == data_type {
            return Ok(operand);
        }
        Ok(BoundExpression::Cast {
            operand: Box::new(operand),
            data_type,
        })
    }

    /// Binds a scalar function call.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown functions, wrong arity and operand types
    /// the function does not accept.
    pub fn call(
        &self,
        function: &str,
        args: Vec<BoundExpression>,
    ) -> Result<BoundExpression, BindError> {
        let name = function.to_ascii_lowercase();
        match name.as_str() {
            "eq" | "equal" => comparison(&name, ComparisonOp::Eq, args),
            "neq" | "not_equal" => comparison(&name, ComparisonOp::Neq, args),
            "lt" => comparison(&name, ComparisonOp::Lt, args),
            "lte" => comparison(&name, ComparisonOp::Lte, args),
            "gt" => comparison(&name, ComparisonOp::Gt, args),
            "gte" => comparison(&name, ComparisonOp::Gte, args),
            "and" => logical(&name, LogicalOp::And, args),
            "or" => logical(&name, LogicalOp::Or, args),
            "not" => logical(&name, LogicalOp::Not, args),
            "add" => arithmetic(&name, ArithmeticOp::Add, args),
            "sub" | "subtract" => arithmetic(&name, ArithmeticOp::Sub, args),
            "mul" | "multiply" => arithmetic(&name, ArithmeticOp::Mul, args),
            "div" | "divide" => arithmetic(&name, ArithmeticOp::Div, args),
            "mod" | "modulus" => arithmetic(&name, ArithmeticOp::Mod, args),
            "is_null" | "is_not_null" => {
                let [operand] = exact_args::<1>(&name, args)?;
                Ok(BoundExpression::IsNull {
                    operand: Box::new(operand),
                    negated: name == "is_not_null",
                })
            }
            "coalesce" => coalesce(&name, args),
            _ => Err(BindError::UnknownFunction(function.to_string())),
        }
    }

    /// Binds an aggregate call.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown functions, a missing argument where one
    /// is required, or an argument type the function does not accept.
    pub fn aggregate(
        &self,
        name: impl Into<String>,
        function: &str,
        arg: Option<BoundExpression>,
    ) -> Result<AggregateExpr, BindError> {
        let func = AggregateFunction::from_name(function)
            .ok_or_else(|| BindError::UnknownAggregate(function.to_string()))?;
        match &arg {
            None if func != AggregateFunction::Count => {
                return Err(BindError::WrongArity {
                    function: function.to_string(),
                    expected: "1".into(),
                    actual: 0,
                });
            }
            Some(expr) if !func.accepts(expr.data_type()) => {
                let expected = match func {
                    AggregateFunction::Sum | AggregateFunction::Avg => "numeric",
                    _ => "orderable",
                };
                return Err(BindError::ArgumentType {
                    function: function.to_string(),
                    index: 0,
                    expected: expected.into(),
                    actual: expr.data_type(),
                });
            }
            _ => {}
        }
        Ok(AggregateExpr {
            name: name.into(),
            function: func,
            arg,
        })
    }

    /// Checks that an expression can be used as a filter predicate.
    ///
    /// # Errors
    ///
    /// Returns `PredicateNotBoolean` for non-boolean expressions.
    pub fn predicate(&self, expr: BoundExpression) -> Result<BoundExpression, BindError> {
        match expr.data_type() {
            DataType::Bool => Ok(expr),
            other => Err(BindError::PredicateNotBoolean(other)),
        }
    }
}

fn exact_args<const N: usize>(
    function: &str,
    args: Vec<BoundExpression>,
) -> Result<[BoundExpression; N], BindError> {
    let actual = args.len();
    args.try_into().map_err(|_| BindError::WrongArity {
        function: function.to_string(),
        expected: N.to_string(),
        actual,
    })
}

fn comparison(
    function: &str,
    op: ComparisonOp,
    args: Vec<BoundExpression>,
) -> Result<BoundExpression, BindError> {
    let [left, right] = exact_args::<2>(function, args)?;
    let (lt, rt) = (left.data_type(), right.data_type());
    let common = DataType::common_type(lt, rt).ok_or_else(|| BindError::IncompatibleTypes {
        function: function.to_string(),
        left: lt,
        right: rt,
    })?;
    Ok(BoundExpression::comparison(
        left.cast_to(common),
        op,
        right.cast_to(common),
    ))
}

fn logical(
    function: &str,
    op: LogicalOp,
    args: Vec<BoundExpression>,
) -> Result<BoundExpression, BindError> {
    let arity_ok = match op {
        LogicalOp::Not => args.len() == 1,
        LogicalOp::And | LogicalOp::Or => args.len() >= 2,
    };
    if !arity_ok {
        return Err(BindError::WrongArity {
            function: function.to_string(),
            expected: if op == LogicalOp::Not { "1" } else { "at least 2" }.into(),
            actual: args.len(),
        });
    }
    if let Some((index, arg)) = args
        .iter()
        .enumerate()
        .find(|(_, a)| a.data_type() != DataType::Bool)
    {
        return Err(BindError::ArgumentType {
            function: function.to_string(),
            index,
            expected: DataType::Bool.name().into(),
            actual: arg.data_type(),
        });
    }
    Ok(BoundExpression::Logical { op, operands: args })
}

fn arithmetic(
    function: &str,
    op: ArithmeticOp,
    args: Vec<BoundExpression>,
) -> Result<BoundExpression, BindError> {
    let [left, right] = exact_args::<2>(function, args)?;
    for (index, arg) in [&left, &right].into_iter().enumerate() {
        if !arg.data_type().is_numeric() {
            return Err(BindError::ArgumentType {
                function: function.to_string(),
                index,
                expected: "numeric".into(),
                actual: arg.data_type(),
            });
        }
    }
    let (lt, rt) = (left.data_type(), right.data_type());
    let data_type = DataType::common_type(lt, rt).ok_or_else(|| BindError::IncompatibleTypes {
        function: function.to_string(),
        left: lt,
        right: rt,
    })?;
    Ok(BoundExpression::Arithmetic {
        left: Box::new(left.cast_to(data_type)),
        op,
        right: Box::new(right.cast_to(data_type)),
        data_type,
    })
}

fn coalesce(function: &str, args: Vec<BoundExpression>) -> Result<BoundExpression, BindError> {
    let Some(first) = args.first() else {
        return Err(BindError::WrongArity {
            function: function.to_string(),
            expected: "at least 1".into(),
            actual: 0,
        });
    };
    let mut data_type = first.data_type();
    for (index, arg) in args.iter().enumerate().skip(1) {
        data_type = DataType::common_type(data_type, arg.data_type()).ok_or_else(|| {
            BindError::ArgumentType {
                function: function.to_string(),
                index,
                expected: data_type.name().into(),
                actual: arg.data_type(),
            }
        })?;
    }
    Ok(BoundExpression::Coalesce {
        operands: args.into_iter().map(|a| a.cast_to(data_type)).collect(),
        data_type,
    })
}

/// Converts a JSON scalar into a value, optionally of an explicit type.
///
/// # Errors
///
/// Returns an error for untyped nulls, arrays/objects, and values that do
/// not fit the requested type.
pub fn literal_value(
    json: &serde_json::Value,
    data_type: Option<DataType>,
) -> Result<(Value, DataType), BindError> {
    use serde_json::Value as Json;

    let Some(data_type) = data_type else {
        return match json {
            Json::Null => Err(BindError::NullLiteralNeedsType),
            Json::Bool(b) => Ok((Value::Bool(*b), DataType::Bool)),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Ok((Value::Int64(i), DataType::Int64)),
                None => n
                    .as_f64()
                    .map(|f| (Value::Float64(f), DataType::Float64))
                    .ok_or_else(|| BindError::InvalidLiteral(format!("number {n} out of range"))),
            },
            Json::String(s) => Ok((Value::String(s.clone()), DataType::String)),
            Json::Array(_) | Json::Object(_) => Err(BindError::InvalidLiteral(format!(
                "expected a scalar, got {json}"
            ))),
        };
    };

    let invalid = || BindError::InvalidLiteral(format!("{json} is not a valid {data_type}"));
    let value = match (data_type, json) {
        (_, Json::Null) => Value::Null,
        (_, Json::String(s)) => Value::parse(s, data_type).map_err(|_| invalid())?,
        (DataType::Int64, Json::Number(n)) => Value::Int64(n.as_i64().ok_or_else(invalid)?),
        (DataType::Float32, Json::Number(n)) => Value::Float32(n.as_f64().ok_or_else(invalid)? as f32),
        (DataType::Float64, Json::Number(n)) => Value::Float64(n.as_f64().ok_or_else(invalid)?),
        (DataType::Date, Json::Number(n)) => Value::Date(
            n.as_i64()
                .and_then(|d| i32::try_from(d).ok())
                .ok_or_else(invalid)?,
        ),
        (DataType::Timestamp, Json::Number(n)) => Value::Timestamp(n.as_i64().ok_or_else(invalid)?),
        (DataType::Bool, Json::Bool(b)) => Value::Bool(*b),
        _ => return Err(invalid()),
    };
    Ok((value, data_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnDef;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new(vec![
            ColumnDef::new("i", DataType::Int64).with_nullable(false),
            ColumnDef::new("f", DataType::Float32),
            ColumnDef::new("s", DataType::String),
            ColumnDef::new("b", DataType::Bool),
        ])
    }

    fn col(binder: &ExpressionBinder<'_>, name: &str) -> BoundExpression {
        binder.column(&ColumnRef::Name(name.into())).unwrap()
    }

    #[test]
    fn test_int_float32_comparison_widens_to_float64() {
        let schema = schema();
        let binder = ExpressionBinder::new(&schema);
        let expr = binder
            .call("lt", vec![col(&binder, "i"), col(&binder, "f")])
            .unwrap();
        let BoundExpression::Comparison { left, right, .. } = expr else {
            panic!("expected comparison");
        };
        assert_eq!(left.data_type(), DataType::Float64);
        assert_eq!(right.data_type(), DataType::Float64);
    }

    #[test]
    fn test_arithmetic_rejects_string_argument() {
        let schema = schema();
        let binder = ExpressionBinder::new(&schema);
        let err = binder
            .call("add", vec![col(&binder, "i"), col(&binder, "s")])
            .unwrap_err();
        assert_eq!(err.argument_index(), Some(1));
    }

    #[test]
    fn test_comparison_of_string_and_int_fails() {
        let schema = schema();
        let binder = ExpressionBinder::new(&schema);
        let err = binder
            .call("equal", vec![col(&binder, "s"), col(&binder, "i")])
            .unwrap_err();
        assert!(matches!(err, BindError::IncompatibleTypes { .. }));
    }

    #[test]
    fn test_unknown_function() {
        let schema = schema();
        let binder = ExpressionBinder::new(&schema);
        assert_eq!(
            binder.call("frob", vec![]).unwrap_err(),
            BindError::UnknownFunction("frob".into())
        );
    }

    #[test]
    fn test_logical_requires_bool() {
        let schema = schema();
        let binder = ExpressionBinder::new(&schema);
        let err = binder
            .call("and", vec![col(&binder, "b"), col(&binder, "i")])
            .unwrap_err();
        assert_eq!(err.argument_index(), Some(1));
        assert!(binder.call("not", vec![col(&binder, "b")]).is_ok());
        assert!(binder.call("or", vec![col(&binder, "b")]).is_err());
    }

    #[test]
    fn test_literal_typing() {
        assert_eq!(
            literal_value(&json!(3), None).unwrap(),
            (Value::Int64(3), DataType::Int64)
        );
        assert_eq!(
            literal_value(&json!(1.5), None).unwrap(),
            (Value::Float64(1.5), DataType::Float64)
        );
        assert_eq!(
            literal_value(&json!(null), None).unwrap_err(),
            BindError::NullLiteralNeedsType
        );
        assert_eq!(
            literal_value(&json!(null), Some(DataType::String)).unwrap(),
            (Value::Null, DataType::String)
        );
        assert_eq!(
            literal_value(&json!("1970-01-02"), Some(DataType::Date)).unwrap(),
            (Value::Date(1), DataType::Date)
        );
        assert_eq!(
            literal_value(&json!(2), Some(DataType::Float64)).unwrap(),
            (Value::Float64(2.0), DataType::Float64)
        );
        assert!(literal_value(&json!(true), Some(DataType::Int64)).is_err());
    }

    #[test]
    fn test_aggregate_binding() {
        let schema = schema();
        let binder = ExpressionBinder::new(&schema);
        let count_all = binder.aggregate("n", "count", None).unwrap();
        assert_eq!(count_all.data_type(), DataType::Int64);
        assert!(binder.aggregate("t", "sum", None).is_err());
        assert!(binder
            .aggregate("t", "sum", Some(col(&binder, "s")))
            .is_err());
        let max = binder.aggregate("m", "max", Some(col(&binder, "s"))).unwrap();
        assert_eq!(max.data_type(), DataType::String);
        assert!(matches!(
            binder.aggregate("x", "median", None),
            Err(BindError::UnknownAggregate(_))
        ));
    }

    #[test]
    fn test_coalesce_common_type() {
        let schema = schema();
        let binder = ExpressionBinder::new(&schema);
        let lit = binder.literal(&json!(0), None).unwrap();
        let expr = binder.call("coalesce", vec![col(&binder, "f"), lit]).unwrap();
        assert_eq!(expr.data_type(), DataType::Float64);
        assert!(!expr.nullable());
    }

    #[test]
    fn test_cast_rules() {
        assert!(can_cast(DataType::String, DataType::Date));
        assert!(can_cast(DataType::Int64, DataType::Float32));
        assert!(!can_cast(DataType::Date, DataType::Int64));
    }
}
