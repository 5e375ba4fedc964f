//! Bound expression definitions.

use std::fmt;

use crate::types::{DataType, Value};

/// Bound expression after name resolution and type checking.
///
/// Operands of comparisons and arithmetic already have a common type: the
/// binder inserts [`BoundExpression::Cast`] nodes where coercion is needed.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundExpression {
    /// Reference to an input column by position.
    Column {
        index: usize,
        name: String,
        data_type: DataType,
        nullable: bool,
    },

    /// Literal value (constant).
    Literal { value: Value, data_type: DataType },

    /// Binary comparison.
    Comparison {
        left: Box<BoundExpression>,
        op: ComparisonOp,
        right: Box<BoundExpression>,
    },

    /// Logical AND/OR over two or more operands, or NOT over one.
    Logical {
        op: LogicalOp,
        operands: Vec<BoundExpression>,
    },

    /// Arithmetic operations.
    Arithmetic {
        left: Box<BoundExpression>,
        op: ArithmeticOp,
        right: Box<BoundExpression>,
        data_type: DataType,
    },

    /// IS NULL / IS NOT NULL.
    IsNull {
        operand: Box<BoundExpression>,
        negated: bool,
    },

    /// First non-null operand.
    Coalesce {
        operands: Vec<BoundExpression>,
        data_type: DataType,
    },

    /// Conversion to another type.
    Cast {
        operand: Box<BoundExpression>,
        data_type: DataType,
    },
}

impl BoundExpression {
    /// Returns the data type of this expression.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        match self {
            BoundExpression::Column { data_type, .. }
            | BoundExpression::Literal { data_type, .. }
            | BoundExpression::Arithmetic { data_type, .. }
            | BoundExpression::Coalesce { data_type, .. }
            | BoundExpression::Cast { data_type, .. } => *data_type,
            BoundExpression::Comparison { .. }
            | BoundExpression::Logical { .. }
            | BoundExpression::IsNull { .. } => DataType::Bool,
        }
    }

    /// Returns whether the expression can evaluate to null.
    #[must_use]
    pub fn nullable(&self) -> bool {
        match self {
            BoundExpression::Column { nullable, .. } => *nullable,
            BoundExpression::Literal { value, .. } => value.is_null(),
            BoundExpression::Comparison { left, right, .. }
            | BoundExpression::Arithmetic { left, right, .. } => left.nullable() || right.nullable(),
            BoundExpression::Logical { operands, .. } => operands.iter().any(Self::nullable),
            BoundExpression::IsNull { .. } => false,
            BoundExpression::Coalesce { operands, .. } => operands.iter().all(Self::nullable),
            BoundExpression::Cast { operand, .. } => operand.nullable(),
        }
    }

    /// Returns true if the expression references no input column.
    #[must_use]
    pub fn is_constant(&self) -> bool {
        match self {
            BoundExpression::Column { .. } => false,
            BoundExpression::Literal { .. } => true,
            BoundExpression::Comparison { left, right, .. }
            | BoundExpression::Arithmetic { left, right, .. } => {
                left.is_constant() && right.is_constant()
            }
            BoundExpression::Logical { operands, .. }
            | BoundExpression::Coalesce { operands, .. } => operands.iter().all(Self::is_constant),
            BoundExpression::IsNull { operand, .. } | BoundExpression::Cast { operand, .. } => {
                operand.is_constant()
            }
        }
    }

    /// Creates a literal expression of an explicit type.
    #[must_use]
    pub fn literal(value: Value, data_type: DataType) -> Self {
        BoundExpression::Literal { value, data_type }
    }

    /// Creates a column reference.
    pub fn column(index: usize, name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        BoundExpression::Column {
            index,
            name: name.into(),
            data_type,
            nullable,
        }
    }

    /// Creates a comparison expression.
    #[must_use]
    pub fn comparison(left: BoundExpression, op: ComparisonOp, right: BoundExpression) -> Self {
        BoundExpression::Comparison {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    /// Creates a logical AND expression.
    #[must_use]
    pub fn and(operands: Vec<BoundExpression>) -> Self {
        BoundExpression::Logical {
            op: LogicalOp::And,
            operands,
        }
    }

    /// Creates a logical OR expression.
    #[must_use]
    pub fn or(operands: Vec<BoundExpression>) -> Self {
        BoundExpression::Logical {
            op: LogicalOp::Or,
            operands,
        }
    }

    /// Creates a logical NOT expression.
    #[must_use]
    pub fn not(operand: BoundExpression) -> Self {
        BoundExpression::Logical {
            op: LogicalOp::Not,
            operands: vec![operand],
        }
    }

    /// Wraps the expression in a cast unless it already has `data_type`.
    #[must_use]
    pub fn cast_to(self, data_type: DataType) -> Self {
        if self.data_type() == data_type {
            self
        } else {
            BoundExpression::Cast {
                operand: Box::new(self),
                data_type,
            }
        }
    }
}

impl fmt::Display for BoundExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundExpression::Column { name, .. } => write!(f, "{name}"),
            BoundExpression::Literal { value, .. } => match value {
                Value::String(s) => write!(f, "'{s}'"),
                other => write!(f, "{other}"),
            },
            BoundExpression::Comparison { left, op, right } => {
                write!(f, "({left} {} {right})", op.as_str())
            }
            BoundExpression::Logical { op, operands } => match op {
                LogicalOp::Not => write!(f, "NOT {}", operands[0]),
                LogicalOp::And | LogicalOp::Or => {
                    let sep = if *op == LogicalOp::And { " AND " } else { " OR " };
                    let parts: Vec<String> = operands.iter().map(ToString::to_string).collect();
                    write!(f, "({})", parts.join(sep))
                }
            },
            BoundExpression::Arithmetic {
                left, op, right, ..
            } => write!(f, "({left} {} {right})", op.as_str()),
            BoundExpression::IsNull { operand, negated } => {
                if *negated {
                    write!(f, "{operand} IS NOT NULL")
                } else {
                    write!(f, "{operand} IS NULL")
                }
            }
            BoundExpression::Coalesce { operands, .. } => {
                let parts: Vec<String> = operands.iter().map(ToString::to_string).collect();
                write!(f, "coalesce({})", parts.join(", "))
            }
            BoundExpression::Cast { operand, data_type } => {
                write!(f, "CAST({operand} AS {data_type})")
            }
        }
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    /// Equal (=).
    Eq,
    /// Not equal (<>).
    Neq,
    /// Less than (<).
    Lt,
    /// Less than or equal (<=).
    Lte,
    /// Greater than (>).
    Gt,
    /// Greater than or equal (>=).
    Gte,
}

impl ComparisonOp {
    /// Returns the string representation of this operator.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Neq => "<>",
            ComparisonOp::Lt => "<",
            ComparisonOp::Lte => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Gte => ">=",
        }
    }
}

/// Logical operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Not,
}

/// Arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithmeticOp {
    /// Returns the string representation of this operator.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Sub => "-",
            ArithmeticOp::Mul => "*",
            ArithmeticOp::Div => "/",
            ArithmeticOp::Mod => "%",
        }
    }
}

/// Aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    CountDistinct,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    /// Looks up an aggregate function by its plan-document name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "count" => Some(AggregateFunction::Count),
            "count_distinct" => Some(AggregateFunction::CountDistinct),
            "sum" => Some(AggregateFunction::Sum),
            "avg" | "mean" => Some(AggregateFunction::Avg),
            "min" => Some(AggregateFunction::Min),
            "max" => Some(AggregateFunction::Max),
            _ => None,
        }
    }

    /// Returns the name of this aggregate function.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::CountDistinct => "COUNT_DISTINCT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
        }
    }

    /// Returns whether the function accepts values of `input_type`.
    #[must_use]
    pub fn accepts(&self, input_type: DataType) -> bool {
        match self {
            AggregateFunction::Count | AggregateFunction::CountDistinct => true,
            AggregateFunction::Sum | AggregateFunction::Avg => input_type.is_numeric(),
            AggregateFunction::Min | AggregateFunction::Max => input_type.is_orderable(),
        }
    }

    /// Returns the output data type for this aggregate function given an input type.
    #[must_use]
    pub fn output_type(&self, input_type: Option<DataType>) -> DataType {
        match self {
            AggregateFunction::Count | AggregateFunction::CountDistinct => DataType::Int64,
            AggregateFunction::Avg => DataType::Float64,
            AggregateFunction::Sum => match input_type {
                Some(DataType::Int64) | None => DataType::Int64,
                Some(_) => DataType::Float64,
            },
            AggregateFunction::Min | AggregateFunction::Max => {
                input_type.unwrap_or(DataType::Int64)
            }
        }
    }
}

/// A bound aggregate call with its output column name.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateExpr {
    /// Output column name.
    pub name: String,
    /// Aggregate function.
    pub function: AggregateFunction,
    /// Input expression; `None` counts all rows.
    pub arg: Option<BoundExpression>,
}

impl AggregateExpr {
    /// Returns the output type.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.function
            .output_type(self.arg.as_ref().map(BoundExpression::data_type))
    }

    /// Returns whether the output can be null.
    ///
    /// Counts are never null; every other function is null when it sees no
    /// non-null input.
    #[must_use]
    pub fn nullable(&self) -> bool {
        !matches!(
            self.function,
            AggregateFunction::Count | AggregateFunction::CountDistinct
        )
    }
}

impl fmt::Display for AggregateExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.arg {
            Some(arg) => write!(f, "{}({arg}) AS {}", self.function.name(), self.name),
            None => write!(f, "{}(*) AS {}", self.function.name(), self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(index: usize, name: &str, data_type: DataType, nullable: bool) -> BoundExpression {
        BoundExpression::column(index, name, data_type, nullable)
    }

    #[test]
    fn test_nullability_inference() {
        let a = col(0, "a", DataType::Int64, false);
        let b = col(1, "b", DataType::Int64, true);
        assert!(!BoundExpression::comparison(a.clone(), ComparisonOp::Eq, a.clone()).nullable());
        assert!(BoundExpression::comparison(a.clone(), ComparisonOp::Eq, b.clone()).nullable());
        let is_null = BoundExpression::IsNull {
            operand: Box::new(b.clone()),
            negated: false,
        };
        assert!(!is_null.nullable());
        let coalesce = BoundExpression::Coalesce {
            operands: vec![b, a],
            data_type: DataType::Int64,
        };
        assert!(!coalesce.nullable());
    }

    #[test]
    fn test_cast_to_same_type_is_noop() {
        let a = col(0, "a", DataType::Int64, true);
        assert_eq!(a.clone().cast_to(DataType::Int64), a);
        assert!(matches!(
            a.cast_to(DataType::Float64),
            BoundExpression::Cast {
                data_type: DataType::Float64,
                ..
            }
        ));
    }

    #[test]
    fn test_display() {
        let expr = BoundExpression::and(vec![
            BoundExpression::comparison(
                col(0, "age", DataType::Int64, true),
                ComparisonOp::Gte,
                BoundExpression::literal(Value::Int64(18), DataType::Int64),
            ),
            BoundExpression::comparison(
                col(1, "city", DataType::String, true),
                ComparisonOp::Eq,
                BoundExpression::literal(Value::String("Oslo".into()), DataType::String),
            ),
        ]);
        assert_eq!(expr.to_string(), "((age >= 18) AND (city = 'Oslo'))");
    }

    #[test]
    fn test_sum_output_type() {
        assert_eq!(
            AggregateFunction::Sum.output_type(Some(DataType::Int64)),
            DataType::Int64
        );
        assert_eq!(
            AggregateFunction::Sum.output_type(Some(DataType::Float32)),
            DataType::Float64
        );
        assert!(!AggregateFunction::Avg.accepts(DataType::String));
        assert_eq!(AggregateFunction::from_name("COUNT_DISTINCT"), Some(AggregateFunction::CountDistinct));
    }
}
