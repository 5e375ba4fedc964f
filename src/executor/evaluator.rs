//! Vectorized expression evaluator.
//!
//! Expressions evaluate to [`Vector`]s and keep encodings where that saves
//! work:
//! - column references pass the input vector through unchanged
//! - literals become constant vectors, and operators over constants fold to
//!   constants
//! - comparisons between a dictionary vector and a constant run once per
//!   dictionary entry and re-key the result
//! - casts of dictionary vectors cast the dictionary only
//!
//! Everything else decodes to Arrow arrays and runs Arrow kernels.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, BooleanArray, Datum, Scalar};
use arrow::compute::kernels::boolean::{and_kleene, not, or_kleene};
use arrow::compute::kernels::cmp::{eq, gt, gt_eq, lt, lt_eq, neq};
use arrow::compute::kernels::numeric::{add, div, mul, rem, sub};
use arrow::compute::kernels::zip::zip;
use arrow::compute::{cast_with_options, is_not_null, is_null, CastOptions};
use arrow::error::ArrowError;
use rayon::prelude::*;

use crate::binder::{ArithmeticOp, BoundExpression, ComparisonOp, LogicalOp};
use crate::error::{ExecResult, ExecutionCause};
use crate::types::{DataType, Value};
use crate::vector::{ResultBatch, Vector, VectorData};

/// Vectorized expression evaluator.
pub struct VectorizedEvaluator;

/// An operand prepared for an Arrow kernel: constants stay scalars.
enum Operand {
    Array(ArrayRef),
    Scalar(Scalar<ArrayRef>),
}

impl Operand {
    fn new(vector: &Vector) -> ExecResult<Self> {
        Ok(match vector.as_constant() {
            Some(value) => Operand::Scalar(Scalar::new(value.to_array(vector.data_type(), 1)?)),
            None => Operand::Array(vector.decode()?),
        })
    }

    fn datum(&self) -> &dyn Datum {
        match self {
            Operand::Array(array) => array,
            Operand::Scalar(scalar) => scalar,
        }
    }

    fn is_scalar(&self) -> bool {
        matches!(self, Operand::Scalar(_))
    }
}

impl VectorizedEvaluator {
    /// Evaluates a bound expression against a batch.
    ///
    /// # Errors
    ///
    /// Returns an error on integer division by zero, arithmetic overflow,
    /// failed casts, or a column reference outside the batch.
    pub fn evaluate(expr: &BoundExpression, batch: &ResultBatch) -> ExecResult<Vector> {
        let len = batch.num_rows();
        match expr {
            BoundExpression::Column { index, name, .. } => batch.column(*index).cloned().ok_or_else(|| {
                ExecutionCause::InvalidData(format!("column {index} ('{name}') not in batch"))
            }),
            BoundExpression::Literal { value, data_type } => {
                Vector::constant(value.clone(), *data_type, len)
            }
            BoundExpression::Comparison { left, op, right } => {
                let left = Self::evaluate(left, batch)?;
                let right = Self::evaluate(right, batch)?;
                Self::compare(&left, *op, &right)
            }
            BoundExpression::Logical { op, operands } => {
                let operands = operands
                    .iter()
                    .map(|o| Self::evaluate(o, batch))
                    .collect::<ExecResult<Vec<_>>>()?;
                Self::logical(*op, &operands, len)
            }
            BoundExpression::Arithmetic {
                left,
                op,
                right,
                data_type,
            } => {
                let left = Self::evaluate(left, batch)?;
                let right = Self::evaluate(right, batch)?;
                Self::arithmetic(&left, *op, &right, *data_type)
            }
            BoundExpression::IsNull { operand, negated } => {
                let operand = Self::evaluate(operand, batch)?;
                Self::is_null(&operand, *negated)
            }
            BoundExpression::Coalesce {
                operands,
                data_type,
            } => {
                let operands = operands
                    .iter()
                    .map(|o| Self::evaluate(o, batch))
                    .collect::<ExecResult<Vec<_>>>()?;
                Self::coalesce(&operands, *data_type, len)
            }
            BoundExpression::Cast { operand, data_type } => {
                let operand = Self::evaluate(operand, batch)?;
                Self::cast(&operand, *data_type)
            }
        }
    }

    /// Evaluates several expressions against the same batch, on the rayon
    /// pool when `parallel` is set. Output order follows `exprs`.
    ///
    /// # Errors
    ///
    /// Returns the first evaluation error.
    pub fn evaluate_all<'a, I>(exprs: I, batch: &ResultBatch, parallel: bool) -> ExecResult<Vec<Vector>>
    where
        I: IntoIterator<Item = &'a BoundExpression>,
    {
        let exprs: Vec<&BoundExpression> = exprs.into_iter().collect();
        if parallel && exprs.len() > 1 {
            exprs.par_iter().map(|e| Self::evaluate(e, batch)).collect()
        } else {
            exprs.iter().map(|e| Self::evaluate(e, batch)).collect()
        }
    }

    /// Evaluates a predicate to a boolean mask (null means not selected).
    ///
    /// # Errors
    ///
    /// Returns an error if evaluation fails or the result is not boolean.
    pub fn evaluate_predicate(expr: &BoundExpression, batch: &ResultBatch) -> ExecResult<BooleanArray> {
        let result = Self::evaluate(expr, batch)?;
        if result.data_type() != DataType::Bool {
            return Err(ExecutionCause::type_mismatch(
                DataType::Bool.name(),
                result.data_type().name(),
            ));
        }
        Ok(result.decode()?.as_boolean().clone())
    }

    /// Applies a binary kernel, folding to a constant when both sides are
    /// constant.
    fn binary<F>(left: &Vector, right: &Vector, data_type: DataType, kernel: F) -> ExecResult<Vector>
    where
        F: Fn(&dyn Datum, &dyn Datum) -> Result<ArrayRef, ArrowError>,
    {
        let len = left.len();
        let l = Operand::new(left)?;
        let r = Operand::new(right)?;
        let result = kernel(l.datum(), r.datum())?;
        if l.is_scalar() && r.is_scalar() {
            let value = Value::from_array(result.as_ref(), 0)?;
            return Vector::constant(value, data_type, len);
        }
        Vector::plain(result)
    }

    /// Compares two vectors using the given operator.
    fn compare(left: &Vector, op: ComparisonOp, right: &Vector) -> ExecResult<Vector> {
        let kernel = |l: &dyn Datum, r: &dyn Datum| -> Result<ArrayRef, ArrowError> {
            let result = match op {
                ComparisonOp::Eq => eq(l, r)?,
                ComparisonOp::Neq => neq(l, r)?,
                ComparisonOp::Lt => lt(l, r)?,
                ComparisonOp::Lte => lt_eq(l, r)?,
                ComparisonOp::Gt => gt(l, r)?,
                ComparisonOp::Gte => gt_eq(l, r)?,
            };
            Ok(Arc::new(result))
        };

        match (left.data(), right.data()) {
            (VectorData::Dictionary { keys, values }, VectorData::Constant { value, .. }) => {
                let constant = Scalar::new(value.to_array(right.data_type(), 1)?);
                let per_entry = kernel(values, &constant)?;
                Vector::dictionary(keys.clone(), per_entry)
            }
            (VectorData::Constant { value, .. }, VectorData::Dictionary { keys, values }) => {
                let constant = Scalar::new(value.to_array(left.data_type(), 1)?);
                let per_entry = kernel(&constant, values)?;
                Vector::dictionary(keys.clone(), per_entry)
            }
            _ => Self::binary(left, right, DataType::Bool, kernel),
        }
    }

    /// Performs arithmetic on two vectors of the same numeric type.
    fn arithmetic(
        left: &Vector,
        op: ArithmeticOp,
        right: &Vector,
        data_type: DataType,
    ) -> ExecResult<Vector> {
        Self::binary(left, right, data_type, |l, r| match op {
            ArithmeticOp::Add => add(l, r),
            ArithmeticOp::Sub => sub(l, r),
            ArithmeticOp::Mul => mul(l, r),
            ArithmeticOp::Div => div(l, r),
            ArithmeticOp::Mod => rem(l, r),
        })
    }

    /// Evaluates a logical operation with Kleene semantics.
    fn logical(op: LogicalOp, operands: &[Vector], len: usize) -> ExecResult<Vector> {
        let all_constant = operands.iter().all(|o| o.as_constant().is_some());
        let width = if all_constant { 1 } else { len };
        let arrays = operands
            .iter()
            .map(|o| match o.as_constant() {
                Some(value) => value.to_array(DataType::Bool, width),
                None => o.decode(),
            })
            .collect::<ExecResult<Vec<_>>>()?;

        let mut iter = arrays.iter().map(|a| a.as_boolean());
        let first = iter
            .next()
            .ok_or_else(|| ExecutionCause::InvalidData(format!("{op:?} requires an operand")))?
            .clone();
        let result = match op {
            LogicalOp::Not => not(&first)?,
            LogicalOp::And => iter.try_fold(first, |acc, next| and_kleene(&acc, next))?,
            LogicalOp::Or => iter.try_fold(first, |acc, next| or_kleene(&acc, next))?,
        };

        if all_constant {
            let value = Value::from_array(&result, 0)?;
            return Vector::constant(value, DataType::Bool, len);
        }
        Vector::plain(Arc::new(result))
    }

    /// Evaluates IS NULL / IS NOT NULL.
    fn is_null(operand: &Vector, negated: bool) -> ExecResult<Vector> {
        if let Some(value) = operand.as_constant() {
            return Vector::constant(
                Value::Bool(value.is_null() != negated),
                DataType::Bool,
                operand.len(),
            );
        }
        let array = operand.decode()?;
        let result = if negated {
            is_not_null(array.as_ref())?
        } else {
            is_null(array.as_ref())?
        };
        Vector::plain(Arc::new(result))
    }

    /// Returns the first non-null operand per row.
    fn coalesce(operands: &[Vector], data_type: DataType, len: usize) -> ExecResult<Vector> {
        if operands.iter().all(|o| o.as_constant().is_some()) {
            let value = operands
                .iter()
                .filter_map(Vector::as_constant)
                .find(|v| !v.is_null())
                .cloned()
                .unwrap_or(Value::Null);
            return Vector::constant(value, data_type, len);
        }

        let mut result: Option<ArrayRef> = None;
        for operand in operands {
            let next = operand.decode()?;
            let merged = match result.take() {
                None => next,
                Some(prev) if prev.null_count() == 0 => {
                    result = Some(prev);
                    break;
                }
                Some(prev) => {
                    let keep = is_not_null(prev.as_ref())?;
                    zip(&keep, &prev, &next)?
                }
            };
            result = Some(merged);
        }
        match result {
            Some(array) => Vector::plain(array),
            None => Ok(Vector::nulls(data_type, len)),
        }
    }

    /// Casts a vector to another type. Failed conversions are errors.
    fn cast(operand: &Vector, data_type: DataType) -> ExecResult<Vector> {
        if operand.data_type() == data_type {
            return Ok(operand.clone());
        }
        let options = CastOptions {
            safe: false,
            ..CastOptions::default()
        };
        let target = data_type.to_arrow();
        match operand.data() {
            VectorData::Constant { value, len } => {
                let single = value.to_array(operand.data_type(), 1)?;
                let cast = cast_with_options(single.as_ref(), &target, &options)?;
                Vector::constant(Value::from_array(cast.as_ref(), 0)?, data_type, *len)
            }
            VectorData::Dictionary { keys, values } => {
                let cast = cast_with_options(values.as_ref(), &target, &options)?;
                Vector::dictionary(keys.clone(), cast)
            }
            VectorData::Plain(array) => {
                Vector::plain(cast_with_options(array.as_ref(), &target, &options)?)
            }
        }
    }
}
