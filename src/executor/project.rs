//! Project operator.

use std::sync::Arc;

use super::{PhysicalOperator, VectorizedEvaluator, WithOperator};
use crate::binder::BoundExpression;
use crate::catalog::SchemaRef;
use crate::error::Result;
use crate::vector::ResultBatch;

/// Evaluates one expression per output column.
#[derive(Debug)]
pub struct ProjectOperator {
    id: String,
    schema: SchemaRef,
    input: Box<PhysicalOperator>,
    exprs: Vec<(String, BoundExpression)>,
    parallel: bool,
}

impl ProjectOperator {
    /// Creates a new project operator.
    #[must_use]
    pub fn new(
        id: String,
        schema: SchemaRef,
        input: Box<PhysicalOperator>,
        exprs: Vec<(String, BoundExpression)>,
        parallel: bool,
    ) -> Self {
        ProjectOperator {
            id,
            schema,
            input,
            exprs,
            parallel,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn input(&self) -> &PhysicalOperator {
        &self.input
    }

    pub fn next_batch(&mut self) -> Result<Option<ResultBatch>> {
        let Some(batch) = self.input.next_batch()? else {
            return Ok(None);
        };
        let exprs = self.exprs.iter().map(|(_, expr)| expr);
        VectorizedEvaluator::evaluate_all(exprs, &batch, self.parallel)
            .and_then(|columns| ResultBatch::try_new(Arc::clone(&self.schema), columns))
            .map(Some)
            .with_operator(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::ArithmeticOp;
    use crate::catalog::{ColumnDef, Schema};
    use crate::error::{ExecutionCause, VexelError};
    use crate::executor::ValuesOperator;
    use crate::types::{DataType, Value};
    use crate::vector::Encoding;

    fn input() -> Box<PhysicalOperator> {
        let schema = Arc::new(Schema::new(vec![
            ColumnDef::new("a", DataType::Int64),
            ColumnDef::new("b", DataType::Int64),
        ]));
        let rows = vec![
            vec![Value::Int64(6), Value::Int64(3)],
            vec![Value::Int64(1), Value::Null],
            vec![Value::Int64(4), Value::Int64(0)],
        ];
        Box::new(PhysicalOperator::Values(ValuesOperator::new("v".into(), schema, rows, 2)))
    }

    fn col(index: usize, name: &str) -> BoundExpression {
        BoundExpression::column(index, name, DataType::Int64, true)
    }

    fn arith(op: ArithmeticOp) -> BoundExpression {
        BoundExpression::Arithmetic {
            left: Box::new(col(0, "a")),
            op,
            right: Box::new(col(1, "b")),
            data_type: DataType::Int64,
        }
    }

    fn project(exprs: Vec<(String, BoundExpression)>, parallel: bool) -> ProjectOperator {
        let schema = Arc::new(
            exprs
                .iter()
                .map(|(name, e)| ColumnDef::new(name.clone(), e.data_type()))
                .collect::<Schema>(),
        );
        ProjectOperator::new("p".into(), schema, input(), exprs, parallel)
    }

    #[test]
    fn test_project_expressions_and_encodings() {
        for parallel in [false, true] {
            let mut op = project(
                vec![
                    ("b".into(), col(1, "b")),
                    ("sum".into(), arith(ArithmeticOp::Add)),
                    ("one".into(), BoundExpression::literal(Value::Int64(1), DataType::Int64)),
                ],
                parallel,
            );
            let batch = op.next_batch().unwrap().unwrap();
            assert_eq!(batch.column(2).unwrap().encoding(), Encoding::Constant);
            assert_eq!(
                batch.to_rows().unwrap(),
                vec![
                    vec![Value::Int64(3), Value::Int64(9), Value::Int64(1)],
                    vec![Value::Null, Value::Null, Value::Int64(1)],
                ]
            );
        }
    }

    #[test]
    fn test_division_by_zero_names_operator() {
        let mut op = project(vec![("q".into(), arith(ArithmeticOp::Div))], true);
        assert!(op.next_batch().is_ok());
        let err = op.next_batch().unwrap_err();
        assert_eq!(err.operator(), Some("p"));
        assert!(matches!(
            err,
            VexelError::Execution {
                cause: ExecutionCause::DivisionByZero,
                ..
            }
        ));
    }
}
