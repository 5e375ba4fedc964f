//! Filter operator.

use arrow::array::AsArray;

use super::{PhysicalOperator, VectorizedEvaluator, WithOperator};
use crate::binder::BoundExpression;
use crate::catalog::SchemaRef;
use crate::error::{ExecResult, ExecutionCause, Result};
use crate::types::{DataType, Value};
use crate::vector::ResultBatch;

/// Keeps rows for which the predicate is true; false and null drop the row.
#[derive(Debug)]
pub struct FilterOperator {
    id: String,
    input: Box<PhysicalOperator>,
    predicate: BoundExpression,
}

impl FilterOperator {
    /// Creates a new filter operator with the given child and predicate.
    #[must_use]
    pub fn new(id: String, input: Box<PhysicalOperator>, predicate: BoundExpression) -> Self {
        FilterOperator { id, input, predicate }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn schema(&self) -> &SchemaRef {
        self.input.schema()
    }

    pub fn input(&self) -> &PhysicalOperator {
        &self.input
    }

    pub fn next_batch(&mut self) -> Result<Option<ResultBatch>> {
        while let Some(batch) = self.input.next_batch()? {
            if let Some(filtered) = self.apply(&batch).with_operator(&self.id)? {
                return Ok(Some(filtered));
            }
        }
        Ok(None)
    }

    /// Returns the surviving rows, or `None` if none survive.
    fn apply(&self, batch: &ResultBatch) -> ExecResult<Option<ResultBatch>> {
        let selection = VectorizedEvaluator::evaluate(&self.predicate, batch)?;
        if selection.data_type() != DataType::Bool {
            return Err(ExecutionCause::type_mismatch(
                DataType::Bool.name(),
                selection.data_type().name(),
            ));
        }
        // Constant predicates never touch the columns.
        if let Some(value) = selection.as_constant() {
            return Ok((*value == Value::Bool(true)).then(|| batch.clone()));
        }
        let mask = selection.decode()?;
        let filtered = batch.filter(mask.as_boolean())?;
        Ok((!filtered.is_empty()).then_some(filtered))
    }
}
