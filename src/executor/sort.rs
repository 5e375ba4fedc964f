//! Sort operator.

use std::sync::Arc;

use arrow::array::{ArrayRef, UInt32Array};
use arrow::compute::{lexsort_to_indices, SortColumn, SortOptions};
use tracing::debug;

use super::{ExecutionContext, MemoryReservation, PhysicalOperator, VectorizedEvaluator, WithOperator};
use crate::catalog::SchemaRef;
use crate::error::{ExecResult, ExecutionCause, Result};
use crate::planner::SortExpr;
use crate::vector::ResultBatch;

#[derive(Debug)]
enum SortState {
    Buffering,
    Emitting { sorted: ResultBatch, offset: usize },
    Done,
}

/// Stable multi-key sort. Consumes its whole input before emitting.
#[derive(Debug)]
pub struct SortOperator {
    id: String,
    schema: SchemaRef,
    input: Option<Box<PhysicalOperator>>,
    keys: Vec<SortExpr>,
    ctx: Arc<ExecutionContext>,
    reservation: MemoryReservation,
    state: SortState,
}

impl SortOperator {
    /// Creates a new sort operator.
    #[must_use]
    pub fn new(
        id: String,
        schema: SchemaRef,
        input: Box<PhysicalOperator>,
        keys: Vec<SortExpr>,
        ctx: Arc<ExecutionContext>,
    ) -> Self {
        let reservation = ctx.reservation();
        SortOperator {
            id,
            schema,
            input: Some(input),
            keys,
            ctx,
            reservation,
            state: SortState::Buffering,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Returns true while sorted rows wait to be emitted.
    pub fn has_buffered_state(&self) -> bool {
        matches!(self.state, SortState::Emitting { .. }) || self.reservation.size() > 0
    }

    pub fn next_batch(&mut self) -> Result<Option<ResultBatch>> {
        if matches!(self.state, SortState::Buffering) {
            let batches = self.drain_input()?;
            let sorted = self.sort(&batches).with_operator(&self.id)?;
            debug!(
                execution_id = %self.ctx.execution_id(),
                operator = %self.id,
                rows = sorted.num_rows(),
                "sort complete"
            );
            self.state = SortState::Emitting { sorted, offset: 0 };
        }

        let batch_size = self.ctx.batch_size();
        let SortState::Emitting { sorted, offset } = &mut self.state else {
            return Ok(None);
        };
        if *offset >= sorted.num_rows() {
            self.state = SortState::Done;
            self.reservation.free();
            return Ok(None);
        }
        let len = batch_size.min(sorted.num_rows() - *offset);
        let batch = sorted.slice(*offset, len);
        *offset += len;
        Ok(Some(batch))
    }

    fn drain_input(&mut self) -> Result<Vec<ResultBatch>> {
        let Some(mut input) = self.input.take() else {
            return Ok(Vec::new());
        };
        let mut batches = Vec::new();
        while let Some(batch) = input.next_batch()? {
            self.reservation
                .grow(batch.memory_size())
                .with_operator(&self.id)?;
            batches.push(batch);
        }
        Ok(batches)
    }

    fn sort(&self, batches: &[ResultBatch]) -> ExecResult<ResultBatch> {
        let all = ResultBatch::concat(Arc::clone(&self.schema), batches)?;
        if all.is_empty() {
            return Ok(all);
        }

        let mut columns = self
            .keys
            .iter()
            .map(|key| {
                let values = VectorizedEvaluator::evaluate(&key.expr, &all)?.decode()?;
                Ok(SortColumn {
                    values,
                    options: Some(SortOptions {
                        descending: key.descending,
                        nulls_first: key.nulls_first,
                    }),
                })
            })
            .collect::<ExecResult<Vec<_>>>()?;

        // Input position breaks ties, which makes the sort stable.
        let len = u32::try_from(all.num_rows())
            .map_err(|_| ExecutionCause::InvalidData("too many rows to sort".into()))?;
        let position: ArrayRef = Arc::new(UInt32Array::from_iter_values(0..len));
        columns.push(SortColumn {
            values: position,
            options: None,
        });

        let indices = lexsort_to_indices(&columns, None)?;
        all.take(&indices)
    }
}
