//! Lazy result streams.

use std::sync::Arc;

use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::{ExecutionContext, PhysicalOperator};
use crate::catalog::SchemaRef;
use crate::error::Result;
use crate::vector::{QueryResult, ResultBatch};

/// Lazy stream of result batches.
///
/// Each call to `next` pulls one batch through the operator tree. The
/// stream yields batches until the plan is exhausted or an error occurs;
/// after either it is finished and yields `None`. Zero-row batches are
/// never yielded. Dropping the stream (or calling [`ResultStream::close`])
/// releases all operator state.
#[derive(Debug)]
pub struct ResultStream {
    root: Option<PhysicalOperator>,
    schema: SchemaRef,
    ctx: Arc<ExecutionContext>,
    batches: usize,
    rows: usize,
}

impl ResultStream {
    pub(crate) fn new(root: PhysicalOperator, ctx: Arc<ExecutionContext>) -> Self {
        let schema = Arc::clone(root.schema());
        Self {
            root: Some(root),
            schema,
            ctx,
            batches: 0,
            rows: 0,
        }
    }

    /// Returns the result schema. Available even before the first pull.
    #[must_use]
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Returns the id of this execution.
    #[must_use]
    pub fn execution_id(&self) -> Uuid {
        self.ctx.execution_id()
    }

    /// Returns true once the stream has ended, failed, or been closed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.root.is_none()
    }

    /// Stops execution and releases all operator state.
    ///
    /// Closing an already finished stream does nothing.
    pub fn close(&mut self) {
        if let Some(root) = self.root.take() {
            if root.has_buffered_state() {
                warn!(
                    execution_id = %self.ctx.execution_id(),
                    operator = root.id(),
                    "stream closed with buffered operator state"
                );
            }
            debug!(
                execution_id = %self.ctx.execution_id(),
                batches = self.batches,
                rows = self.rows,
                "stream closed"
            );
        }
    }

    /// Drains the stream into a materialized result.
    ///
    /// # Errors
    ///
    /// Returns the first execution error.
    pub fn collect_all(mut self) -> Result<QueryResult> {
        let mut batches = Vec::new();
        for batch in self.by_ref() {
            batches.push(batch?);
        }
        Ok(QueryResult::new(Arc::clone(&self.schema), batches))
    }

    fn finish(&mut self) {
        self.root = None;
        debug!(
            execution_id = %self.ctx.execution_id(),
            batches = self.batches,
            rows = self.rows,
            "execution finished"
        );
    }
}

impl Iterator for ResultStream {
    type Item = Result<ResultBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let root = self.root.as_mut()?;
            match root.next_batch() {
                Ok(Some(batch)) if batch.is_empty() => continue,
                Ok(Some(batch)) => {
                    self.batches += 1;
                    self.rows += batch.num_rows();
                    trace!(
                        execution_id = %self.ctx.execution_id(),
                        rows = batch.num_rows(),
                        "batch produced"
                    );
                    return Some(Ok(batch));
                }
                Ok(None) => {
                    self.finish();
                    return None;
                }
                Err(err) => {
                    debug!(execution_id = %self.ctx.execution_id(), error = %err, "execution failed");
                    self.root = None;
                    return Some(Err(err));
                }
            }
        }
    }
}

impl std::iter::FusedIterator for ResultStream {}

impl Drop for ResultStream {
    fn drop(&mut self) {
        self.close();
    }
}
