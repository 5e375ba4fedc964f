//! Executor module for plan execution.
//!
//! A [`LogicalPlanNode`] tree is turned into a tree of pull-based physical
//! operators. Each operator yields [`ResultBatch`]es on demand; the root is
//! wrapped in a [`ResultStream`] handed to the consumer.

mod aggregate;
mod context;
pub mod evaluator;
mod filter;
mod join;
mod limit;
mod project;
mod scan;
mod sort;
mod stream;
mod values;

use std::sync::Arc;

use tracing::debug;

use crate::catalog::{Catalog, SchemaRef};
use crate::error::{ExecResult, Result, VexelError};
use crate::planner::{LogicalOperator, LogicalPlanNode};
use crate::vector::ResultBatch;

pub use aggregate::AggregateOperator;
pub use context::{ExecutionContext, MemoryReservation};
pub use evaluator::VectorizedEvaluator;
pub use filter::FilterOperator;
pub use join::JoinOperator;
pub use limit::LimitOperator;
pub use project::ProjectOperator;
pub use scan::ScanOperator;
pub use sort::SortOperator;
pub use stream::ResultStream;
pub use values::ValuesOperator;

/// Default number of rows per batch.
pub const DEFAULT_BATCH_SIZE: usize = 2048;

/// Configuration for the query executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Number of rows per batch produced by leaf and blocking operators.
    pub batch_size: usize,
    /// Memory limit in bytes for buffered operator state (0 = unlimited).
    pub memory_limit: usize,
    /// Evaluate independent expressions and build-side hashing on the rayon pool.
    pub parallel: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            memory_limit: 0,
            parallel: true,
        }
    }
}

impl ExecutorConfig {
    /// Creates a new executor configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the batch size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the memory limit in bytes.
    #[must_use]
    pub fn with_memory_limit(mut self, memory_limit: usize) -> Self {
        self.memory_limit = memory_limit;
        self
    }

    /// Enables or disables parallel evaluation.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// Query executor for executing logical plans.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    /// Executor configuration.
    config: ExecutorConfig,
    /// Sources scans resolve against.
    catalog: Arc<Catalog>,
}

impl QueryExecutor {
    /// Creates an executor with an empty catalog.
    #[must_use]
    pub fn new(config: ExecutorConfig) -> Self {
        Self::with_catalog(config, Arc::new(Catalog::new()))
    }

    /// Creates an executor resolving scans against `catalog`.
    #[must_use]
    pub fn with_catalog(config: ExecutorConfig, catalog: Arc<Catalog>) -> Self {
        Self { config, catalog }
    }

    /// Returns the configured batch size.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    /// Returns the configured memory limit.
    #[must_use]
    pub fn memory_limit(&self) -> usize {
        self.config.memory_limit
    }

    /// Returns the executor configuration.
    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Returns the catalog.
    #[must_use]
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Starts executing a plan and returns its lazy result stream.
    ///
    /// No input is read until the first batch is pulled. Data sources are
    /// resolved on first pull, so an unknown source surfaces as an
    /// execution error of its scan.
    ///
    /// # Errors
    ///
    /// Currently infallible for validated plans; the `Result` is kept for
    /// setup failures.
    pub fn execute(&self, plan: &LogicalPlanNode) -> Result<ResultStream> {
        let ctx = ExecutionContext::new(self.config.clone(), Arc::clone(&self.catalog));
        debug!(
            execution_id = %ctx.execution_id(),
            root = plan.id(),
            nodes = plan.node_count(),
            "starting execution"
        );
        let root = PhysicalOperator::create(plan, &ctx);
        Ok(ResultStream::new(root, ctx))
    }
}

/// Physical operators. The set is closed; dispatch is exhaustive.
#[derive(Debug)]
pub enum PhysicalOperator {
    Scan(ScanOperator),
    Values(ValuesOperator),
    Filter(FilterOperator),
    Project(ProjectOperator),
    Aggregate(AggregateOperator),
    Join(JoinOperator),
    Sort(SortOperator),
    Limit(LimitOperator),
}

impl PhysicalOperator {
    /// Builds the operator tree for a plan.
    #[must_use]
    pub fn create(node: &LogicalPlanNode, ctx: &Arc<ExecutionContext>) -> Self {
        let id = node.id().to_string();
        let schema = Arc::clone(node.schema());
        let child = |input: &LogicalPlanNode| Box::new(PhysicalOperator::create(input, ctx));

        match node.operator() {
            LogicalOperator::Scan { source, .. } => {
                PhysicalOperator::Scan(ScanOperator::new(id, source.clone(), schema, Arc::clone(ctx)))
            }
            LogicalOperator::Values { rows, .. } => {
                PhysicalOperator::Values(ValuesOperator::new(id, schema, rows.clone(), ctx.batch_size()))
            }
            LogicalOperator::Filter { input, predicate } => {
                PhysicalOperator::Filter(FilterOperator::new(id, child(input), predicate.clone()))
            }
            LogicalOperator::Project { input, exprs } => PhysicalOperator::Project(
                ProjectOperator::new(id, schema, child(input), exprs.clone(), ctx.config().parallel),
            ),
            LogicalOperator::Aggregate {
                input,
                group_by,
                aggregates,
            } => PhysicalOperator::Aggregate(AggregateOperator::new(
                id,
                schema,
                child(input),
                group_by.clone(),
                aggregates.clone(),
                Arc::clone(ctx),
            )),
            LogicalOperator::Join {
                left,
                right,
                join_type,
                on,
                filter,
            } => PhysicalOperator::Join(JoinOperator::new(
                id,
                schema,
                child(left),
                child(right),
                *join_type,
                on.clone(),
                filter.clone(),
                Arc::clone(ctx),
            )),
            LogicalOperator::Sort { input, keys } => PhysicalOperator::Sort(SortOperator::new(
                id,
                schema,
                child(input),
                keys.clone(),
                Arc::clone(ctx),
            )),
            LogicalOperator::Limit {
                input,
                offset,
                fetch,
            } => PhysicalOperator::Limit(LimitOperator::new(id, schema, child(input), *offset, *fetch)),
        }
    }

    /// Pulls the next batch, or `None` when exhausted.
    ///
    /// # Errors
    ///
    /// Returns an `Execution` error naming the failing operator.
    pub fn next_batch(&mut self) -> Result<Option<ResultBatch>> {
        match self {
            PhysicalOperator::Scan(op) => op.next_batch(),
            PhysicalOperator::Values(op) => op.next_batch(),
            PhysicalOperator::Filter(op) => op.next_batch(),
            PhysicalOperator::Project(op) => op.next_batch(),
            PhysicalOperator::Aggregate(op) => op.next_batch(),
            PhysicalOperator::Join(op) => op.next_batch(),
            PhysicalOperator::Sort(op) => op.next_batch(),
            PhysicalOperator::Limit(op) => op.next_batch(),
        }
    }

    /// Returns the plan node id of this operator.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            PhysicalOperator::Scan(op) => op.id(),
            PhysicalOperator::Values(op) => op.id(),
            PhysicalOperator::Filter(op) => op.id(),
            PhysicalOperator::Project(op) => op.id(),
            PhysicalOperator::Aggregate(op) => op.id(),
            PhysicalOperator::Join(op) => op.id(),
            PhysicalOperator::Sort(op) => op.id(),
            PhysicalOperator::Limit(op) => op.id(),
        }
    }

    /// Returns the output schema.
    #[must_use]
    pub fn schema(&self) -> &SchemaRef {
        match self {
            PhysicalOperator::Scan(op) => op.schema(),
            PhysicalOperator::Values(op) => op.schema(),
            PhysicalOperator::Filter(op) => op.schema(),
            PhysicalOperator::Project(op) => op.schema(),
            PhysicalOperator::Aggregate(op) => op.schema(),
            PhysicalOperator::Join(op) => op.schema(),
            PhysicalOperator::Sort(op) => op.schema(),
            PhysicalOperator::Limit(op) => op.schema(),
        }
    }

    /// Returns true if the operator holds buffered rows not yet emitted.
    #[must_use]
    pub fn has_buffered_state(&self) -> bool {
        match self {
            PhysicalOperator::Scan(_) | PhysicalOperator::Values(_) => false,
            PhysicalOperator::Filter(op) => op.input().has_buffered_state(),
            PhysicalOperator::Project(op) => op.input().has_buffered_state(),
            PhysicalOperator::Limit(op) => op.input().is_some_and(Self::has_buffered_state),
            PhysicalOperator::Aggregate(op) => op.has_buffered_state(),
            PhysicalOperator::Join(op) => op.has_buffered_state(),
            PhysicalOperator::Sort(op) => op.has_buffered_state(),
        }
    }
}

/// Tags an operator-internal failure with the operator's id.
pub(crate) trait WithOperator<T> {
    fn with_operator(self, operator: &str) -> Result<T>;
}

impl<T> WithOperator<T> for ExecResult<T> {
    fn with_operator(self, operator: &str) -> Result<T> {
        self.map_err(|cause| VexelError::execution(operator, cause))
    }
}
