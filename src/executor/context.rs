//! Per-execution state and memory accounting.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use super::ExecutorConfig;
use crate::catalog::Catalog;
use crate::error::{ExecResult, ExecutionCause};

/// State owned by one plan execution.
///
/// Every operator of the execution shares the context through an `Arc`.
/// Blocking operators account their buffered state against the configured
/// memory limit through [`MemoryReservation`]s.
#[derive(Debug)]
pub struct ExecutionContext {
    execution_id: Uuid,
    config: ExecutorConfig,
    catalog: Arc<Catalog>,
    memory_used: AtomicUsize,
}

impl ExecutionContext {
    /// Creates a context with a fresh execution id.
    #[must_use]
    pub fn new(config: ExecutorConfig, catalog: Arc<Catalog>) -> Arc<Self> {
        Arc::new(Self {
            execution_id: Uuid::new_v4(),
            config,
            catalog,
            memory_used: AtomicUsize::new(0),
        })
    }

    /// Returns the execution id used in log records.
    #[must_use]
    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    /// Returns the executor configuration.
    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Returns the catalog snapshot this execution resolves sources from.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Returns the configured batch size (at least 1).
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.config.batch_size.max(1)
    }

    /// Returns the bytes currently reserved by all operators.
    #[must_use]
    pub fn memory_used(&self) -> usize {
        self.memory_used.load(Ordering::Acquire)
    }

    /// Creates an empty reservation against this execution's budget.
    #[must_use]
    pub fn reservation(self: &Arc<Self>) -> MemoryReservation {
        MemoryReservation {
            ctx: Arc::clone(self),
            size: 0,
        }
    }
}

/// Bytes held by one operator. Released when dropped.
#[derive(Debug)]
pub struct MemoryReservation {
    ctx: Arc<ExecutionContext>,
    size: usize,
}

impl MemoryReservation {
    /// Returns the reserved bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Reserves `bytes` more.
    ///
    /// # Errors
    ///
    /// Returns `MemoryLimitExceeded` if the execution would go over its
    /// limit; the reservation is unchanged in that case.
    pub fn grow(&mut self, bytes: usize) -> ExecResult<()> {
        let limit = self.ctx.config.memory_limit;
        let previous = self.ctx.memory_used.fetch_add(bytes, Ordering::AcqRel);
        let used = previous.saturating_add(bytes);
        if limit > 0 && used > limit {
            self.ctx.memory_used.fetch_sub(bytes, Ordering::AcqRel);
            return Err(ExecutionCause::MemoryLimitExceeded { used, limit });
        }
        self.size += bytes;
        Ok(())
    }

    /// Returns every reserved byte to the execution budget.
    pub fn free(&mut self) {
        if self.size > 0 {
            self.ctx.memory_used.fetch_sub(self.size, Ordering::AcqRel);
            self.size = 0;
        }
    }
}

impl Drop for MemoryReservation {
    fn drop(&mut self) {
        self.free();
    }
}
