//! vexel - vectorized execution of JSON query plans
//!
//! Plans produced by an external planner are deserialized into logical plan
//! trees, executed by pull-based columnar operators into lazy streams of
//! result batches, and handed to Arrow consumers through the interchange
//! adapter.

pub mod binder;
pub mod catalog;
pub mod error;
pub mod executor;
pub mod interchange;
pub mod planner;
pub mod types;
pub mod vector;

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

pub use catalog::{Catalog, ColumnDef, CsvOptions, CsvTable, DataSource, MemTable, Schema, SchemaRef};
pub use error::{ExecutionCause, Result, VexelError};
pub use executor::{ExecutorConfig, QueryExecutor, ResultStream};
pub use interchange::{ColumnEncoding, DictionaryMode, InterchangeAdapter, InterchangeRecordBatch, IpcStreamWriter};
pub use planner::{LogicalPlanNode, PlanDeserializer};
pub use types::{DataType, Value};
pub use vector::{Encoding, QueryResult, ResultBatch, RowView, Vector};

/// Entry point tying the catalog, plan deserializer and executor together.
///
/// The catalog is shared: every execution gets an `Arc` to it, so sources
/// may be registered while other streams are running.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    /// Registered data sources.
    catalog: Arc<Catalog>,
    /// Executor configuration for new executions.
    config: ExecutorConfig,
}

impl Engine {
    /// Creates an engine with an empty catalog and default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an engine with the given executor configuration.
    #[must_use]
    pub fn with_config(config: ExecutorConfig) -> Self {
        Engine {
            catalog: Arc::new(Catalog::new()),
            config,
        }
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

    /// Registers a data source under `name`.
    ///
    /// # Errors
    ///
    /// Returns `Catalog` if the name is empty or already taken.
    pub fn register_source(&self, name: impl Into<String>, source: Arc<dyn DataSource>) -> Result<()> {
        self.catalog.register(name, source)
    }

    /// Registers an in-memory table.
    ///
    /// # Errors
    ///
    /// Returns `Catalog` if the name is empty or already taken.
    pub fn register_table(&self, name: impl Into<String>, table: MemTable) -> Result<()> {
        self.register_source(name, Arc::new(table))
    }

    /// Registers a CSV file read with `schema`.
    ///
    /// The file is opened by each scan, not at registration.
    ///
    /// # Errors
    ///
    /// Returns `Catalog` if the name is empty or already taken.
    pub fn register_csv(
        &self,
        name: impl Into<String>,
        path: impl AsRef<Path>,
        schema: Schema,
        options: CsvOptions,
    ) -> Result<()> {
        self.register_source(name, Arc::new(CsvTable::new(path, schema, options)))
    }

    /// Parses and validates a JSON plan document against the catalog.
    ///
    /// # Errors
    ///
    /// Returns `PlanParse` for malformed JSON and `PlanSchema` for invalid
    /// plans.
    pub fn plan_from_json(&self, document: &str) -> Result<LogicalPlanNode> {
        let plan = PlanDeserializer::new()
            .with_catalog(&self.catalog)
            .deserialize(document)?;
        debug!(root = plan.id(), nodes = plan.node_count(), "plan deserialized");
        Ok(plan)
    }

    /// Starts executing a plan.
    ///
    /// # Errors
    ///
    /// Returns an error if execution cannot be set up.
    pub fn execute(&self, plan: &LogicalPlanNode) -> Result<ResultStream> {
        QueryExecutor::with_catalog(self.config.clone(), Arc::clone(&self.catalog)).execute(plan)
    }

    /// Parses a JSON plan document and starts executing it.
    ///
    /// # Errors
    ///
    /// Returns plan errors before any batch is produced.
    pub fn execute_json(&self, document: &str) -> Result<ResultStream> {
        let plan = self.plan_from_json(document)?;
        self.execute(&plan)
    }

    /// Runs a JSON plan document to completion.
    ///
    /// # Errors
    ///
    /// Returns the first plan or execution error.
    pub fn query(&self, document: &str) -> Result<QueryResult> {
        self.execute_json(document)?.collect_all()
    }

    /// Renders the validated plan tree of a JSON plan document.
    ///
    /// # Errors
    ///
    /// Returns plan errors.
    pub fn explain(&self, document: &str) -> Result<String> {
        Ok(self.plan_from_json(document)?.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        let engine = Engine::with_config(ExecutorConfig::new().with_batch_size(2));
        let schema = Schema::new(vec![
            ColumnDef::new("id", DataType::Int64).with_nullable(false),
            ColumnDef::new("age", DataType::Int64),
        ]);
        let rows: Vec<Vec<Value>> = (1..=5).map(|i| vec![Value::Int64(i), Value::Int64(i * 10)]).collect();
        engine
            .register_table("people", MemTable::from_rows(schema, &rows).unwrap())
            .unwrap();
        engine
    }

    #[test]
    fn test_query_uses_catalog_schema() {
        let result = engine()
            .query(
                r#"{"op": "filter", "id": "adults",
                    "input": {"op": "scan", "source": "people"},
                    "predicate": {"call": "gte", "args": [{"column": "age"}, {"literal": 30}]}}"#,
            )
            .unwrap();
        assert_eq!(result.row_count(), 3);
        assert_eq!(result.column_names(), vec!["id", "age"]);
    }

    #[test]
    fn test_explain() {
        let text = engine()
            .explain(r#"{"op": "limit", "fetch": 1, "input": {"op": "scan", "source": "people"}}"#)
            .unwrap();
        assert!(text.starts_with("Limit"));
        assert!(text.contains("Scan"));
    }

    #[test]
    fn test_duplicate_registration() {
        let engine = engine();
        let table = MemTable::from_rows(Schema::new(vec![ColumnDef::new("x", DataType::Int64)]), &[]).unwrap();
        assert!(matches!(engine.register_table("people", table), Err(VexelError::Catalog(_))));
    }
}
