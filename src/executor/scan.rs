//! Table scan operator.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::{ExecutionContext, WithOperator};
use crate::catalog::{CsvTable, DataSource, SchemaRef, SourceReader};
use crate::error::{ExecResult, ExecutionCause, Result};
use crate::planner::ScanSource;
use crate::vector::ResultBatch;

enum ScanState {
    /// Source not resolved yet.
    Pending,
    /// Reading; `projection[i]` is the source column feeding output column `i`.
    Reading {
        reader: SourceReader,
        projection: Vec<usize>,
    },
    Done,
}

/// Scan operator reading the declared columns of a data source.
pub struct ScanOperator {
    id: String,
    source: ScanSource,
    schema: SchemaRef,
    ctx: Arc<ExecutionContext>,
    state: ScanState,
}

impl ScanOperator {
    /// Creates a scan; the source is resolved on the first pull.
    #[must_use]
    pub fn new(id: String, source: ScanSource, schema: SchemaRef, ctx: Arc<ExecutionContext>) -> Self {
        ScanOperator {
            id,
            source,
            schema,
            ctx,
            state: ScanState::Pending,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn next_batch(&mut self) -> Result<Option<ResultBatch>> {
        self.poll().with_operator(&self.id)
    }

    fn poll(&mut self) -> ExecResult<Option<ResultBatch>> {
        if matches!(self.state, ScanState::Pending) {
            self.state = self.open()?;
        }
        let ScanState::Reading { reader, projection } = &mut self.state else {
            return Ok(None);
        };
        match reader.next() {
            Some(batch) => {
                let batch = batch?;
                let projected = project(&self.schema, &batch, projection)?;
                Ok(Some(projected))
            }
            None => {
                self.state = ScanState::Done;
                Ok(None)
            }
        }
    }

    fn open(&self) -> ExecResult<ScanState> {
        let source: Arc<dyn DataSource> = match &self.source {
            ScanSource::Named(name) => self
                .ctx
                .catalog()
                .get(name)
                .ok_or_else(|| ExecutionCause::SourceNotFound(name.clone()))?,
            ScanSource::Csv { path, options } => Arc::new(CsvTable::new(
                path,
                self.schema.as_ref().clone(),
                options.clone(),
            )),
        };

        let source_schema = source.schema();
        let projection = self
            .schema
            .columns()
            .iter()
            .map(|column| {
                let index = source_schema.index_of(&column.name).ok_or_else(|| {
                    ExecutionCause::SchemaMismatch(format!(
                        "column '{}' not found in source '{}'",
                        column.name, self.source
                    ))
                })?;
                let actual = source_schema.columns()[index].data_type;
                if actual != column.data_type {
                    return Err(ExecutionCause::type_mismatch(
                        format!("{} for column '{}'", column.data_type, column.name),
                        actual.name(),
                    ));
                }
                Ok(index)
            })
            .collect::<ExecResult<Vec<_>>>()?;

        debug!(
            execution_id = %self.ctx.execution_id(),
            operator = %self.id,
            source = %self.source,
            "opening scan"
        );
        let reader = source.scan(self.ctx.batch_size())?;
        Ok(ScanState::Reading { reader, projection })
    }
}

/// Selects and checks the declared columns of a source batch.
fn project(schema: &SchemaRef, batch: &ResultBatch, projection: &[usize]) -> ExecResult<ResultBatch> {
    let columns = schema
        .columns()
        .iter()
        .zip(projection)
        .map(|(def, &index)| {
            let vector = batch.column(index).cloned().ok_or_else(|| {
                ExecutionCause::InvalidData(format!("source batch is missing column {index}"))
            })?;
            if !def.nullable && vector.null_count() > 0 {
                return Err(ExecutionCause::InvalidData(format!(
                    "column '{}' is declared NOT NULL but contains nulls",
                    def.name
                )));
            }
            Ok(vector)
        })
        .collect::<ExecResult<Vec<_>>>()?;
    ResultBatch::try_new(Arc::clone(schema), columns)
}

impl fmt::Debug for ScanOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            ScanState::Pending => "pending",
            ScanState::Reading { .. } => "reading",
            ScanState::Done => "done",
        };
        f.debug_struct("ScanOperator")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("state", &state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::catalog::{Catalog, ColumnDef, CsvOptions, MemTable, Schema};
    use crate::error::VexelError;
    use crate::executor::{ExecutorConfig, QueryExecutor};
    use crate::planner::LogicalPlanNode;
    use crate::types::{DataType, Value};
    use tempfile::NamedTempFile;

    fn catalog() -> Arc<Catalog> {
        let catalog = Catalog::new();
        let schema = Schema::new(vec![
            ColumnDef::new("id", DataType::Int64).with_nullable(false),
            ColumnDef::new("name", DataType::String),
            ColumnDef::new("score", DataType::Float64),
        ]);
        let rows: Vec<Vec<Value>> = (0..5)
            .map(|i| {
                vec![
                    Value::Int64(i),
                    Value::String(format!("n{i}")),
                    if i == 2 { Value::Null } else { Value::Float64(i as f64) },
                ]
            })
            .collect();
        catalog
            .register("t", Arc::new(MemTable::from_rows(schema, &rows).unwrap()))
            .unwrap();
        Arc::new(catalog)
    }

    fn executor(batch_size: usize) -> QueryExecutor {
        QueryExecutor::with_catalog(ExecutorConfig::new().with_batch_size(batch_size), catalog())
    }

    #[test]
    fn test_scan_projects_by_name_in_batches() {
        let plan = LogicalPlanNode::scan(
            "s",
            ScanSource::Named("t".into()),
            Schema::new(vec![
                ColumnDef::new("name", DataType::String),
                ColumnDef::new("id", DataType::Int64),
            ]),
        );
        let batches: Vec<_> = executor(2)
            .execute(&plan)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.num_rows() <= 2));
        assert_eq!(
            batches[0].row(1).unwrap().values().unwrap(),
            vec![Value::String("n1".into()), Value::Int64(1)]
        );
    }

    #[test]
    fn test_unknown_source_is_execution_error() {
        let plan = LogicalPlanNode::scan(
            "missing_scan",
            ScanSource::Named("nope".into()),
            Schema::new(vec![ColumnDef::new("id", DataType::Int64)]),
        );
        let mut stream = executor(16).execute(&plan).unwrap();
        let err = stream.next().unwrap().unwrap_err();
        assert_eq!(err.operator(), Some("missing_scan"));
        assert!(matches!(
            err,
            VexelError::Execution {
                cause: ExecutionCause::SourceNotFound(_),
                ..
            }
        ));
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_missing_column_and_type_mismatch() {
        let missing = LogicalPlanNode::scan(
            "s",
            ScanSource::Named("t".into()),
            Schema::new(vec![ColumnDef::new("age", DataType::Int64)]),
        );
        let err = executor(16).execute(&missing).unwrap().next().unwrap().unwrap_err();
        assert!(err.to_string().contains("age"));

        let wrong_type = LogicalPlanNode::scan(
            "s",
            ScanSource::Named("t".into()),
            Schema::new(vec![ColumnDef::new("id", DataType::String)]),
        );
        let err = executor(16).execute(&wrong_type).unwrap().next().unwrap().unwrap_err();
        assert!(matches!(
            err,
            VexelError::Execution {
                cause: ExecutionCause::TypeMismatch { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_declared_not_null_rejects_nulls() {
        let plan = LogicalPlanNode::scan(
            "s",
            ScanSource::Named("t".into()),
            Schema::new(vec![ColumnDef::new("score", DataType::Float64).with_nullable(false)]),
        );
        let result = executor(16).execute(&plan).unwrap().collect_all();
        assert!(result.is_err());
    }

    #[test]
    fn test_inline_csv_source() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "city,pop").unwrap();
        writeln!(file, "Oslo,700").unwrap();
        writeln!(file, "Lima,").unwrap();
        file.flush().unwrap();

        let plan = LogicalPlanNode::scan(
            "csv",
            ScanSource::Csv {
                path: file.path().to_path_buf(),
                options: CsvOptions::new().with_dictionary_column("city"),
            },
            Schema::new(vec![
                ColumnDef::new("pop", DataType::Int64),
                ColumnDef::new("city", DataType::String),
            ]),
        );
        let result = executor(16).execute(&plan).unwrap().collect_all().unwrap();
        assert_eq!(
            result.rows().unwrap(),
            vec![
                vec![Value::Int64(700), Value::String("Oslo".into())],
                vec![Value::Null, Value::String("Lima".into())],
            ]
        );
    }
}
