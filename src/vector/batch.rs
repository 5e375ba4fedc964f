//! Result batches and row views.

use std::fmt;
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, UInt32Array};
use arrow::compute;
use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;

use super::Vector;
use crate::catalog::{Schema, SchemaRef};
use crate::error::{ExecResult, ExecutionCause};
use crate::types::Value;

/// A set of equal-length vectors described by a schema.
///
/// Batches are independent: once yielded by a stream they are owned by the
/// consumer and never touched by the engine again.
#[derive(Debug, Clone)]
pub struct ResultBatch {
    schema: SchemaRef,
    columns: Vec<Vector>,
    num_rows: usize,
}

impl ResultBatch {
    /// Creates a batch, checking column count, types and lengths.
    ///
    /// # Errors
    ///
    /// Returns `SchemaMismatch` if the columns do not fit the schema.
    pub fn try_new(schema: SchemaRef, columns: Vec<Vector>) -> ExecResult<Self> {
        if schema.len() != columns.len() {
            return Err(ExecutionCause::SchemaMismatch(format!(
                "schema has {} columns but {} vectors were given",
                schema.len(),
                columns.len()
            )));
        }
        let num_rows = columns.first().map_or(0, Vector::len);
        for (def, column) in schema.columns().iter().zip(&columns) {
            if def.data_type != column.data_type() {
                return Err(ExecutionCause::SchemaMismatch(format!(
                    "column '{}' is declared {} but holds {}",
                    def.name,
                    def.data_type,
                    column.data_type()
                )));
            }
            if column.len() != num_rows {
                return Err(ExecutionCause::SchemaMismatch(format!(
                    "column '{}' has {} rows, expected {num_rows}",
                    def.name,
                    column.len()
                )));
            }
        }
        Ok(ResultBatch {
            schema,
            columns,
            num_rows,
        })
    }

    /// Creates a batch with zero rows.
    #[must_use]
    pub fn new_empty(schema: SchemaRef) -> Self {
        let columns = schema
            .columns()
            .iter()
            .map(|c| Vector::nulls(c.data_type, 0))
            .collect();
        ResultBatch {
            schema,
            columns,
            num_rows: 0,
        }
    }

    /// Builds a batch from row-major values.
    ///
    /// # Errors
    ///
    /// Returns an error if a row has the wrong arity or a value has the
    /// wrong type.
    pub fn from_rows(schema: SchemaRef, rows: &[Vec<Value>]) -> ExecResult<Self> {
        if let Some(row) = rows.iter().find(|r| r.len() != schema.len()) {
            return Err(ExecutionCause::SchemaMismatch(format!(
                "row has {} values, schema has {} columns",
                row.len(),
                schema.len()
            )));
        }
        let columns = schema
            .columns()
            .iter()
            .enumerate()
            .map(|(i, def)| {
                let values: Vec<Value> = rows.iter().map(|r| r[i].clone()).collect();
                Vector::plain(Value::build_array(def.data_type, &values)?)
            })
            .collect::<ExecResult<Vec<_>>>()?;
        ResultBatch::try_new(schema, columns)
    }

    /// Returns the schema.
    #[must_use]
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Returns the number of columns.
    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if the batch has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    /// Returns the column vectors.
    #[must_use]
    pub fn columns(&self) -> &[Vector] {
        &self.columns
    }

    /// Returns the column at `index`.
    #[must_use]
    pub fn column(&self, index: usize) -> Option<&Vector> {
        self.columns.get(index)
    }

    /// Returns the first column named `name`.
    #[must_use]
    pub fn column_by_name(&self, name: &str) -> Option<&Vector> {
        self.schema.index_of(name).and_then(|i| self.columns.get(i))
    }

    /// Consumes the batch, returning its columns.
    #[must_use]
    pub fn into_columns(self) -> Vec<Vector> {
        self.columns
    }

    /// Returns a zero-copy slice of the batch.
    #[must_use]
    pub fn slice(&self, offset: usize, len: usize) -> Self {
        ResultBatch {
            schema: Arc::clone(&self.schema),
            columns: self.columns.iter().map(|c| c.slice(offset, len)).collect(),
            num_rows: len,
        }
    }

    /// Keeps rows where `predicate` is true.
    ///
    /// # Errors
    ///
    /// Returns an error if the predicate length differs from the batch.
    pub fn filter(&self, predicate: &BooleanArray) -> ExecResult<Self> {
        if predicate.len() != self.num_rows {
            return Err(ExecutionCause::InvalidData(format!(
                "predicate has {} rows, batch has {}",
                predicate.len(),
                self.num_rows
            )));
        }
        let columns = self
            .columns
            .iter()
            .map(|c| c.filter(predicate))
            .collect::<ExecResult<Vec<_>>>()?;
        Ok(ResultBatch {
            schema: Arc::clone(&self.schema),
            columns,
            num_rows: predicate.true_count(),
        })
    }

    /// Gathers rows by index.
    ///
    /// # Errors
    ///
    /// Returns an error if an index is out of bounds.
    pub fn take(&self, indices: &UInt32Array) -> ExecResult<Self> {
        let columns = self
            .columns
            .iter()
            .map(|c| c.take(indices))
            .collect::<ExecResult<Vec<_>>>()?;
        Ok(ResultBatch {
            schema: Arc::clone(&self.schema),
            columns,
            num_rows: indices.len(),
        })
    }

    /// Concatenates batches sharing `schema` into one plain-encoded batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the Arrow concat kernel fails.
    pub fn concat(schema: SchemaRef, batches: &[ResultBatch]) -> ExecResult<Self> {
        match batches {
            [] => return Ok(ResultBatch::new_empty(schema)),
            [single] => {
                return Ok(ResultBatch {
                    schema,
                    columns: single.columns.clone(),
                    num_rows: single.num_rows,
                })
            }
            _ => {}
        }
        let columns = (0..schema.len())
            .map(|i| {
                let arrays = batches
                    .iter()
                    .map(|b| b.columns[i].decode())
                    .collect::<ExecResult<Vec<ArrayRef>>>()?;
                let refs: Vec<&dyn arrow::array::Array> = arrays.iter().map(AsRef::as_ref).collect();
                Vector::plain(compute::concat(&refs)?)
            })
            .collect::<ExecResult<Vec<_>>>()?;
        ResultBatch::try_new(schema, columns)
    }

    /// Returns every column as a plain Arrow array.
    ///
    /// # Errors
    ///
    /// Returns an error if a column cannot be decoded.
    pub fn decoded_columns(&self) -> ExecResult<Vec<ArrayRef>> {
        self.columns.iter().map(Vector::decode).collect()
    }

    /// Converts the batch into an Arrow record batch with every column decoded.
    ///
    /// # Errors
    ///
    /// Returns an error if a column cannot be decoded.
    pub fn to_record_batch(&self) -> ExecResult<RecordBatch> {
        let options =
            arrow::record_batch::RecordBatchOptions::new().with_row_count(Some(self.num_rows));
        Ok(RecordBatch::try_new_with_options(
            self.schema.to_arrow(),
            self.decoded_columns()?,
            &options,
        )?)
    }

    /// Approximate heap size of the batch in bytes.
    #[must_use]
    pub fn memory_size(&self) -> usize {
        self.columns.iter().map(Vector::memory_size).sum()
    }

    /// Returns a view of row `index`.
    #[must_use]
    pub fn row(&self, index: usize) -> Option<RowView<'_>> {
        (index < self.num_rows).then_some(RowView { batch: self, index })
    }

    /// Iterates over rows as views into the columnar data.
    #[must_use]
    pub fn rows(&self) -> RowIter<'_> {
        RowIter {
            batch: self,
            next: 0,
        }
    }

    /// Materializes all rows.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be read.
    pub fn to_rows(&self) -> ExecResult<Vec<Vec<Value>>> {
        self.rows().map(|row| row.values()).collect()
    }
}

impl fmt::Display for ResultBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let batch = self.to_record_batch().map_err(|_| fmt::Error)?;
        let table = pretty_format_batches(&[batch]).map_err(|_| fmt::Error)?;
        write!(f, "{table}")
    }
}

/// A single row of a [`ResultBatch`].
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    batch: &'a ResultBatch,
    index: usize,
}

impl RowView<'_> {
    /// Returns the row's position in its batch.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Reads the value of column `column`.
    ///
    /// # Errors
    ///
    /// Returns an error if the column does not exist.
    pub fn get(&self, column: usize) -> ExecResult<Value> {
        self.batch
            .columns
            .get(column)
            .ok_or_else(|| ExecutionCause::InvalidData(format!("no column {column}")))?
            .value_at(self.index)
    }

    /// Reads the value of the first column named `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if no column has that name.
    pub fn get_by_name(&self, name: &str) -> ExecResult<Value> {
        let index = self
            .batch
            .schema
            .index_of(name)
            .ok_or_else(|| ExecutionCause::InvalidData(format!("no column named '{name}'")))?;
        self.get(index)
    }

    /// Reads every value of the row.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be read.
    pub fn values(&self) -> ExecResult<Vec<Value>> {
        self.batch
            .columns
            .iter()
            .map(|c| c.value_at(self.index))
            .collect()
    }
}

impl fmt::Display for RowView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (def, column)) in self
            .batch
            .schema
            .columns()
            .iter()
            .zip(&self.batch.columns)
            .enumerate()
        {
            if i > 0 {
                write!(f, ", ")?;
            }
            let value = column.value_at(self.index).map_err(|_| fmt::Error)?;
            write!(f, "{}: {value}", def.name)?;
        }
        write!(f, "}}")
    }
}

/// Iterator over the rows of a batch.
#[derive(Debug)]
pub struct RowIter<'a> {
    batch: &'a ResultBatch,
    next: usize,
}

impl<'a> Iterator for RowIter<'a> {
    type Item = RowView<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.batch.row(self.next)?;
        self.next += 1;
        Some(row)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.batch.num_rows.saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for RowIter<'_> {}

/// Schema plus every batch of a fully drained stream.
#[derive(Debug, Clone)]
pub struct QueryResult {
    schema: SchemaRef,
    batches: Vec<ResultBatch>,
}

impl QueryResult {
    /// Creates a result from a schema and its batches.
    #[must_use]
    pub fn new(schema: SchemaRef, batches: Vec<ResultBatch>) -> Self {
        QueryResult { schema, batches }
    }

    /// Returns the result schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Returns the batches in production order.
    #[must_use]
    pub fn batches(&self) -> &[ResultBatch] {
        &self.batches
    }

    /// Returns the total number of rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.batches.iter().map(ResultBatch::num_rows).sum()
    }

    /// Returns the output column names.
    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.schema.names()
    }

    /// Materializes all rows across batches.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be read.
    pub fn rows(&self) -> ExecResult<Vec<Vec<Value>>> {
        let mut rows = Vec::with_capacity(self.row_count());
        for batch in &self.batches {
            rows.extend(batch.to_rows()?);
        }
        Ok(rows)
    }

    /// Consumes the result, returning its batches.
    #[must_use]
    pub fn into_batches(self) -> Vec<ResultBatch> {
        self.batches
    }
}
