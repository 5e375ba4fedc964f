//! Data sources: in-memory tables and CSV files.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{Schema, SchemaRef};
use crate::error::{ExecResult, ExecutionCause, Result, VexelError};
use crate::types::Value;
use crate::vector::{ResultBatch, Vector};

/// Lazily produced batches of a source scan.
pub type SourceReader = Box<dyn Iterator<Item = ExecResult<ResultBatch>> + Send>;

/// A named table the scan operator can read.
pub trait DataSource: Send + Sync + std::fmt::Debug {
    /// Returns the source's full schema.
    fn schema(&self) -> SchemaRef;

    /// Opens a reader producing batches of at most `batch_size` rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying data cannot be opened.
    fn scan(&self, batch_size: usize) -> ExecResult<SourceReader>;
}

// ==================== In-memory tables ====================

/// A table held in memory as a list of batches.
#[derive(Debug, Clone)]
pub struct MemTable {
    schema: SchemaRef,
    batches: Arc<Vec<ResultBatch>>,
}

impl MemTable {
    /// Creates a table from batches sharing `schema`.
    ///
    /// # Errors
    ///
    /// Returns a catalog error if a batch's columns do not match the schema.
    pub fn try_new(schema: SchemaRef, batches: Vec<ResultBatch>) -> Result<Self> {
        for batch in &batches {
            let matches = batch.schema().len() == schema.len()
                && batch
                    .schema()
                    .columns()
                    .iter()
                    .zip(schema.columns())
                    .all(|(a, b)| a.name == b.name && a.data_type == b.data_type);
            if !matches {
                return Err(VexelError::Catalog(format!(
                    "batch schema {} does not match table schema {schema}",
                    batch.schema()
                )));
            }
        }
        Ok(MemTable {
            schema,
            batches: Arc::new(batches),
        })
    }

    /// Creates a single-batch table from row-major values.
    ///
    /// # Errors
    ///
    /// Returns a catalog error if the rows do not fit the schema.
    pub fn from_rows(schema: Schema, rows: &[Vec<Value>]) -> Result<Self> {
        let schema = Arc::new(schema);
        for (i, def) in schema.columns().iter().enumerate() {
            if !def.nullable && rows.iter().any(|r| r.get(i).is_some_and(Value::is_null)) {
                return Err(VexelError::Catalog(format!(
                    "null value in non-nullable column '{}'",
                    def.name
                )));
            }
        }
        let batch = ResultBatch::from_rows(Arc::clone(&schema), rows)
            .map_err(|e| VexelError::Catalog(e.to_string()))?;
        MemTable::try_new(schema, vec![batch])
    }

    /// Returns the total number of rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(ResultBatch::num_rows).sum()
    }
}

impl DataSource for MemTable {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn scan(&self, batch_size: usize) -> ExecResult<SourceReader> {
        Ok(Box::new(MemTableReader {
            batches: Arc::clone(&self.batches),
            batch_index: 0,
            offset: 0,
            batch_size: batch_size.max(1),
        }))
    }
}

/// Re-chunks a table's batches to the requested size without copying.
struct MemTableReader {
    batches: Arc<Vec<ResultBatch>>,
    batch_index: usize,
    offset: usize,
    batch_size: usize,
}

impl Iterator for MemTableReader {
    type Item = ExecResult<ResultBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let batch = self.batches.get(self.batch_index)?;
            if self.offset >= batch.num_rows() {
                self.batch_index += 1;
                self.offset = 0;
                continue;
            }
            let len = self.batch_size.min(batch.num_rows() - self.offset);
            let chunk = batch.slice(self.offset, len);
            self.offset += len;
            return Some(Ok(chunk));
        }
    }
}

// ==================== CSV files ====================

fn default_header() -> bool {
    true
}

fn default_delimiter() -> char {
    ','
}

/// Options for reading CSV sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvOptions {
    /// Whether the first record is a header (default: true).
    #[serde(default = "default_header")]
    pub header: bool,
    /// Field separator (default: ',').
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// String columns to produce as dictionary vectors.
    #[serde(default)]
    pub dictionary_columns: Vec<String>,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            header: true,
            delimiter: ',',
            dictionary_columns: Vec::new(),
        }
    }
}

impl CsvOptions {
    /// Creates options with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether the file has a header row.
    #[must_use]
    pub fn with_header(mut self, header: bool) -> Self {
        self.header = header;
        self
    }

    /// Sets the field delimiter.
    #[must_use]
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Marks a column to be dictionary encoded.
    #[must_use]
    pub fn with_dictionary_column(mut self, name: impl Into<String>) -> Self {
        self.dictionary_columns.push(name.into());
        self
    }

    fn delimiter_byte(&self) -> ExecResult<u8> {
        u8::try_from(self.delimiter)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| {
                ExecutionCause::InvalidData(format!(
                    "CSV delimiter '{}' is not a single ASCII character",
                    self.delimiter
                ))
            })
    }
}

/// A CSV file read with a declared schema.
///
/// With a header row, schema columns are matched to header names; without
/// one, schema column `i` is field `i`. Empty fields are null.
#[derive(Debug, Clone)]
pub struct CsvTable {
    path: PathBuf,
    schema: SchemaRef,
    options: CsvOptions,
}

impl CsvTable {
    /// Creates a CSV source. The file is opened on each scan.
    pub fn new(path: impl AsRef<Path>, schema: Schema, options: CsvOptions) -> Self {
        CsvTable {
            path: path.as_ref().to_path_buf(),
            schema: Arc::new(schema),
            options,
        }
    }

    /// Returns the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the read options.
    #[must_use]
    pub fn options(&self) -> &CsvOptions {
        &self.options
    }
}

impl DataSource for CsvTable {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn scan(&self, batch_size: usize) -> ExecResult<SourceReader> {
        let file = File::open(&self.path)?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.options.delimiter_byte()?)
            .has_headers(self.options.header)
            .from_reader(file);

        let positions = if self.options.header {
            let headers = reader.headers()?.clone();
            self.schema
                .columns()
                .iter()
                .map(|def| {
                    headers.iter().position(|h| h.trim() == def.name).ok_or_else(|| {
                        ExecutionCause::SchemaMismatch(format!(
                            "column '{}' not found in CSV header of {}",
                            def.name,
                            self.path.display()
                        ))
                    })
                })
                .collect::<ExecResult<Vec<_>>>()?
        } else {
            (0..self.schema.len()).collect()
        };

        let dictionary = self
            .schema
            .columns()
            .iter()
            .map(|def| self.options.dictionary_columns.contains(&def.name))
            .collect();

        tracing::debug!(path = %self.path.display(), batch_size, "opened CSV source");

        Ok(Box::new(CsvReader {
            records: reader.into_records(),
            schema: Arc::clone(&self.schema),
            positions,
            dictionary,
            batch_size: batch_size.max(1),
            line: usize::from(self.options.header),
            done: false,
        }))
    }
}

/// Streams a CSV file as typed batches.
struct CsvReader {
    records: csv::StringRecordsIntoIter<File>,
    schema: SchemaRef,
    positions: Vec<usize>,
    dictionary: Vec<bool>,
    batch_size: usize,
    line: usize,
    done: bool,
}

impl CsvReader {
    fn read_batch(&mut self) -> ExecResult<Option<ResultBatch>> {
        let mut columns: Vec<Vec<Value>> = self
            .schema
            .columns()
            .iter()
            .map(|_| Vec::with_capacity(self.batch_size))
            .collect();
        let mut rows = 0;

        while rows < self.batch_size {
            let Some(record) = self.records.next() else {
                self.done = true;
                break;
            };
            let record = record?;
            self.line += 1;
            for ((def, &position), values) in self
                .schema
                .columns()
                .iter()
                .zip(&self.positions)
                .zip(columns.iter_mut())
            {
                let field = record.get(position).ok_or_else(|| {
                    ExecutionCause::InvalidData(format!(
                        "line {}: missing field for column '{}'",
                        self.line, def.name
                    ))
                })?;
                let value = if field.is_empty() {
                    if !def.nullable {
                        return Err(ExecutionCause::InvalidData(format!(
                            "line {}: empty value in non-nullable column '{}'",
                            self.line, def.name
                        )));
                    }
                    Value::Null
                } else {
                    Value::parse(field, def.data_type).map_err(|e| {
                        ExecutionCause::InvalidData(format!("line {}: {e}", self.line))
                    })?
                };
                values.push(value);
            }
            rows += 1;
        }

        if rows == 0 {
            return Ok(None);
        }

        let vectors = self
            .schema
            .columns()
            .iter()
            .zip(columns)
            .zip(&self.dictionary)
            .map(|((def, values), &dictionary)| {
                let array = Value::build_array(def.data_type, &values)?;
                if dictionary {
                    Vector::dictionary_encode(array.as_ref())
                } else {
                    Vector::plain(array)
                }
            })
            .collect::<ExecResult<Vec<_>>>()?;
        ResultBatch::try_new(Arc::clone(&self.schema), vectors).map(Some)
    }
}

impl Iterator for CsvReader {
    type Item = ExecResult<ResultBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_batch() {
            Ok(Some(batch)) => {
                tracing::trace!(rows = batch.num_rows(), "read CSV batch");
                Some(Ok(batch))
            }
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
