//! Arrow interchange.
//!
//! Converts [`ResultBatch`]es into Arrow record batches for external
//! consumers. Dictionary vectors are either passed through as Arrow
//! dictionary arrays or decoded, and every column declares which through
//! its [`ColumnEncoding`] and the `vexel.encoding` field metadata key.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, DictionaryArray, StructArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType as ArrowDataType, Field, Int32Type, Schema as ArrowSchema, SchemaRef as ArrowSchemaRef};
use arrow::error::ArrowError;
use arrow::ffi::{FFI_ArrowArray, FFI_ArrowSchema};
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use tracing::trace;

use crate::catalog::Schema;
use crate::error::{Result, VexelError};
use crate::executor::ResultStream;
use crate::vector::{ResultBatch, Vector, VectorData};

/// Field metadata key declaring a column's encoding.
pub const ENCODING_METADATA_KEY: &str = "vexel.encoding";

/// How dictionary vectors cross the interchange boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DictionaryMode {
    /// Pass codes and dictionary through; consumers decode on demand.
    #[default]
    Preserve,
    /// Materialize the logical values.
    Decode,
}

/// Encoding of one interchange column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnEncoding {
    /// One Arrow slot per value.
    Plain,
    /// Arrow `Dictionary(Int32, T)`; codes index the dictionary values.
    Dictionary,
}

impl ColumnEncoding {
    /// Returns the metadata value for this encoding.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnEncoding::Plain => "plain",
            ColumnEncoding::Dictionary => "dictionary",
        }
    }

    /// Reads the encoding declared on an Arrow field.
    #[must_use]
    pub fn of_field(field: &Field) -> Option<Self> {
        match field.metadata().get(ENCODING_METADATA_KEY)?.as_str() {
            "plain" => Some(ColumnEncoding::Plain),
            "dictionary" => Some(ColumnEncoding::Dictionary),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arrow view of a result batch with declared column encodings.
#[derive(Debug, Clone)]
pub struct InterchangeRecordBatch {
    batch: RecordBatch,
    encodings: Vec<ColumnEncoding>,
}

impl InterchangeRecordBatch {
    /// Returns the Arrow record batch.
    #[must_use]
    pub fn record_batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Consumes the view, returning the Arrow record batch.
    #[must_use]
    pub fn into_record_batch(self) -> RecordBatch {
        self.batch
    }

    /// Returns the Arrow schema.
    #[must_use]
    pub fn schema(&self) -> ArrowSchemaRef {
        self.batch.schema()
    }

    /// Returns the encoding declared for every column.
    #[must_use]
    pub fn encodings(&self) -> &[ColumnEncoding] {
        &self.encodings
    }

    /// Returns the encoding of column `index`.
    #[must_use]
    pub fn column_encoding(&self, index: usize) -> Option<ColumnEncoding> {
        self.encodings.get(index).copied()
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    /// Exports the batch through the Arrow C Data Interface as a struct
    /// array whose children are the columns.
    ///
    /// # Errors
    ///
    /// Returns `Interchange` if the export fails.
    pub fn to_ffi(&self) -> Result<(FFI_ArrowArray, FFI_ArrowSchema)> {
        let array = StructArray::from(self.batch.clone());
        arrow::ffi::to_ffi(&array.to_data()).map_err(interchange_err)
    }
}

/// Converts result batches to the Arrow interchange format.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterchangeAdapter {
    mode: DictionaryMode,
}

impl InterchangeAdapter {
    #[must_use]
    pub fn new(mode: DictionaryMode) -> Self {
        Self { mode }
    }

    #[must_use]
    pub fn mode(&self) -> DictionaryMode {
        self.mode
    }

    /// Converts one batch. Column order, names, types and null positions
    /// are preserved; constant vectors are materialized.
    ///
    /// # Errors
    ///
    /// Returns `Interchange` if a column cannot be represented in Arrow.
    pub fn convert(&self, batch: &ResultBatch) -> Result<InterchangeRecordBatch> {
        let mut fields = Vec::with_capacity(batch.num_columns());
        let mut arrays = Vec::with_capacity(batch.num_columns());
        let mut encodings = Vec::with_capacity(batch.num_columns());

        for (def, vector) in batch.schema().columns().iter().zip(batch.columns()) {
            let (array, encoding) = self.convert_vector(vector)?;
            let metadata = HashMap::from([(
                ENCODING_METADATA_KEY.to_string(),
                encoding.as_str().to_string(),
            )]);
            fields.push(
                Field::new(def.name.clone(), array.data_type().clone(), def.nullable).with_metadata(metadata),
            );
            arrays.push(array);
            encodings.push(encoding);
        }

        let options = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
        let record = RecordBatch::try_new_with_options(Arc::new(ArrowSchema::new(fields)), arrays, &options)
            .map_err(interchange_err)?;
        trace!(rows = record.num_rows(), columns = record.num_columns(), "converted batch");
        Ok(InterchangeRecordBatch {
            batch: record,
            encodings,
        })
    }

    /// Converts every batch of a stream lazily.
    pub fn convert_stream(self, stream: ResultStream) -> impl Iterator<Item = Result<InterchangeRecordBatch>> {
        stream.map(move |batch| self.convert(&batch?))
    }

    fn convert_vector(&self, vector: &Vector) -> Result<(ArrayRef, ColumnEncoding)> {
        match (vector.data(), self.mode) {
            (VectorData::Dictionary { keys, values }, DictionaryMode::Preserve) => {
                let dict = DictionaryArray::<Int32Type>::try_new(keys.clone(), Arc::clone(values))
                    .map_err(interchange_err)?;
                Ok((Arc::new(dict), ColumnEncoding::Dictionary))
            }
            _ => {
                let array = vector
                    .decode()
                    .map_err(|e| VexelError::Interchange(e.to_string()))?;
                Ok((array, ColumnEncoding::Plain))
            }
        }
    }
}

/// Incremental Arrow IPC stream writer.
///
/// An IPC stream carries one schema. A batch whose column encodings differ
/// from it (a dictionary column that arrives plain, or the reverse) is cast
/// to the stream schema before it is written.
pub struct IpcStreamWriter<W: Write> {
    writer: StreamWriter<W>,
    schema: ArrowSchemaRef,
    batches: usize,
}

impl<W: Write> IpcStreamWriter<W> {
    /// Writes the stream header for `schema`.
    ///
    /// # Errors
    ///
    /// Returns `Interchange` if the header cannot be written.
    pub fn try_new(writer: W, schema: ArrowSchemaRef) -> Result<Self> {
        let writer = StreamWriter::try_new(writer, &schema).map_err(interchange_err)?;
        Ok(Self {
            writer,
            schema,
            batches: 0,
        })
    }

    /// Returns the stream schema.
    #[must_use]
    pub fn schema(&self) -> &ArrowSchemaRef {
        &self.schema
    }

    /// Writes one batch.
    ///
    /// # Errors
    ///
    /// Returns `Interchange` if the batch cannot be cast to the stream
    /// schema or writing fails.
    pub fn write(&mut self, batch: &InterchangeRecordBatch) -> Result<()> {
        let record = batch.record_batch();
        if *record.schema() == *self.schema {
            self.writer.write(record).map_err(interchange_err)?;
        } else {
            let conformed = self.conform(record)?;
            self.writer.write(&conformed).map_err(interchange_err)?;
        }
        self.batches += 1;
        Ok(())
    }

    /// Writes the end-of-stream marker.
    ///
    /// # Errors
    ///
    /// Returns `Interchange` if writing fails.
    pub fn finish(mut self) -> Result<()> {
        self.writer.finish().map_err(interchange_err)?;
        trace!(batches = self.batches, "IPC stream finished");
        Ok(())
    }

    fn conform(&self, record: &RecordBatch) -> Result<RecordBatch> {
        if record.num_columns() != self.schema.fields().len() {
            return Err(VexelError::Interchange(format!(
                "batch has {} columns, stream schema has {}",
                record.num_columns(),
                self.schema.fields().len()
            )));
        }
        let columns = self
            .schema
            .fields()
            .iter()
            .zip(record.columns())
            .map(|(field, array)| {
                if array.data_type() == field.data_type() {
                    Ok(Arc::clone(array))
                } else {
                    cast(array, field.data_type())
                }
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(interchange_err)?;
        let options = RecordBatchOptions::new().with_row_count(Some(record.num_rows()));
        RecordBatch::try_new_with_options(Arc::clone(&self.schema), columns, &options).map_err(interchange_err)
    }
}

impl<W: Write> fmt::Debug for IpcStreamWriter<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpcStreamWriter")
            .field("schema", &self.schema)
            .field("batches", &self.batches)
            .finish_non_exhaustive()
    }
}

fn interchange_err(err: ArrowError) -> VexelError {
    VexelError::Interchange(err.to_string())
}

/// Writes converted batches as an Arrow IPC stream.
///
/// An empty slice writes a stream with `schema` and no batches.
///
/// # Errors
///
/// Returns `Interchange` if a batch cannot be cast to the schema or writing
/// fails.
pub fn write_ipc_stream<W: Write>(
    writer: W,
    schema: &ArrowSchema,
    batches: &[InterchangeRecordBatch],
) -> Result<()> {
    let mut stream = IpcStreamWriter::try_new(writer, Arc::new(schema.clone()))?;
    for batch in batches {
        stream.write(batch)?;
    }
    stream.finish()
}

impl ResultBatch {
    /// Imports an Arrow record batch. Dictionary columns stay dictionary
    /// encoded.
    ///
    /// # Errors
    ///
    /// Returns `Interchange` for Arrow types without a vexel equivalent.
    pub fn try_from_arrow(batch: &RecordBatch) -> Result<ResultBatch> {
        let schema = Schema::from_arrow(batch.schema().as_ref()).map_err(VexelError::Interchange)?;
        let columns = batch
            .columns()
            .iter()
            .map(|array| match array.data_type() {
                ArrowDataType::Dictionary(key, _) if !key.is_integer() => Err(VexelError::Interchange(
                    format!("unsupported dictionary key type {key}"),
                )),
                _ => Vector::plain(Arc::clone(array)).map_err(|e| VexelError::Interchange(e.to_string())),
            })
            .collect::<Result<Vec<_>>>()?;
        ResultBatch::try_new(Arc::new(schema), columns).map_err(|e| VexelError::Interchange(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnDef;
    use crate::types::{DataType, Value};
    use arrow::array::{AsArray, Int32Array, Int64Array, StringArray};
    use arrow::ipc::reader::StreamReader;

    fn batch() -> ResultBatch {
        let schema = Arc::new(Schema::new(vec![
            ColumnDef::new("id", DataType::Int64).with_nullable(false),
            ColumnDef::new("city", DataType::String),
            ColumnDef::new("flag", DataType::Bool),
        ]));
        let id = Vector::plain(Arc::new(Int64Array::from(vec![1, 2, 3]))).unwrap();
        let values: ArrayRef = Arc::new(StringArray::from(vec!["Oslo", "Lima"]));
        let city = Vector::dictionary(Int32Array::from(vec![Some(1), None, Some(1)]), values).unwrap();
        let flag = Vector::constant(Value::Bool(true), DataType::Bool, 3).unwrap();
        ResultBatch::try_new(schema, vec![id, city, flag]).unwrap()
    }

    #[test]
    fn test_preserve_dictionary() {
        let converted = InterchangeAdapter::new(DictionaryMode::Preserve).convert(&batch()).unwrap();
        assert_eq!(
            converted.encodings(),
            &[ColumnEncoding::Plain, ColumnEncoding::Dictionary, ColumnEncoding::Plain]
        );
        let schema = converted.schema();
        assert_eq!(
            schema.field(1).data_type(),
            &ArrowDataType::Dictionary(Box::new(ArrowDataType::Int32), Box::new(ArrowDataType::Utf8))
        );
        assert_eq!(ColumnEncoding::of_field(schema.field(1)), Some(ColumnEncoding::Dictionary));
        assert!(!schema.field(0).is_nullable());

        let city = converted.record_batch().column(1).as_dictionary::<Int32Type>();
        assert_eq!(city.values().len(), 2);
        assert!(city.is_null(1));
    }

    #[test]
    fn test_decode_dictionary_and_materialize_constants() {
        let converted = InterchangeAdapter::new(DictionaryMode::Decode).convert(&batch()).unwrap();
        assert!(converted.encodings().iter().all(|e| *e == ColumnEncoding::Plain));
        let record = converted.record_batch();
        let city = record.column(1).as_string::<i32>();
        assert_eq!(city.value(0), "Lima");
        assert!(city.is_null(1));
        assert_eq!(record.column(2).as_boolean().true_count(), 3);
    }

    #[test]
    fn test_ipc_stream_round_trip() {
        let converted = InterchangeAdapter::new(DictionaryMode::Preserve).convert(&batch()).unwrap();
        let mut buffer = Vec::new();
        write_ipc_stream(&mut buffer, converted.schema().as_ref(), &[converted.clone()]).unwrap();

        let reader = StreamReader::try_new(std::io::Cursor::new(buffer), None).unwrap();
        let batches: Vec<RecordBatch> = reader.collect::<std::result::Result<_, _>>().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].num_rows(), 3);
        assert_eq!(batches[0].schema().field(1).metadata().get(ENCODING_METADATA_KEY).unwrap(), "dictionary");
    }

    #[test]
    fn test_ipc_writer_casts_to_stream_schema() {
        let preserved = InterchangeAdapter::new(DictionaryMode::Preserve).convert(&batch()).unwrap();
        let decoded = InterchangeAdapter::new(DictionaryMode::Decode).convert(&batch()).unwrap();
        let mut buffer = Vec::new();
        let mut writer = IpcStreamWriter::try_new(&mut buffer, preserved.schema()).unwrap();
        writer.write(&preserved).unwrap();
        writer.write(&decoded).unwrap();
        writer.finish().unwrap();

        let reader = StreamReader::try_new(std::io::Cursor::new(buffer), None).unwrap();
        let batches: Vec<RecordBatch> = reader.collect::<std::result::Result<_, _>>().unwrap();
        assert_eq!(batches.len(), 2);
        for record in &batches {
            assert!(matches!(record.column(1).data_type(), ArrowDataType::Dictionary(_, _)));
            let imported = ResultBatch::try_from_arrow(record).unwrap();
            assert_eq!(imported.to_rows().unwrap(), batch().to_rows().unwrap());
        }
    }

    #[test]
    fn test_ipc_writer_rejects_column_count_mismatch() {
        let converted = InterchangeAdapter::default().convert(&batch()).unwrap();
        let narrow = Arc::new(ArrowSchema::new(vec![Field::new("id", ArrowDataType::Int64, false)]));
        let mut writer = IpcStreamWriter::try_new(Vec::new(), narrow).unwrap();
        assert!(matches!(writer.write(&converted), Err(VexelError::Interchange(_))));
    }

    #[test]
    #[allow(unsafe_code)]
    fn test_ffi_export() {
        let converted = InterchangeAdapter::new(DictionaryMode::Decode).convert(&batch()).unwrap();
        let (array, schema) = converted.to_ffi().unwrap();
        let data = unsafe { arrow::ffi::from_ffi(array, &schema) }.unwrap();
        let imported = StructArray::from(data);
        assert_eq!(imported.len(), 3);
        assert_eq!(imported.num_columns(), 3);
    }

    #[test]
    fn test_import_from_arrow() {
        let converted = InterchangeAdapter::new(DictionaryMode::Preserve).convert(&batch()).unwrap();
        let imported = ResultBatch::try_from_arrow(converted.record_batch()).unwrap();
        assert_eq!(imported.schema().names(), vec!["id", "city", "flag"]);
        assert_eq!(imported.to_rows().unwrap(), batch().to_rows().unwrap());
    }

    #[test]
    fn test_import_unsupported_type() {
        let schema = Arc::new(ArrowSchema::new(vec![Field::new("u", ArrowDataType::UInt8, true)]));
        let array: ArrayRef = Arc::new(arrow::array::UInt8Array::from(vec![1u8]));
        let record = RecordBatch::try_new(schema, vec![array]).unwrap();
        assert!(matches!(
            ResultBatch::try_from_arrow(&record),
            Err(VexelError::Interchange(_))
        ));
    }
}
