//! Inline rows operator.

use super::WithOperator;
use crate::catalog::SchemaRef;
use crate::error::Result;
use crate::types::Value;
use crate::vector::ResultBatch;

/// Emits the rows given inline in the plan, `batch_size` at a time.
#[derive(Debug)]
pub struct ValuesOperator {
    id: String,
    schema: SchemaRef,
    rows: Vec<Vec<Value>>,
    batch_size: usize,
    cursor: usize,
}

impl ValuesOperator {
    #[must_use]
    pub fn new(id: String, schema: SchemaRef, rows: Vec<Vec<Value>>, batch_size: usize) -> Self {
        ValuesOperator {
            id,
            schema,
            rows,
            batch_size: batch_size.max(1),
            cursor: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn next_batch(&mut self) -> Result<Option<ResultBatch>> {
        if self.cursor >= self.rows.len() {
            return Ok(None);
        }
        let end = (self.cursor + self.batch_size).min(self.rows.len());
        let chunk = &self.rows[self.cursor..end];
        self.cursor = end;
        ResultBatch::from_rows(self.schema.clone(), chunk)
            .map(Some)
            .with_operator(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::catalog::{ColumnDef, Schema};
    use crate::types::DataType;

    #[test]
    fn test_values_chunks_rows() {
        let schema = Arc::new(Schema::new(vec![ColumnDef::new("x", DataType::Int64)]));
        let rows = (0..5).map(|i| vec![Value::Int64(i)]).collect();
        let mut op = ValuesOperator::new("v".into(), schema, rows, 2);

        let sizes: Vec<usize> = std::iter::from_fn(|| op.next_batch().unwrap())
            .map(|b| b.num_rows())
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(op.next_batch().unwrap().is_none());
    }

    #[test]
    fn test_values_type_error_names_operator() {
        let schema = Arc::new(Schema::new(vec![ColumnDef::new("x", DataType::Int64)]));
        let mut op = ValuesOperator::new("v".into(), schema, vec![vec![Value::Bool(true)]], 8);
        assert_eq!(op.next_batch().unwrap_err().operator(), Some("v"));
    }
}
