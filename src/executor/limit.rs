//! Limit operator.

use super::PhysicalOperator;
use crate::catalog::SchemaRef;
use crate::error::Result;
use crate::vector::ResultBatch;

/// Skips `offset` rows, then yields up to `fetch` rows.
///
/// The input is dropped as soon as `fetch` rows have been produced, which
/// releases everything below the limit.
#[derive(Debug)]
pub struct LimitOperator {
    id: String,
    schema: SchemaRef,
    input: Option<Box<PhysicalOperator>>,
    skip: usize,
    remaining: Option<usize>,
}

impl LimitOperator {
    #[must_use]
    pub fn new(
        id: String,
        schema: SchemaRef,
        input: Box<PhysicalOperator>,
        offset: usize,
        fetch: Option<usize>,
    ) -> Self {
        LimitOperator {
            id,
            schema,
            input: Some(input),
            skip: offset,
            remaining: fetch,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Returns the input, or `None` once it has been released.
    pub fn input(&self) -> Option<&PhysicalOperator> {
        self.input.as_deref()
    }

    pub fn next_batch(&mut self) -> Result<Option<ResultBatch>> {
        if self.remaining == Some(0) {
            self.input = None;
        }
        let Some(input) = self.input.as_mut() else {
            return Ok(None);
        };

        while let Some(batch) = input.next_batch()? {
            let rows = batch.num_rows();
            if self.skip >= rows {
                self.skip -= rows;
                continue;
            }
            let start = self.skip;
            self.skip = 0;
            let mut len = rows - start;
            if let Some(remaining) = self.remaining.as_mut() {
                len = len.min(*remaining);
                *remaining -= len;
            }
            if self.remaining == Some(0) {
                self.input = None;
            }
            return Ok(Some(batch.slice(start, len)));
        }
        self.input = None;
        Ok(None)
    }
}
