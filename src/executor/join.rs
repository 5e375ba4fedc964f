//! Hash join operator.

use std::collections::HashMap;
use std::mem::size_of;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, UInt32Array};
use arrow::row::{RowConverter, SortField};
use rayon::prelude::*;
use tracing::debug;

use super::{ExecutionContext, MemoryReservation, PhysicalOperator, VectorizedEvaluator, WithOperator};
use crate::binder::BoundExpression;
use crate::catalog::SchemaRef;
use crate::error::{ExecResult, ExecutionCause, Result};
use crate::planner::JoinType;
use crate::vector::{ResultBatch, Vector};

/// Hashed right input.
#[derive(Debug)]
struct BuildSide {
    /// All right rows, concatenated.
    batch: ResultBatch,
    /// Row-encoded key to right row indices. Rows with a null key are absent.
    table: HashMap<Box<[u8]>, Vec<u32>>,
    /// Right rows that found at least one partner.
    matched: Vec<bool>,
}

#[derive(Debug)]
enum JoinState {
    Building,
    Probing,
    /// Emitting right rows without partners (right and full joins).
    EmittingUnmatched { indices: Vec<u32>, offset: usize },
    Done,
}

/// Hash join. The right input is the build side and is consumed first; the
/// left input streams through the probe.
///
/// Without equality keys every pair of rows is a candidate (nested loop).
#[derive(Debug)]
pub struct JoinOperator {
    id: String,
    schema: SchemaRef,
    left: Box<PhysicalOperator>,
    right: Option<Box<PhysicalOperator>>,
    join_type: JoinType,
    on: Vec<(BoundExpression, BoundExpression)>,
    filter: Option<BoundExpression>,
    ctx: Arc<ExecutionContext>,
    reservation: MemoryReservation,
    build: Option<BuildSide>,
    state: JoinState,
}

impl JoinOperator {
    /// Creates a new join operator.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        id: String,
        schema: SchemaRef,
        left: Box<PhysicalOperator>,
        right: Box<PhysicalOperator>,
        join_type: JoinType,
        on: Vec<(BoundExpression, BoundExpression)>,
        filter: Option<BoundExpression>,
        ctx: Arc<ExecutionContext>,
    ) -> Self {
        let reservation = ctx.reservation();
        JoinOperator {
            id,
            schema,
            left,
            right: Some(right),
            join_type,
            on,
            filter,
            ctx,
            reservation,
            build: None,
            state: JoinState::Building,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Returns true while the build side is held in memory.
    pub fn has_buffered_state(&self) -> bool {
        self.build.is_some()
    }

    pub fn next_batch(&mut self) -> Result<Option<ResultBatch>> {
        loop {
            match &mut self.state {
                JoinState::Building => {
                    self.build_side()?;
                    self.state = JoinState::Probing;
                }
                JoinState::Probing => {
                    let Some(left) = self.left.next_batch()? else {
                        self.finish_probe();
                        continue;
                    };
                    if let Some(batch) = self.probe(&left).with_operator(&self.id)? {
                        return Ok(Some(batch));
                    }
                }
                JoinState::EmittingUnmatched { indices, offset } => {
                    if *offset >= indices.len() {
                        self.release();
                        continue;
                    }
                    let end = (*offset + self.ctx.batch_size()).min(indices.len());
                    let chunk = UInt32Array::from(indices[*offset..end].to_vec());
                    *offset = end;
                    return self.pad_left(&chunk).map(Some).with_operator(&self.id);
                }
                JoinState::Done => return Ok(None),
            }
        }
    }

    /// Drains the right input and hashes it.
    fn build_side(&mut self) -> Result<()> {
        let Some(mut right) = self.right.take() else {
            return Ok(());
        };
        let right_schema = Arc::clone(right.schema());
        let mut batches = Vec::new();
        while let Some(batch) = right.next_batch()? {
            self.reservation
                .grow(batch.memory_size())
                .with_operator(&self.id)?;
            batches.push(batch);
        }
        drop(right);

        let build = self.hash_build(right_schema, &batches).with_operator(&self.id)?;
        debug!(
            execution_id = %self.ctx.execution_id(),
            operator = %self.id,
            rows = build.batch.num_rows(),
            keys = build.table.len(),
            "join build side ready"
        );
        self.build = Some(build);
        Ok(())
    }

    fn hash_build(&mut self, schema: SchemaRef, batches: &[ResultBatch]) -> ExecResult<BuildSide> {
        let fields = self.key_fields();
        let right_keys: Vec<&BoundExpression> = self.on.iter().map(|(_, right)| right).collect();
        let encode = |batch: &ResultBatch| encode_keys(&fields, &right_keys, batch);

        let mut table: HashMap<Box<[u8]>, Vec<u32>> = HashMap::new();
        if !self.on.is_empty() {
            let encoded = if self.ctx.config().parallel && batches.len() > 1 {
                batches.par_iter().map(encode).collect::<ExecResult<Vec<_>>>()?
            } else {
                batches.iter().map(encode).collect::<ExecResult<Vec<_>>>()?
            };

            let mut retained = 0;
            let mut row_index: u32 = 0;
            for keys in encoded {
                for key in keys {
                    if let Some(key) = key {
                        retained += key.len() + size_of::<u32>();
                        table.entry(key).or_default().push(row_index);
                    }
                    row_index += 1;
                }
            }
            self.reservation.grow(retained)?;
        }

        let batch = ResultBatch::concat(schema, batches)?;
        let matched = vec![false; batch.num_rows()];
        Ok(BuildSide {
            batch,
            table,
            matched,
        })
    }

    fn key_fields(&self) -> Vec<SortField> {
        self.on
            .iter()
            .map(|(left, _)| SortField::new(left.data_type().to_arrow()))
            .collect()
    }

    /// Joins one left batch against the build side.
    fn probe(&mut self, left: &ResultBatch) -> ExecResult<Option<ResultBatch>> {
        let fields = self.key_fields();
        let left_keys: Vec<&BoundExpression> = self.on.iter().map(|(left, _)| left).collect();
        let build = self
            .build
            .as_mut()
            .ok_or_else(|| ExecutionCause::InvalidData("join probed before build".into()))?;

        let mut left_indices: Vec<u32> = Vec::new();
        let mut right_indices: Vec<u32> = Vec::new();
        if left_keys.is_empty() {
            for i in 0..to_u32(left.num_rows())? {
                for j in 0..to_u32(build.batch.num_rows())? {
                    left_indices.push(i);
                    right_indices.push(j);
                }
            }
        } else {
            let keys = encode_keys(&fields, &left_keys, left)?;
            for (i, key) in keys.iter().enumerate() {
                let Some(matches) = key.as_ref().and_then(|k| build.table.get(k)) else {
                    continue;
                };
                let i = to_u32(i)?;
                for &j in matches {
                    left_indices.push(i);
                    right_indices.push(j);
                }
            }
        }

        let left_indices = UInt32Array::from(left_indices);
        let right_indices = UInt32Array::from(right_indices);
        let mut pairs = combine(
            &self.schema,
            left.take(&left_indices)?,
            build.batch.take(&right_indices)?,
        )?;

        // Residual predicate: pairs it rejects count as unmatched.
        let (left_indices, right_indices) = match &self.filter {
            Some(filter) if !pairs.is_empty() => {
                let mask = VectorizedEvaluator::evaluate_predicate(filter, &pairs)?;
                pairs = pairs.filter(&mask)?;
                let keep = |indices: &UInt32Array| -> Vec<u32> {
                    indices
                        .iter()
                        .zip(mask.iter())
                        .filter_map(|(index, selected)| if selected == Some(true) { index } else { None })
                        .collect()
                };
                (keep(&left_indices), keep(&right_indices))
            }
            _ => (left_indices.values().to_vec(), right_indices.values().to_vec()),
        };

        for &j in &right_indices {
            build.matched[j as usize] = true;
        }

        let mut parts = Vec::with_capacity(2);
        if !pairs.is_empty() {
            parts.push(pairs);
        }
        if self.join_type.keeps_left() {
            let mut matched = vec![false; left.num_rows()];
            for &i in &left_indices {
                matched[i as usize] = true;
            }
            let unmatched = matched
                .iter()
                .enumerate()
                .filter(|(_, m)| !**m)
                .map(|(i, _)| to_u32(i))
                .collect::<ExecResult<Vec<u32>>>()?;
            if !unmatched.is_empty() {
                let rows = left.take(&UInt32Array::from(unmatched))?;
                let right_schema = build.batch.schema();
                let nulls = right_schema
                    .columns()
                    .iter()
                    .map(|c| Vector::nulls(c.data_type, rows.num_rows()))
                    .collect();
                parts.push(combine_columns(&self.schema, rows.into_columns(), nulls)?);
            }
        }

        match parts.len() {
            0 => Ok(None),
            _ => ResultBatch::concat(Arc::clone(&self.schema), &parts).map(Some),
        }
    }

    /// Right rows without a partner, with null left columns.
    fn pad_left(&self, indices: &UInt32Array) -> ExecResult<ResultBatch> {
        let build = self
            .build
            .as_ref()
            .ok_or_else(|| ExecutionCause::InvalidData("join build side released".into()))?;
        let nulls = self
            .left
            .schema()
            .columns()
            .iter()
            .map(|c| Vector::nulls(c.data_type, indices.len()))
            .collect();
        let rows = build.batch.take(indices)?;
        combine_columns(&self.schema, nulls, rows.into_columns())
    }

    fn finish_probe(&mut self) {
        let unmatched: Vec<u32> = match &self.build {
            Some(build) if self.join_type.keeps_right() => build
                .matched
                .iter()
                .enumerate()
                .filter(|(_, m)| !**m)
                .filter_map(|(j, _)| u32::try_from(j).ok())
                .collect(),
            _ => Vec::new(),
        };
        if unmatched.is_empty() {
            self.release();
        } else {
            self.state = JoinState::EmittingUnmatched {
                indices: unmatched,
                offset: 0,
            };
        }
    }

    fn release(&mut self) {
        self.build = None;
        self.reservation.free();
        self.state = JoinState::Done;
    }
}

/// Row-encodes the join keys of a batch; `None` marks rows with a null key.
fn encode_keys(
    fields: &[SortField],
    exprs: &[&BoundExpression],
    batch: &ResultBatch,
) -> ExecResult<Vec<Option<Box<[u8]>>>> {
    let arrays = exprs
        .iter()
        .map(|expr| VectorizedEvaluator::evaluate(expr, batch)?.decode())
        .collect::<ExecResult<Vec<ArrayRef>>>()?;
    let converter = RowConverter::new(fields.to_vec())?;
    let rows = converter.convert_columns(&arrays)?;
    Ok(rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            if arrays.iter().any(|a| a.is_null(i)) {
                None
            } else {
                Some(Box::from(row.as_ref()))
            }
        })
        .collect())
}

fn combine(schema: &SchemaRef, left: ResultBatch, right: ResultBatch) -> ExecResult<ResultBatch> {
    combine_columns(schema, left.into_columns(), right.into_columns())
}

fn combine_columns(schema: &SchemaRef, mut left: Vec<Vector>, right: Vec<Vector>) -> ExecResult<ResultBatch> {
    left.extend(right);
    ResultBatch::try_new(Arc::clone(schema), left)
}

fn to_u32(index: usize) -> ExecResult<u32> {
    u32::try_from(index)
        .map_err(|_| ExecutionCause::InvalidData(format!("row index {index} exceeds u32 range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::ComparisonOp;
    use crate::catalog::{Catalog, ColumnDef, Schema};
    use crate::executor::{ExecutorConfig, ValuesOperator};
    use crate::types::{DataType, Value};

    fn values(name: &str, schema: Schema, rows: Vec<Vec<Value>>) -> Box<PhysicalOperator> {
        Box::new(PhysicalOperator::Values(ValuesOperator::new(
            name.into(),
            Arc::new(schema),
            rows,
            2,
        )))
    }

    fn people() -> Box<PhysicalOperator> {
        values(
            "people",
            Schema::new(vec![
                ColumnDef::new("name", DataType::String),
                ColumnDef::new("city_id", DataType::Int64),
            ]),
            vec![
                vec![Value::String("ann".into()), Value::Int64(1)],
                vec![Value::String("bob".into()), Value::Int64(2)],
                vec![Value::String("cid".into()), Value::Null],
                vec![Value::String("dan".into()), Value::Int64(1)],
            ],
        )
    }

    fn cities() -> Box<PhysicalOperator> {
        values(
            "cities",
            Schema::new(vec![
                ColumnDef::new("id", DataType::Int64),
                ColumnDef::new("city", DataType::String),
            ]),
            vec![
                vec![Value::Int64(1), Value::String("Oslo".into())],
                vec![Value::Int64(3), Value::String("Lima".into())],
                vec![Value::Null, Value::String("Nowhere".into())],
            ],
        )
    }

    fn join(join_type: JoinType, filter: Option<BoundExpression>, config: ExecutorConfig) -> Vec<Vec<Value>> {
        let left = people();
        let right = cities();
        let left_schema = if join_type.keeps_right() {
            left.schema().to_nullable()
        } else {
            left.schema().as_ref().clone()
        };
        let right_schema = if join_type.keeps_left() {
            right.schema().to_nullable()
        } else {
            right.schema().as_ref().clone()
        };
        let schema = Arc::new(left_schema.join(&right_schema));
        let on = vec![(
            BoundExpression::column(1, "city_id", DataType::Int64, true),
            BoundExpression::column(0, "id", DataType::Int64, true),
        )];
        let ctx = ExecutionContext::new(config, Arc::new(Catalog::new()));
        let mut op = JoinOperator::new("j".into(), schema, left, right, join_type, on, filter, ctx);
        let mut rows = Vec::new();
        while let Some(batch) = op.next_batch().unwrap() {
            rows.extend(batch.to_rows().unwrap());
        }
        assert!(!op.has_buffered_state());
        rows.sort_by_key(|r| r.iter().map(ToString::to_string).collect::<Vec<_>>());
        rows
    }

    fn s(v: &str) -> Value {
        Value::String(v.into())
    }

    #[test]
    fn test_inner_join_skips_null_keys() {
        let rows = join(JoinType::Inner, None, ExecutorConfig::default());
        assert_eq!(
            rows,
            vec![
                vec![s("ann"), Value::Int64(1), Value::Int64(1), s("Oslo")],
                vec![s("dan"), Value::Int64(1), Value::Int64(1), s("Oslo")],
            ]
        );
    }

    #[test]
    fn test_left_join_pads_right() {
        let rows = join(JoinType::Left, None, ExecutorConfig::default().with_parallel(false));
        assert_eq!(rows.len(), 4);
        assert!(rows.contains(&vec![s("bob"), Value::Int64(2), Value::Null, Value::Null]));
        assert!(rows.contains(&vec![s("cid"), Value::Null, Value::Null, Value::Null]));
    }

    #[test]
    fn test_right_and_full_join_pad_left() {
        let right = join(JoinType::Right, None, ExecutorConfig::default());
        assert_eq!(right.len(), 4);
        assert!(right.contains(&vec![Value::Null, Value::Null, Value::Int64(3), s("Lima")]));
        assert!(right.contains(&vec![Value::Null, Value::Null, Value::Null, s("Nowhere")]));

        let full = join(JoinType::Full, None, ExecutorConfig::default().with_batch_size(1));
        assert_eq!(full.len(), 6);
    }

    #[test]
    fn test_residual_filter_unmatches_rows() {
        let filter = BoundExpression::comparison(
            BoundExpression::column(0, "name", DataType::String, true),
            ComparisonOp::Eq,
            BoundExpression::literal(s("dan"), DataType::String),
        );
        let rows = join(JoinType::Left, Some(filter), ExecutorConfig::default());
        assert!(rows.contains(&vec![s("dan"), Value::Int64(1), Value::Int64(1), s("Oslo")]));
        assert!(rows.contains(&vec![s("ann"), Value::Int64(1), Value::Null, Value::Null]));
        assert_eq!(rows.len(), 4);
    }

    #[test]
    fn test_nested_loop_without_keys() {
        let schema = Arc::new(people().schema().join(cities().schema()));
        let ctx = ExecutionContext::new(ExecutorConfig::default(), Arc::new(Catalog::new()));
        let mut op = JoinOperator::new(
            "j".into(),
            schema,
            people(),
            cities(),
            JoinType::Inner,
            Vec::new(),
            None,
            ctx,
        );
        let mut total = 0;
        while let Some(batch) = op.next_batch().unwrap() {
            total += batch.num_rows();
        }
        assert_eq!(total, 12);
    }

    #[test]
    fn test_build_side_memory_limit() {
        let ctx = ExecutionContext::new(
            ExecutorConfig::default().with_memory_limit(1),
            Arc::new(Catalog::new()),
        );
        let schema = Arc::new(people().schema().join(cities().schema()));
        let mut op = JoinOperator::new(
            "j".into(),
            schema,
            people(),
            cities(),
            JoinType::Inner,
            Vec::new(),
            None,
            ctx,
        );
        assert_eq!(op.next_batch().unwrap_err().operator(), Some("j"));
    }
}
