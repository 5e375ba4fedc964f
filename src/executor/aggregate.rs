//! Hash aggregate operator.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::mem::size_of;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, Float64Array, Int64Array};
use arrow::compute::cast;
use arrow::datatypes::{DataType as ArrowDataType, Float64Type, Int64Type};
use arrow::error::ArrowError;
use arrow::row::{RowConverter, Rows, SortField};
use tracing::debug;

use super::{ExecutionContext, MemoryReservation, PhysicalOperator, VectorizedEvaluator, WithOperator};
use crate::binder::{AggregateExpr, AggregateFunction, BoundExpression};
use crate::catalog::SchemaRef;
use crate::error::{ExecResult, ExecutionCause, Result};
use crate::types::{DataType, Value};
use crate::vector::{ResultBatch, Vector};

/// Current minimum or maximum of a group.
#[derive(Debug)]
struct Extreme {
    /// Row encoding of `value`; byte order is value order.
    key: Box<[u8]>,
    value: Value,
}

/// Running state of one aggregate for one group.
///
/// Distinctness and ordering both follow the Arrow row encoding, the same
/// rule group keys use: `-0.0` and `0.0` are different values, and NaN
/// sorts above every other float.
#[derive(Debug)]
enum Accumulator {
    CountRows(i64),
    Count(i64),
    CountDistinct(HashSet<Box<[u8]>>),
    SumInt(Option<i64>),
    SumFloat(Option<f64>),
    Avg { sum: f64, count: i64 },
    Min(Option<Extreme>),
    Max(Option<Extreme>),
}

/// One aggregate argument of one batch, decoded once.
enum ArgColumn {
    /// `count(*)` has no argument.
    Rows,
    Any(ArrayRef),
    Int64(Int64Array),
    Float64(Float64Array),
    Encoded { array: ArrayRef, rows: Rows },
}

impl ArgColumn {
    fn prepare(
        function: AggregateFunction,
        vector: Option<&Vector>,
        converter: Option<&RowConverter>,
    ) -> ExecResult<Self> {
        let Some(vector) = vector else {
            return Ok(ArgColumn::Rows);
        };
        let array = vector.decode()?;
        Ok(match function {
            AggregateFunction::Count => ArgColumn::Any(array),
            AggregateFunction::CountDistinct | AggregateFunction::Min | AggregateFunction::Max => {
                let converter = converter.ok_or_else(|| {
                    ExecutionCause::InvalidData(format!("no row encoding for {} input", function.name()))
                })?;
                let rows = converter.convert_columns(&[Arc::clone(&array)])?;
                ArgColumn::Encoded { array, rows }
            }
            AggregateFunction::Sum if array.data_type() == &ArrowDataType::Int64 => {
                ArgColumn::Int64(array.as_primitive::<Int64Type>().clone())
            }
            AggregateFunction::Sum | AggregateFunction::Avg => {
                let floats = cast(&array, &ArrowDataType::Float64)?;
                ArgColumn::Float64(floats.as_primitive::<Float64Type>().clone())
            }
        })
    }
}

impl Accumulator {
    fn new(aggregate: &AggregateExpr) -> Self {
        let input_type = aggregate.arg.as_ref().map(BoundExpression::data_type);
        match aggregate.function {
            AggregateFunction::Count if aggregate.arg.is_none() => Accumulator::CountRows(0),
            AggregateFunction::Count => Accumulator::Count(0),
            AggregateFunction::CountDistinct => Accumulator::CountDistinct(HashSet::new()),
            AggregateFunction::Sum if input_type == Some(DataType::Int64) => Accumulator::SumInt(None),
            AggregateFunction::Sum => Accumulator::SumFloat(None),
            AggregateFunction::Avg => Accumulator::Avg { sum: 0.0, count: 0 },
            AggregateFunction::Min => Accumulator::Min(None),
            AggregateFunction::Max => Accumulator::Max(None),
        }
    }

    /// Feeds row `row` of `arg`; nulls are skipped. Returns the bytes newly
    /// retained.
    fn update(&mut self, arg: &ArgColumn, row: usize) -> ExecResult<usize> {
        match (self, arg) {
            (Accumulator::CountRows(n), _) => *n += 1,
            (Accumulator::Count(n), ArgColumn::Any(array)) => {
                if array.is_valid(row) {
                    *n += 1;
                }
            }
            (Accumulator::CountDistinct(seen), ArgColumn::Encoded { array, rows }) => {
                if array.is_valid(row) {
                    let key = rows.row(row);
                    let key: &[u8] = key.as_ref();
                    if !seen.contains(key) {
                        seen.insert(key.into());
                        return Ok(key.len() + size_of::<Box<[u8]>>());
                    }
                }
            }
            (Accumulator::SumInt(sum), ArgColumn::Int64(values)) => {
                if values.is_valid(row) {
                    let v = values.value(row);
                    let next = sum.unwrap_or(0).checked_add(v).ok_or_else(|| {
                        ArrowError::ArithmeticOverflow(format!("sum overflowed INT64 adding {v}"))
                    })?;
                    *sum = Some(next);
                }
            }
            (Accumulator::SumFloat(sum), ArgColumn::Float64(values)) => {
                if values.is_valid(row) {
                    *sum = Some(sum.unwrap_or(0.0) + values.value(row));
                }
            }
            (Accumulator::Avg { sum, count }, ArgColumn::Float64(values)) => {
                if values.is_valid(row) {
                    *sum += values.value(row);
                    *count += 1;
                }
            }
            (Accumulator::Min(current), ArgColumn::Encoded { array, rows }) => {
                replace_extreme(current, array, rows, row, Ordering::Less)?;
            }
            (Accumulator::Max(current), ArgColumn::Encoded { array, rows }) => {
                replace_extreme(current, array, rows, row, Ordering::Greater)?;
            }
            (accumulator, _) => {
                return Err(ExecutionCause::InvalidData(format!(
                    "aggregate input does not match accumulator {accumulator:?}"
                )))
            }
        }
        Ok(0)
    }

    fn finish(&self) -> Value {
        match self {
            Accumulator::CountRows(n) | Accumulator::Count(n) => Value::Int64(*n),
            Accumulator::CountDistinct(seen) => Value::Int64(seen.len() as i64),
            Accumulator::SumInt(sum) => sum.map_or(Value::Null, Value::Int64),
            Accumulator::SumFloat(sum) => sum.map_or(Value::Null, Value::Float64),
            Accumulator::Avg { sum, count } => {
                if *count == 0 {
                    Value::Null
                } else {
                    Value::Float64(*sum / *count as f64)
                }
            }
            Accumulator::Min(extreme) | Accumulator::Max(extreme) => {
                extreme.as_ref().map_or(Value::Null, |e| e.value.clone())
            }
        }
    }
}

/// Keeps row `row` if it orders `wanted` relative to the current extreme.
fn replace_extreme(
    current: &mut Option<Extreme>,
    array: &ArrayRef,
    rows: &Rows,
    row: usize,
    wanted: Ordering,
) -> ExecResult<()> {
    if array.is_null(row) {
        return Ok(());
    }
    let key = rows.row(row);
    let key: &[u8] = key.as_ref();
    if let Some(best) = current {
        if Ord::cmp(key, &*best.key) != wanted {
            return Ok(());
        }
    }
    *current = Some(Extreme {
        key: key.into(),
        value: Value::from_array(array.as_ref(), row)?,
    });
    Ok(())
}

fn value_size(value: &Value) -> usize {
    size_of::<Value>() + value.as_string().map_or(0, str::len)
}

enum AggregateState {
    Accumulating,
    Emitting { output: ResultBatch, offset: usize },
    Done,
}

/// Hash aggregate. Consumes its whole input before emitting.
///
/// Groups are keyed by the Arrow row encoding of the group values, so nulls
/// group together. A global aggregate (no group keys) always emits exactly
/// one row.
pub struct AggregateOperator {
    id: String,
    schema: SchemaRef,
    input: Option<Box<PhysicalOperator>>,
    group_by: Vec<(String, BoundExpression)>,
    aggregates: Vec<AggregateExpr>,
    ctx: Arc<ExecutionContext>,
    reservation: MemoryReservation,
    /// Row-encoded group key to group index.
    groups: HashMap<Box<[u8]>, usize>,
    /// Group key values by group index.
    group_keys: Vec<Vec<Value>>,
    /// Accumulators by group index, then aggregate.
    accumulators: Vec<Vec<Accumulator>>,
    state: AggregateState,
}

impl AggregateOperator {
    /// Creates a new aggregate operator.
    #[must_use]
    pub fn new(
        id: String,
        schema: SchemaRef,
        input: Box<PhysicalOperator>,
        group_by: Vec<(String, BoundExpression)>,
        aggregates: Vec<AggregateExpr>,
        ctx: Arc<ExecutionContext>,
    ) -> Self {
        let reservation = ctx.reservation();
        let mut op = AggregateOperator {
            id,
            schema,
            input: Some(input),
            group_by,
            aggregates,
            ctx,
            reservation,
            groups: HashMap::new(),
            group_keys: Vec::new(),
            accumulators: Vec::new(),
            state: AggregateState::Accumulating,
        };
        if op.group_by.is_empty() {
            op.new_group(Vec::new());
        }
        op
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Returns true while groups are held in memory.
    pub fn has_buffered_state(&self) -> bool {
        match self.state {
            AggregateState::Accumulating => self.reservation.size() > 0,
            AggregateState::Emitting { .. } => true,
            AggregateState::Done => false,
        }
    }

    pub fn next_batch(&mut self) -> Result<Option<ResultBatch>> {
        if matches!(self.state, AggregateState::Accumulating) {
            self.consume_input()?;
            let output = self.build_output().with_operator(&self.id)?;
            debug!(
                execution_id = %self.ctx.execution_id(),
                operator = %self.id,
                groups = self.group_keys.len(),
                "aggregation complete"
            );
            self.release_groups();
            self.state = AggregateState::Emitting { output, offset: 0 };
        }

        let batch_size = self.ctx.batch_size();
        let AggregateState::Emitting { output, offset } = &mut self.state else {
            return Ok(None);
        };
        if *offset >= output.num_rows() {
            self.state = AggregateState::Done;
            return Ok(None);
        }
        let len = batch_size.min(output.num_rows() - *offset);
        let batch = output.slice(*offset, len);
        *offset += len;
        Ok(Some(batch))
    }

    fn consume_input(&mut self) -> Result<()> {
        let Some(mut input) = self.input.take() else {
            return Ok(());
        };
        let converters = self.converters().with_operator(&self.id)?;
        while let Some(batch) = input.next_batch()? {
            self.accumulate(&converters, &batch).with_operator(&self.id)?;
        }
        Ok(())
    }

    /// Row converters for the group keys, then one per aggregate that
    /// compares its input values.
    fn converters(&self) -> ExecResult<(RowConverter, Vec<Option<RowConverter>>)> {
        let groups = RowConverter::new(
            self.group_by
                .iter()
                .map(|(_, expr)| SortField::new(expr.data_type().to_arrow()))
                .collect(),
        )?;
        let args = self
            .aggregates
            .iter()
            .map(|agg| match (agg.function, &agg.arg) {
                (
                    AggregateFunction::CountDistinct | AggregateFunction::Min | AggregateFunction::Max,
                    Some(arg),
                ) => RowConverter::new(vec![SortField::new(arg.data_type().to_arrow())]).map(Some),
                _ => Ok(None),
            })
            .collect::<std::result::Result<Vec<_>, ArrowError>>()?;
        Ok((groups, args))
    }

    fn accumulate(
        &mut self,
        (group_converter, arg_converters): &(RowConverter, Vec<Option<RowConverter>>),
        batch: &ResultBatch,
    ) -> ExecResult<()> {
        let exprs = self
            .group_by
            .iter()
            .map(|(_, expr)| expr)
            .chain(self.aggregates.iter().filter_map(|agg| agg.arg.as_ref()));
        let mut evaluated =
            VectorizedEvaluator::evaluate_all(exprs, batch, self.ctx.config().parallel)?.into_iter();
        let keys: Vec<Vector> = evaluated.by_ref().take(self.group_by.len()).collect();
        let args = self
            .aggregates
            .iter()
            .zip(arg_converters)
            .map(|(agg, converter)| {
                let vector = agg.arg.as_ref().and_then(|_| evaluated.next());
                ArgColumn::prepare(agg.function, vector.as_ref(), converter.as_ref())
            })
            .collect::<ExecResult<Vec<_>>>()?;

        let group_ids = self.assign_groups(group_converter, &keys, batch.num_rows())?;

        let mut retained = 0;
        for (row, &group) in group_ids.iter().enumerate() {
            for (accumulator, arg) in self.accumulators[group].iter_mut().zip(&args) {
                retained += accumulator.update(arg, row)?;
            }
        }
        self.reservation.grow(retained)
    }

    /// Maps every row to its group index, creating groups as needed.
    fn assign_groups(
        &mut self,
        converter: &RowConverter,
        keys: &[Vector],
        num_rows: usize,
    ) -> ExecResult<Vec<usize>> {
        if keys.is_empty() {
            return Ok(vec![0; num_rows]);
        }
        let arrays = keys.iter().map(Vector::decode).collect::<ExecResult<Vec<ArrayRef>>>()?;
        let rows = converter.convert_columns(&arrays)?;

        let mut retained = 0;
        let mut group_ids = Vec::with_capacity(num_rows);
        for (i, row) in rows.iter().enumerate() {
            let encoded: &[u8] = row.as_ref();
            let group = match self.groups.get(encoded) {
                Some(&group) => group,
                None => {
                    let values = keys.iter().map(|k| k.value_at(i)).collect::<ExecResult<Vec<_>>>()?;
                    retained += encoded.len() + values.iter().map(value_size).sum::<usize>();
                    let group = self.new_group(values);
                    self.groups.insert(encoded.into(), group);
                    group
                }
            };
            group_ids.push(group);
        }
        self.reservation.grow(retained)?;
        Ok(group_ids)
    }

    fn new_group(&mut self, key: Vec<Value>) -> usize {
        self.group_keys.push(key);
        self.accumulators
            .push(self.aggregates.iter().map(Accumulator::new).collect());
        self.group_keys.len() - 1
    }

    fn build_output(&self) -> ExecResult<ResultBatch> {
        let key_columns = self.group_by.iter().enumerate().map(|(j, (_, expr))| {
            let values: Vec<Value> = self.group_keys.iter().map(|key| key[j].clone()).collect();
            Vector::plain(Value::build_array(expr.data_type(), &values)?)
        });
        let aggregate_columns = self.aggregates.iter().enumerate().map(|(j, agg)| {
            let values: Vec<Value> = self.accumulators.iter().map(|accs| accs[j].finish()).collect();
            Vector::plain(Value::build_array(agg.data_type(), &values)?)
        });
        let columns = key_columns
            .chain(aggregate_columns)
            .collect::<ExecResult<Vec<_>>>()?;
        ResultBatch::try_new(Arc::clone(&self.schema), columns)
    }

    fn release_groups(&mut self) {
        self.groups = HashMap::new();
        self.group_keys = Vec::new();
        self.accumulators = Vec::new();
        self.reservation.free();
    }
}

impl std::fmt::Debug for AggregateOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateOperator")
            .field("id", &self.id)
            .field("groups", &self.group_keys.len())
            .field("reserved", &self.reservation.size())
            .finish_non_exhaustive()
    }
}
