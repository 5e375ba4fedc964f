//! Contract tests for the public API (Engine.query) and the Arrow interchange
//! format.

use std::collections::HashMap;
use std::sync::Arc;

use vexel::{
    ColumnDef, ColumnEncoding, DataType, DictionaryMode, Engine, ExecutorConfig, InterchangeAdapter,
    MemTable, QueryResult, ResultBatch, Schema, Value, Vector, VexelError,
};

const ALPHABET: [&str; 4] = ["a", "b", "c", "d"];

fn table_schema() -> Schema {
    Schema::new(vec![
        ColumnDef::new("tag", DataType::String),
        ColumnDef::new("n", DataType::Int64),
    ])
}

/// Builds a `(tag, n)` table; with `dictionary` the tag column is dictionary
/// encoded.
fn build_table(rows: &[(Option<usize>, i64)], dictionary: bool) -> MemTable {
    let schema = Arc::new(table_schema());
    let values: Vec<Vec<Value>> = rows
        .iter()
        .map(|(tag, n)| {
            vec![
                tag.map_or(Value::Null, |t| Value::String(ALPHABET[t].to_string())),
                Value::Int64(*n),
            ]
        })
        .collect();
    let batch = ResultBatch::from_rows(Arc::clone(&schema), &values).expect("build batch");
    let batch = if dictionary {
        let mut columns = batch.into_columns();
        let tags = columns[0].decode().expect("decode tags");
        columns[0] = Vector::dictionary_encode(tags.as_ref()).expect("encode tags");
        ResultBatch::try_new(Arc::clone(&schema), columns).expect("rebuild batch")
    } else {
        batch
    };
    MemTable::try_new(schema, vec![batch]).expect("build table")
}

fn engine_with(rows: &[(Option<usize>, i64)], dictionary: bool, batch_size: usize) -> Engine {
    let engine = Engine::with_config(ExecutorConfig::new().with_batch_size(batch_size));
    engine
        .register_table("t", build_table(rows, dictionary))
        .expect("register table");
    engine
}

fn multiset(result: &QueryResult) -> HashMap<Vec<Value>, usize> {
    let mut counts = HashMap::new();
    for row in result.rows().expect("read rows") {
        *counts.entry(row).or_insert(0) += 1;
    }
    counts
}

// =============================================================================
// Execution Contract Tests
// =============================================================================

mod execution_contracts {
    use super::*;
    use proptest::prelude::*;

    fn rows_strategy() -> impl Strategy<Value = Vec<(Option<usize>, i64)>> {
        proptest::collection::vec((proptest::option::of(0..ALPHABET.len()), -50i64..50), 0..40)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        /// Property: dictionary encoding never changes query results
        #[test]
        fn test_dictionary_results_equal_plain(rows in rows_strategy(), batch_size in 1usize..8) {
            let plans = [
                r#"{"op": "filter",
                    "predicate": {"call": "neq", "args": [{"column": "tag"}, {"literal": "b"}]},
                    "input": {"op": "scan", "source": "t"}}"#,
                r#"{"op": "aggregate",
                    "group_by": [{"name": "tag", "expr": {"column": "tag"}}],
                    "aggregates": [
                        {"name": "rows", "function": "count"},
                        {"name": "total", "function": "sum", "arg": {"column": "n"}},
                        {"name": "low", "function": "min", "arg": {"column": "n"}}
                    ],
                    "input": {"op": "scan", "source": "t"}}"#,
                r#"{"op": "aggregate",
                    "aggregates": [{"name": "tags", "function": "count_distinct", "arg": {"column": "tag"}}],
                    "input": {"op": "scan", "source": "t"}}"#,
            ];
            let plain = engine_with(&rows, false, batch_size);
            let dictionary = engine_with(&rows, true, batch_size);
            for plan in plans {
                let expected = multiset(&plain.query(plan).expect("plain query"));
                let actual = multiset(&dictionary.query(plan).expect("dictionary query"));
                prop_assert_eq!(expected, actual);
            }
        }

        /// Property: limit returns the rows at [offset, offset + fetch) in order
        #[test]
        fn test_limit_window(rows in rows_strategy(), offset in 0usize..10, fetch in 0usize..10) {
            let engine = engine_with(&rows, false, 3);
            let plan = serde_json::json!({
                "op": "limit", "offset": offset, "fetch": fetch,
                "input": {"op": "scan", "source": "t"}
            });
            let result = engine.query(&plan.to_string()).expect("limit query");
            let actual: Vec<i64> = result
                .rows()
                .expect("read rows")
                .iter()
                .map(|r| r[1].as_int64().expect("int"))
                .collect();
            let expected: Vec<i64> = rows.iter().map(|(_, n)| *n).skip(offset).take(fetch).collect();
            prop_assert_eq!(actual, expected);
        }

        /// Property: sort output is an ordered permutation with nulls last
        #[test]
        fn test_sort_orders_and_permutes(rows in rows_strategy(), batch_size in 1usize..8) {
            let engine = engine_with(&rows, true, batch_size);
            let result = engine
                .query(
                    r#"{"op": "sort", "keys": [{"expr": {"column": "tag"}}],
                        "input": {"op": "scan", "source": "t"}}"#,
                )
                .expect("sort query");
            let actual: Vec<(Option<usize>, i64)> = result
                .rows()
                .expect("read rows")
                .iter()
                .map(|r| {
                    let tag = r[0].as_string().map(|s| ALPHABET.iter().position(|a| *a == s).expect("known tag"));
                    (tag, r[1].as_int64().expect("int"))
                })
                .collect();

            // Stable: equal tags keep input order.
            let mut expected = rows.clone();
            expected.sort_by_key(|(tag, _)| (tag.is_none(), *tag));
            prop_assert_eq!(actual, expected);
        }

        /// Property: no batch exceeds the configured batch size
        #[test]
        fn test_batches_bounded(rows in rows_strategy(), batch_size in 1usize..8) {
            let engine = engine_with(&rows, false, batch_size);
            let result = engine
                .query(
                    r#"{"op": "project",
                        "exprs": [{"name": "twice", "expr": {"call": "mul", "args": [{"column": "n"}, {"literal": 2}]}}],
                        "input": {"op": "scan", "source": "t"}}"#,
                )
                .expect("project query");
            prop_assert_eq!(result.row_count(), rows.len());
            prop_assert!(result.batches().iter().all(|b| b.num_rows() <= batch_size && !b.is_empty()));
        }
    }

    #[test]
    fn test_stream_schema_known_before_execution() {
        let engine = engine_with(&[(Some(0), 1)], false, 4);
        let stream = engine
            .execute_json(
                r#"{"op": "project",
                    "exprs": [{"name": "big", "expr": {"call": "gt", "args": [{"column": "n"}, {"literal": 0}]}}],
                    "input": {"op": "scan", "source": "t"}}"#,
            )
            .expect("start execution");
        assert_eq!(stream.schema().names(), vec!["big"]);
        assert_eq!(stream.schema().column(0).unwrap().data_type, DataType::Bool);
    }

    #[test]
    fn test_failing_child_keeps_its_operator_id() {
        let engine = engine_with(&[(Some(0), 1)], false, 4);
        let err = engine
            .query(
                r#"{"op": "project", "id": "outer",
                    "exprs": [{"name": "n", "expr": {"column": "n"}}],
                    "input": {"op": "filter", "id": "inner",
                        "predicate": {"call": "gt", "args": [
                            {"call": "div", "args": [{"column": "n"}, {"literal": 0}]},
                            {"literal": 1}]},
                        "input": {"op": "scan", "source": "t"}}}"#,
            )
            .expect_err("division by zero");
        assert_eq!(err.operator(), Some("inner"));
    }

    #[test]
    fn test_each_execution_has_its_own_id() {
        let engine = engine_with(&[], false, 4);
        let plan = r#"{"op": "scan", "source": "t"}"#;
        let a = engine.execute_json(plan).expect("first");
        let b = engine.execute_json(plan).expect("second");
        assert_ne!(a.execution_id(), b.execution_id());
    }
}

// =============================================================================
// Interchange Contract Tests
// =============================================================================

mod interchange_contracts {
    use super::*;
    use arrow::array::Array;
    use arrow::datatypes::DataType as ArrowDataType;
    use arrow::ipc::reader::StreamReader;
    use vexel::interchange::{write_ipc_stream, ENCODING_METADATA_KEY};

    fn result(dictionary: bool) -> QueryResult {
        let rows = [(Some(0), 1), (None, 2), (Some(2), 3), (Some(0), 4)];
        engine_with(&rows, dictionary, 16)
            .query(
                r#"{"op": "project",
                    "exprs": [
                        {"name": "tag", "expr": {"column": "tag"}},
                        {"name": "n", "expr": {"column": "n"}},
                        {"name": "one", "expr": {"literal": 1}}
                    ],
                    "input": {"op": "scan", "source": "t"}}"#,
            )
            .expect("query")
    }

    #[test]
    fn test_preserve_mode_keeps_dictionary() {
        let result = result(true);
        let converted = InterchangeAdapter::new(DictionaryMode::Preserve)
            .convert(&result.batches()[0])
            .expect("convert");

        assert_eq!(
            converted.encodings(),
            &[ColumnEncoding::Dictionary, ColumnEncoding::Plain, ColumnEncoding::Plain]
        );
        let schema = converted.schema();
        assert!(matches!(schema.field(0).data_type(), ArrowDataType::Dictionary(_, _)));
        assert_eq!(
            schema.field(0).metadata().get(ENCODING_METADATA_KEY).map(String::as_str),
            Some("dictionary")
        );
        // Constants are materialized.
        assert_eq!(schema.field(2).data_type(), &ArrowDataType::Int64);
        assert_eq!(converted.record_batch().column(2).len(), 4);
    }

    #[test]
    fn test_modes_agree_on_logical_values() {
        let result = result(true);
        let batch = &result.batches()[0];
        let preserved = InterchangeAdapter::new(DictionaryMode::Preserve)
            .convert(batch)
            .expect("preserve");
        let decoded = InterchangeAdapter::new(DictionaryMode::Decode)
            .convert(batch)
            .expect("decode");

        assert_eq!(decoded.schema().field(0).data_type(), &ArrowDataType::Utf8);
        let from_preserved = ResultBatch::try_from_arrow(preserved.record_batch()).expect("import");
        let from_decoded = ResultBatch::try_from_arrow(decoded.record_batch()).expect("import");
        assert_eq!(from_preserved.to_rows().unwrap(), batch.to_rows().unwrap());
        assert_eq!(from_decoded.to_rows().unwrap(), batch.to_rows().unwrap());
    }

    #[test]
    fn test_null_positions_preserved() {
        let result = result(false);
        let converted = InterchangeAdapter::default()
            .convert(&result.batches()[0])
            .expect("convert");
        let tags = converted.record_batch().column(0);
        assert!(tags.is_null(1));
        assert_eq!(tags.null_count(), 1);
        assert_eq!(converted.column_encoding(0), Some(ColumnEncoding::Plain));
    }

    #[test]
    fn test_ipc_stream_round_trip() {
        let result = result(true);
        let batches: Vec<_> = result
            .batches()
            .iter()
            .map(|b| InterchangeAdapter::default().convert(b).expect("convert"))
            .collect();
        let schema = batches[0].schema();

        let mut buffer = Vec::new();
        write_ipc_stream(&mut buffer, &schema, &batches).expect("write IPC");
        let reader = StreamReader::try_new(buffer.as_slice(), None).expect("open IPC");
        let read: Vec<_> = reader.map(|b| b.expect("read batch")).collect();

        assert_eq!(read.len(), batches.len());
        assert_eq!(read[0].num_rows(), 4);
        assert_eq!(
            ColumnEncoding::of_field(read[0].schema().field(0)),
            Some(ColumnEncoding::Dictionary)
        );
    }

    #[test]
    fn test_convert_stream_is_lazy_and_ordered() {
        let engine = engine_with(&[(Some(0), 1), (Some(1), 2), (Some(2), 3)], false, 1);
        let stream = engine
            .execute_json(r#"{"op": "scan", "source": "t"}"#)
            .expect("execute");
        let mut converted = InterchangeAdapter::default().convert_stream(stream);
        let first = converted.next().expect("one batch").expect("convert");
        assert_eq!(first.num_rows(), 1);
        assert_eq!(converted.count(), 2);
    }

    #[test]
    fn test_unsupported_arrow_type_rejected() {
        let schema = Arc::new(arrow::datatypes::Schema::new(vec![arrow::datatypes::Field::new(
            "x",
            ArrowDataType::UInt16,
            false,
        )]));
        let batch = arrow::record_batch::RecordBatch::try_new(
            schema,
            vec![Arc::new(arrow::array::UInt16Array::from(vec![1u16]))],
        )
        .unwrap();
        assert!(matches!(
            ResultBatch::try_from_arrow(&batch),
            Err(VexelError::Interchange(_))
        ));
    }
}
