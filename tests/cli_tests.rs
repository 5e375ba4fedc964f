//! Tests for the `vexel` command line runner.

use std::io::Write;

use arrow::array::{Array, AsArray};
use arrow::datatypes::{DataType as ArrowDataType, Int64Type};
use arrow::ipc::reader::StreamReader;
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::NamedTempFile;

const VALUES_PLAN: &str = r#"{"op": "values",
    "schema": [{"name": "n", "type": "int64"}, {"name": "s", "type": "string"}],
    "rows": [[1, "a"], [2, null], [3, "c"]]}"#;

fn make_cli() -> Command {
    let mut cmd = Command::cargo_bin("vexel").expect("vexel binary");
    cmd.env_remove("VEXEL_BATCH_SIZE").env_remove("VEXEL_MEMORY_LIMIT");
    cmd
}

fn write_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(content.as_bytes()).expect("write temp file");
    file.flush().expect("flush temp file");
    file
}

fn read_ipc(bytes: &[u8]) -> Vec<arrow::record_batch::RecordBatch> {
    StreamReader::try_new(bytes, None)
        .expect("open IPC stream")
        .map(|b| b.expect("read batch"))
        .collect()
}

#[test]
fn test_table_format_prints_each_batch() {
    let plan = write_file(VALUES_PLAN);
    let output = make_cli()
        .arg(plan.path())
        .args(["--batch-size", "2"])
        .output()
        .expect("run vexel");
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).expect("utf8 stdout");
    let headers = stdout.lines().filter(|l| l.starts_with("| n ")).count();
    assert_eq!(headers, 2);
    assert!(stdout.contains("| 3 | c |"));
    assert!(stdout.trim_end().ends_with("(3 rows)"));
}

#[test]
fn test_table_format_empty_result_prints_schema() {
    let plan = write_file(
        r#"{"op": "filter", "predicate": {"literal": false},
            "input": {"op": "values", "schema": [{"name": "n", "type": "int64"}], "rows": [[1]]}}"#,
    );
    make_cli()
        .arg(plan.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("(0 rows)").and(predicate::str::contains("n INT64")));
}

#[test]
fn test_rows_format() {
    let plan = write_file(VALUES_PLAN);
    make_cli()
        .arg(plan.path())
        .args(["--format", "rows", "--batch-size", "1"])
        .assert()
        .success()
        .stdout("{n: 1, s: a}\n{n: 2, s: null}\n{n: 3, s: c}\n");
}

#[test]
fn test_plan_from_stdin() {
    make_cli()
        .args(["-", "--format", "rows"])
        .write_stdin(r#"{"op": "values", "schema": [{"name": "x", "type": "bool"}], "rows": [[true]]}"#)
        .assert()
        .success()
        .stdout("{x: true}\n");
}

#[test]
fn test_explain_does_not_execute() {
    let plan = write_file(
        r#"{"op": "limit", "fetch": 1, "input": {"op": "scan", "source": {"csv": "/nonexistent/data.csv"},
            "schema": [{"name": "n", "type": "int64"}]}}"#,
    );
    make_cli()
        .arg(plan.path())
        .arg("--explain")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("Limit").and(predicate::str::contains("Scan")));
}

#[test]
fn test_ipc_round_trip() {
    let plan = write_file(VALUES_PLAN);
    let output = make_cli()
        .arg(plan.path())
        .args(["--format", "ipc", "--batch-size", "2"])
        .output()
        .expect("run vexel");
    assert!(output.status.success());

    let batches = read_ipc(&output.stdout);
    assert_eq!(batches.iter().map(|b| b.num_rows()).collect::<Vec<_>>(), vec![2, 1]);
    let n = batches[1].column(0).as_primitive::<Int64Type>();
    assert_eq!(n.value(0), 3);
    assert!(batches[0].column(1).is_null(1));
}

#[test]
fn test_ipc_dictionary_modes() {
    let csv = write_file("city\nOslo\nLima\nOslo\n");
    let plan = write_file(
        &serde_json::json!({
            "op": "scan",
            "source": {"csv": csv.path(), "dictionary_columns": ["city"]},
            "schema": [{"name": "city", "type": "string"}]
        })
        .to_string(),
    );

    let preserved = make_cli()
        .arg(plan.path())
        .args(["--format", "ipc"])
        .output()
        .expect("run vexel");
    assert!(preserved.status.success());
    let batches = read_ipc(&preserved.stdout);
    assert!(matches!(batches[0].schema().field(0).data_type(), ArrowDataType::Dictionary(_, _)));

    let decoded = make_cli()
        .arg(plan.path())
        .args(["--format", "ipc", "--decode-dictionaries"])
        .output()
        .expect("run vexel");
    assert!(decoded.status.success());
    let batches = read_ipc(&decoded.stdout);
    assert_eq!(batches[0].schema().field(0).data_type(), &ArrowDataType::Utf8);
    assert_eq!(batches[0].column(0).as_string::<i32>().value(1), "Lima");
}

#[test]
fn test_ipc_empty_result_keeps_schema() {
    let plan = write_file(
        r#"{"op": "limit", "fetch": 0,
            "input": {"op": "values", "schema": [{"name": "n", "type": "int64"}], "rows": [[1]]}}"#,
    );
    let output = make_cli()
        .arg(plan.path())
        .args(["--format", "ipc"])
        .output()
        .expect("run vexel");
    assert!(output.status.success());
    let reader = StreamReader::try_new(output.stdout.as_slice(), None).expect("open IPC stream");
    assert_eq!(reader.schema().field(0).name(), "n");
    assert_eq!(reader.count(), 0);
}

#[test]
fn test_errors_exit_with_failure() {
    let plan = write_file(r#"{"op": "frobnicate"}"#);
    make_cli()
        .arg(plan.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("$.op"));

    let plan = write_file(
        r#"{"op": "project", "id": "ratio",
            "exprs": [{"name": "q", "expr": {"call": "div", "args": [{"column": "n"}, {"literal": 0}]}}],
            "input": {"op": "values", "schema": [{"name": "n", "type": "int64"}], "rows": [[1]]}}"#,
    );
    make_cli()
        .arg(plan.path())
        .args(["--format", "rows"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ratio"));
}
