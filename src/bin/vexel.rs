//! Command line runner for JSON plan documents.
//!
//! Usage: `vexel plan.json [--format table|rows|ipc] [--explain]`
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `warn`).

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use arrow::util::pretty::pretty_format_batches;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use vexel::{
    DictionaryMode, Engine, ExecutorConfig, InterchangeAdapter, IpcStreamWriter, Result, ResultStream, VexelError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Pretty-printed table.
    Table,
    /// One `{name: value, ...}` line per row.
    Rows,
    /// Arrow IPC stream on stdout.
    Ipc,
}

#[derive(Debug, Parser)]
#[command(name = "vexel", version, about = "Execute a JSON query plan")]
struct Cli {
    /// Plan document to execute; `-` reads stdin.
    plan: PathBuf,

    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Rows per batch.
    #[arg(long, env = "VEXEL_BATCH_SIZE", default_value_t = vexel::executor::DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Memory limit for buffered operator state in bytes (0 = unlimited).
    #[arg(long, env = "VEXEL_MEMORY_LIMIT", default_value_t = 0)]
    memory_limit: usize,

    /// Evaluate on the calling thread only.
    #[arg(long)]
    sequential: bool,

    /// Decode dictionary columns in the output.
    #[arg(long)]
    decode_dictionaries: bool,

    /// Print the validated plan tree instead of executing it.
    #[arg(long)]
    explain: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let document = read_plan(&cli.plan)?;
    let config = ExecutorConfig::new()
        .with_batch_size(cli.batch_size)
        .with_memory_limit(cli.memory_limit)
        .with_parallel(!cli.sequential);
    let engine = Engine::with_config(config);

    let mut out = io::stdout().lock();
    if cli.explain {
        writeln!(out, "{}", engine.explain(&document)?)?;
        return Ok(());
    }

    let stream = engine.execute_json(&document)?;
    match cli.format {
        OutputFormat::Table => write_table(&mut out, stream),
        OutputFormat::Rows => write_rows(&mut out, stream),
        OutputFormat::Ipc => {
            let mode = if cli.decode_dictionaries {
                DictionaryMode::Decode
            } else {
                DictionaryMode::Preserve
            };
            write_ipc(&mut out, stream, mode)
        }
    }
}

fn read_plan(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut document = String::new();
        io::stdin().read_to_string(&mut document)?;
        Ok(document)
    } else {
        Ok(std::fs::read_to_string(path)?)
    }
}

/// One table per batch as it is pulled, then the total row count.
fn write_table(out: &mut impl Write, stream: ResultStream) -> Result<()> {
    let adapter = InterchangeAdapter::new(DictionaryMode::Decode);
    let schema = Arc::clone(stream.schema());
    let mut rows = 0;
    for batch in stream {
        let batch = batch?;
        rows += batch.num_rows();
        let record = adapter.convert(&batch)?.into_record_batch();
        let table = pretty_format_batches(&[record]).map_err(|e| VexelError::Interchange(e.to_string()))?;
        writeln!(out, "{table}")?;
        out.flush()?;
    }
    if rows == 0 {
        writeln!(out, "{schema}")?;
    }
    writeln!(out, "({rows} rows)")?;
    Ok(())
}

fn write_rows(out: &mut impl Write, stream: ResultStream) -> Result<()> {
    for batch in stream {
        for row in batch?.rows() {
            writeln!(out, "{row}")?;
        }
        out.flush()?;
    }
    Ok(())
}

/// Streams an Arrow IPC stream whose schema is taken from the first batch.
fn write_ipc(out: &mut impl Write, stream: ResultStream, mode: DictionaryMode) -> Result<()> {
    let empty_schema = stream.schema().to_arrow();
    let mut batches = InterchangeAdapter::new(mode).convert_stream(stream).peekable();
    let schema = match batches.peek() {
        Some(Ok(first)) => first.schema(),
        _ => empty_schema,
    };
    let mut writer = IpcStreamWriter::try_new(out, schema)?;
    for batch in batches {
        writer.write(&batch?)?;
    }
    writer.finish()
}
