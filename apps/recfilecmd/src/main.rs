//! Operator CLI for record files: create a table, insert and fetch rows,
//! scan, delete, and run the consistency verifier.
//!
//! The tool manages a fixed demo table (`id, number, note`) under the
//! configured data directory; it exists to exercise and inspect the
//! storage engine, not to be a query processor.

use clap::{Parser, Subcommand};
use recfile::{
    CancelFlag, ColumnSpec, EncodingForm, MetaDataOptions, ObjectId, OpenMode, RecordFile, Schema,
    TargetFields, Treatment, Value,
};
use std::error::Error;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

mod config;
use config::EngineConfig;

#[derive(Debug, Parser)]
#[command(name = "recfilecmd", about = "Record file storage utility")]
struct Cli {
    /// Path to the engine configuration file.
    #[arg(long, default_value = "recfile.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the demo table.
    Create,
    /// Insert a row; prints the new object id.
    Insert {
        number: i64,
        /// Optional variable-length note.
        note: Option<String>,
    },
    /// Fetch one row by object id (as printed by insert).
    Get { object_id: String },
    /// Scan every row in object-id order.
    Scan,
    /// Delete one row by object id.
    Delete { object_id: String },
    /// Update the note of one row.
    SetNote {
        object_id: String,
        note: Option<String>,
    },
    /// Print the row count.
    Count,
    /// Run the consistency verifier.
    Verify {
        /// Stop at the first inconsistency instead of aggregating.
        #[arg(long)]
        abort_on_first: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    let cfg = match EngineConfig::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(2);
        }
    };
    let _logging_guard = match init_logging(&cfg.storage.logs_dir) {
        Ok(guard) => guard,
        Err(error) => {
            eprintln!("cannot initialise logging: {error}");
            std::process::exit(2);
        }
    };

    if let Err(error) = run(&cli.command, &cfg) {
        tracing::error!("{error}");
        eprintln!("{error}");
        std::process::exit(1);
    }
}

fn demo_schema() -> Schema {
    Schema::new(vec![
        ColumnSpec::object_id(),
        ColumnSpec::bigint(),
        ColumnSpec::string(EncodingForm::Utf8, 0).compressed(),
    ])
}

fn options_from(cfg: &EngineConfig) -> MetaDataOptions {
    MetaDataOptions {
        minimum_slots_per_page: cfg.storage.min_slots_per_page,
        ..Default::default()
    }
}

fn table_dir(cfg: &EngineConfig) -> PathBuf {
    cfg.storage.data_dir.join("demo")
}

fn open(cfg: &EngineConfig, mode: OpenMode) -> Result<RecordFile, Box<dyn Error>> {
    Ok(RecordFile::open(
        table_dir(cfg),
        demo_schema(),
        &options_from(cfg),
        mode,
    )?)
}

fn parse_object_id(text: &str) -> Result<ObjectId, Box<dyn Error>> {
    let (page, area) = text
        .split_once(':')
        .ok_or("object id must look like <page>:<slot>")?;
    Ok(ObjectId::new(page.parse()?, area.parse()?))
}

fn run(command: &Command, cfg: &EngineConfig) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Create => {
            RecordFile::create(table_dir(cfg), demo_schema(), &options_from(cfg))?;
            println!("created {}", table_dir(cfg).display());
        }
        Command::Insert { number, note } => {
            let mut file = open(cfg, OpenMode::Update)?;
            let note_value = note
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null);
            let id = file.insert(vec![Value::Null, Value::BigInt(*number), note_value])?;
            file.close()?;
            println!("{id}");
        }
        Command::Get { object_id } => {
            let id = parse_object_id(object_id)?;
            let mut file = open(cfg, OpenMode::Read)?;
            match file.fetch(Some(id), None)? {
                Some(values) => println!("{}", format_row(&values)),
                None => println!("no row at {id}"),
            }
            file.close()?;
        }
        Command::Scan => {
            let mut file = open(cfg, OpenMode::Read)?;
            while let Some(values) = file.fetch(None, None)? {
                println!("{}", format_row(&values));
            }
            file.close()?;
        }
        Command::Delete { object_id } => {
            let id = parse_object_id(object_id)?;
            let mut file = open(cfg, OpenMode::Update)?;
            file.expunge(id)?;
            file.close()?;
            println!("deleted {id}");
        }
        Command::SetNote { object_id, note } => {
            let id = parse_object_id(object_id)?;
            let mut file = open(cfg, OpenMode::Update)?;
            let note_value = note
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null);
            file.update(id, vec![note_value], &TargetFields::new(vec![2]))?;
            file.close()?;
            println!("updated {id}");
        }
        Command::Count => {
            let mut file = open(cfg, OpenMode::Read)?;
            println!("{}", file.count()?);
            file.close()?;
        }
        Command::Verify { abort_on_first } => {
            let treatment = if *abort_on_first {
                Treatment::Abort
            } else {
                Treatment::Continue
            };
            let mut file = open(cfg, OpenMode::Read)?;
            let report = file.verify(treatment, &CancelFlag::new())?;
            file.close()?;
            if report.is_consistent() {
                println!("consistent");
            } else {
                for finding in &report.findings {
                    println!("{finding:?}");
                }
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

fn format_row(values: &[Value]) -> String {
    values
        .iter()
        .map(|value| match value {
            Value::Null => "null".to_string(),
            Value::ObjectId(id) => id.to_string(),
            Value::Int(v) => v.to_string(),
            Value::BigInt(v) => v.to_string(),
            Value::Double(v) => v.to_string(),
            Value::Decimal { unscaled, scale } => format!("{unscaled}e-{scale}"),
            Value::String(text) => format!("{text:?}"),
            Value::Binary(data) => format!("{} bytes", data.len()),
            Value::Array(items) => format!("[{}]", format_row(items)),
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Console and rolling-file logging for the tool.
fn init_logging(log_dir: &Path) -> Result<WorkerGuard, Box<dyn Error + Send + Sync>> {
    let file_appender = tracing_appender::rolling::daily(log_dir, "recfilecmd.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .compact();

    let file_layer = fmt::layer().with_writer(file_writer).json();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}
