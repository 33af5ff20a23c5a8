pub mod cleaning;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod dates;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod introspect;
pub mod io_utils;
pub mod report;
pub mod sql;
pub mod staging;
pub mod table;
pub mod transfer;
pub mod types;
pub mod upload;
pub mod upsert;
pub mod validate;

use std::{env, sync::OnceLock, time::Duration};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    cli::{Cli, Commands},
    config::PipelineConfig,
    dataset::Dataset,
    db::{CancelToken, Database},
    introspect::SchemaIntrospector,
    report::Reporter,
    sql::QualifiedName,
    upload::{UploadCoordinator, UploadOptions, UploadResult},
    validate::ValidationReport,
};

pub use error::{LoadError, Result as LoadResult};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("tabload", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Load(args) => handle_load(&args),
        Commands::Check(args) => handle_check(&args),
        Commands::Inspect(args) => handle_inspect(&args),
    }
}

/// Shared setup for `load` and `check`.
struct Prepared {
    config: PipelineConfig,
    dataset: Dataset,
    db: Database,
    cancel: CancelToken,
    options: UploadOptions,
}

fn prepare(args: &cli::InputArgs, force_recreate: bool) -> Result<Prepared> {
    let config = PipelineConfig::load(&args.config)
        .with_context(|| format!("Loading pipeline config from {:?}", args.config))?;
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let delimiter = io_utils::resolve_input_delimiter(&args.input, args.delimiter);
    info!(
        "Reading '{}' with delimiter '{}'",
        args.input.display(),
        printable_delimiter(delimiter)
    );
    let dataset = Dataset::from_csv_path(&args.input, Some(delimiter), encoding)
        .with_context(|| format!("Reading input {:?}", args.input))?;
    let db = Database::open(&args.database)
        .with_context(|| format!("Opening database {:?}", args.database))?;
    let cancel = match args.timeout_secs {
        Some(secs) => CancelToken::with_timeout(Duration::from_secs(secs)),
        None => CancelToken::new(),
    };
    debug!("Config datasets: {:?}", config.datasets.keys().collect::<Vec<_>>());
    Ok(Prepared {
        config,
        dataset,
        db,
        cancel,
        options: UploadOptions {
            force_recreate,
            date_format: args.date_format,
        },
    })
}

fn handle_load(args: &cli::LoadArgs) -> Result<()> {
    let prepared = prepare(&args.input, args.force_recreate)?;
    let reporter = Reporter::new();
    let coordinator = UploadCoordinator::new(&prepared.db, &prepared.config, &reporter);
    let result = coordinator
        .upload(
            &args.input.dataset,
            &prepared.dataset,
            &prepared.options,
            &prepared.cancel,
        )
        .with_context(|| format!("Loading dataset '{}'", args.input.dataset))?;
    if args.input.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_upload_result(&result);
    }
    if !result.success {
        bail!("{}", result.message);
    }
    Ok(())
}

fn handle_check(args: &cli::CheckArgs) -> Result<()> {
    let prepared = prepare(&args.input, false)?;
    let reporter = Reporter::new();
    let coordinator = UploadCoordinator::new(&prepared.db, &prepared.config, &reporter);
    let report = coordinator
        .validate_only(
            &args.input.dataset,
            &prepared.dataset,
            &prepared.options,
            &prepared.cancel,
        )
        .with_context(|| format!("Validating dataset '{}'", args.input.dataset))?;
    if args.input.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    if !report.is_valid {
        bail!("Validation failed: {}", report.summary);
    }
    Ok(())
}

fn handle_inspect(args: &cli::InspectArgs) -> Result<()> {
    let table = QualifiedName::parse(&args.table, &args.schema)?;
    let db = Database::open(&args.database)
        .with_context(|| format!("Opening database {:?}", args.database))?;
    let session = db.connect(&CancelToken::new())?;
    let introspector = SchemaIntrospector::new(&session);
    let columns = introspector
        .columns(&table)
        .with_context(|| format!("Reading columns of {table}"))?;
    if columns.is_empty() {
        bail!("Table {table} does not exist");
    }
    let indexes = introspector.indexes(&table)?;
    if args.json {
        let payload = serde_json::json!({
            "table": table,
            "columns": columns,
            "indexes": indexes,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("{table}");
        print!("{}", table::render_columns(&columns));
        if !indexes.is_empty() {
            println!();
            print!("{}", table::render_indexes(&indexes));
        }
    }
    Ok(())
}

fn print_upload_result(result: &UploadResult) {
    println!("{}", result.message);
    if let Some(action) = result.action {
        println!(
            "table {} ({action}), {} row(s) removed, {} duplicate(s) skipped",
            result.table, result.deleted_rows, result.duplicates_removed
        );
    }
    if !result.issues.is_empty() {
        println!();
        print!("{}", table::render_issues(&result.issues));
    }
    if !result.problem_columns.is_empty() {
        println!();
        print!("{}", table::render_problem_columns(&result.problem_columns));
    }
}

fn print_report(report: &ValidationReport) {
    println!("{}", report.summary);
    let issues = report.all_issues().cloned().collect::<Vec<_>>();
    if !issues.is_empty() {
        println!();
        print!("{}", table::render_issues(&issues));
    }
    for failure in &report.phase_failures {
        println!("phase {} did not run: {}", failure.label(), failure.error);
    }
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        other => (other as char).to_string(),
    }
}
