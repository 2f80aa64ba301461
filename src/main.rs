use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use lake_lineage::config::AppConfig;
use lake_lineage::{
    categorize_log, db, extract_tables, logging, sanitize, LineageEngine, TermLineageResult,
    TermStatus, ZoneOrder,
};

#[derive(Parser, Debug)]
#[command(name = "lake-lineage", version, about = "Table lineage from data-lake metadata records")]
struct Cli {
    /// Configuration file (defaults to $CONFIG_PATH, then ./config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve records and write the lineage plan
    Plan {
        /// Record files or directories (searched recursively for *.json)
        #[arg(long, short, required = true, num_args = 1..)]
        input: Vec<PathBuf>,
        /// Output file, `-` for stdout
        #[arg(long, short, default_value = "plan.csv")]
        out: PathBuf,
        #[arg(long, value_enum, default_value_t = PlanFormat::Csv)]
        format: PlanFormat,
    },
    /// Resolve records and store the rows in PostgreSQL
    Load {
        #[arg(long, short, required = true, num_args = 1..)]
        input: Vec<PathBuf>,
        /// Truncate stored lineage before loading
        #[arg(long)]
        replace_all: bool,
    },
    /// Print the rows stored for one term
    Show {
        term: String,
        #[arg(long, short, default_value = "-")]
        out: PathBuf,
    },
    /// Show what the extractor sees in one SQL statement
    Sql {
        /// SQL file, `-` or nothing for stdin
        file: Option<PathBuf>,
        #[arg(long, short)]
        json: bool,
        #[arg(long, short)]
        pretty: bool,
    },
    /// Group a run log's warnings and errors by term
    Categorize {
        #[arg(long)]
        log: PathBuf,
        #[arg(long, short, default_value = "categories.csv")]
        out: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum PlanFormat {
    Csv,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, config_path) = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Plan { input, out, format } => {
            let handle = logging::init_logging(&config.logging)?;
            handle.start_maintenance();
            log_config_source(config_path.as_deref());
            run_plan(&config, &input, &out, format)
        }
        Command::Load { input, replace_all } => {
            let handle = logging::init_logging(&config.logging)?;
            handle.start_maintenance();
            log_config_source(config_path.as_deref());
            run_load(&config, &input, replace_all)
        }
        Command::Show { term, out } => {
            logging::init_stderr_logging(&config.logging);
            run_show(&config, &term, &out)
        }
        Command::Sql { file, json, pretty } => {
            logging::init_stderr_logging(&config.logging);
            run_sql(file.as_deref(), json, pretty)
        }
        Command::Categorize { log, out } => {
            logging::init_stderr_logging(&config.logging);
            run_categorize(&log, &out)
        }
    }
}

fn log_config_source(path: Option<&Path>) {
    match path {
        Some(path) => info!("Loaded configuration from {}", path.display()),
        None => info!("No configuration file found, using defaults"),
    }
}

fn build_engine(config: &AppConfig) -> LineageEngine {
    LineageEngine::new(Arc::new(ZoneOrder::default()), config.engine.placeholders())
}

/// Expands directories into their `*.json` files. Missing inputs are kept so
/// the batch reports them under their own term.
fn collect_inputs(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for input in inputs {
        if !input.is_dir() {
            files.push(input.clone());
            continue;
        }
        for entry in WalkDir::new(input).sort_by_file_name() {
            match entry {
                Ok(entry)
                    if entry.file_type().is_file()
                        && entry.path().extension().is_some_and(|ext| ext == "json") =>
                {
                    files.push(entry.into_path());
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable entry under {}: {}", input.display(), e),
            }
        }
    }
    files
}

fn term_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string()
}

fn read_record(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read record file: {:?}", path))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {:?}", path))
}

#[derive(Debug, Default)]
struct Tally {
    ok: usize,
    empty: usize,
    failed: usize,
}

impl Tally {
    fn add(&mut self, status: TermStatus) {
        match status {
            TermStatus::Ok => self.ok += 1,
            TermStatus::Empty => self.empty += 1,
            TermStatus::Failed => self.failed += 1,
        }
    }
}

/// Processes every record in order and hands each result to `sink`. A sink
/// error marks that term failed; the batch always continues.
fn run_batch<F>(engine: &LineageEngine, inputs: &[PathBuf], mut sink: F) -> Vec<TermLineageResult>
where
    F: FnMut(&TermLineageResult) -> Result<()>,
{
    let files = collect_inputs(inputs);
    let total = files.len();
    let mut tally = Tally::default();
    let mut results = Vec::with_capacity(total);

    for (i, path) in files.iter().enumerate() {
        let term = term_name(path);
        info!("Processing term {}/{}: {}", i + 1, total, term);

        if !path.exists() {
            warn!("Term not found: {}", path.display());
            tally.add(TermStatus::Failed);
            results.push(TermLineageResult::failed(&term, "term not found"));
            continue;
        }

        let processed = read_record(path)
            .and_then(|record| Ok(engine.process_record(&term, &record)?))
            .and_then(|result| {
                if result.status == TermStatus::Empty {
                    warn!("No loaded rows for term {}", term);
                }
                sink(&result)?;
                Ok(result)
            });
        let result = match processed {
            Ok(result) => result,
            Err(e) => {
                error!("Error loading term {}: {:#}", term, e);
                TermLineageResult::failed(&term, format!("{e:#}"))
            }
        };
        tally.add(result.status);
        results.push(result);
    }

    info!(
        "Finished {} terms: {} ok, {} empty, {} failed",
        total, tally.ok, tally.empty, tally.failed
    );
    results
}

fn output_writer(out: &Path) -> Result<Box<dyn Write>> {
    if out == Path::new("-") {
        return Ok(Box::new(io::stdout().lock()));
    }
    let file = fs::File::create(out).with_context(|| format!("Failed to create {:?}", out))?;
    Ok(Box::new(io::BufWriter::new(file)))
}

fn run_plan(config: &AppConfig, inputs: &[PathBuf], out: &Path, format: PlanFormat) -> Result<()> {
    let engine = build_engine(config);
    let results = run_batch(&engine, inputs, |_| Ok(()));

    let writer = output_writer(out)?;
    match format {
        PlanFormat::Csv => {
            let mut csv = csv::Writer::from_writer(writer);
            for row in results.iter().flat_map(TermLineageResult::export_rows) {
                csv.serialize(row)?;
            }
            csv.flush()?;
        }
        PlanFormat::Json => {
            let mut writer = writer;
            serde_json::to_writer_pretty(&mut writer, &results)?;
            writeln!(writer)?;
            writer.flush()?;
        }
    }
    info!("Plan written to {}", out.display());
    Ok(())
}

fn run_load(config: &AppConfig, inputs: &[PathBuf], replace_all: bool) -> Result<()> {
    let database_url = config.database_url()?;
    let pool_size = config.database()?.pool_size as u32;
    let pool = db::create_pool(&database_url, pool_size)?;
    info!("Database connection pool created with max_size={}", pool_size);

    let mut conn = pool.get()?;
    if replace_all {
        let removed = db::delete_all_lineage(&mut conn)?;
        info!("Removed {} stored lineage rows", removed);
    }

    let engine = build_engine(config);
    run_batch(&engine, inputs, |result| {
        let inserted = db::replace_term_lineage(&mut conn, &result.term, &result.rows)?;
        info!("Stored {} rows for term {}", inserted, result.term);
        Ok(())
    });
    Ok(())
}

fn run_show(config: &AppConfig, term: &str, out: &Path) -> Result<()> {
    let pool = db::create_pool(&config.database_url()?, 1)?;
    let mut conn = pool.get()?;
    let rows = db::load_term_lineage(&mut conn, term)?;
    if rows.is_empty() {
        warn!("Term not found: {}", term);
    }

    let mut csv = csv::Writer::from_writer(output_writer(out)?);
    for row in &rows {
        csv.serialize(row)?;
    }
    csv.flush()?;
    Ok(())
}

#[derive(Serialize)]
struct SqlReport {
    sanitized: String,
    sources: Vec<String>,
    destination: Option<String>,
}

fn run_sql(file: Option<&Path>, json: bool, pretty: bool) -> Result<()> {
    let sql = match file {
        Some(path) if path != Path::new("-") => fs::read_to_string(path)
            .with_context(|| format!("Failed to read {:?}", path))?,
        _ => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            buf
        }
    };

    let tables = extract_tables(&sql);
    let report = SqlReport {
        sanitized: sanitize(&sql),
        sources: tables.sources.into_iter().collect(),
        destination: tables.destination,
    };

    if json {
        if pretty {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            println!("{}", serde_json::to_string(&report)?);
        }
    } else {
        println!("-- sanitized\n{}", report.sanitized.trim());
        for source in &report.sources {
            println!("source: {}", source);
        }
        println!(
            "destination: {}",
            report.destination.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn run_categorize(log: &Path, out: &Path) -> Result<()> {
    let text = fs::read_to_string(log).with_context(|| format!("Failed to read {:?}", log))?;
    let categories = categorize_log(&text);

    let mut csv = csv::Writer::from_writer(output_writer(out)?);
    for entry in &categories {
        csv.serialize(entry)?;
    }
    csv.flush()?;
    info!("Exported {} categorized terms to {}", categories.len(), out.display());
    Ok(())
}
