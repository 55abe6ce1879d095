use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use casefile_common::CasefileConfig;
use casefile_pipeline::fetch::configured_sources;
use casefile_pipeline::ingest::{self, ImportReport};
use casefile_pipeline::validator::{Severity, ValidationSummary, Validator};
use casefile_pipeline::{Pipeline, StageFlags};

#[derive(Parser)]
#[command(name = "casefile", about = "Incident record entity-resolution pipeline")]
struct Cli {
    /// Path to TOML config (overrides CASEFILE_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse CSV/JSON files and report what would be imported
    Import {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Import files and report validation issues
    Validate {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Flagged records to print
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Fetch configured sources, process, and merge into persisted outputs
    Fetch {
        #[command(flatten)]
        stages: StageArgs,
    },
    /// Reload every persisted output, run the stages, rewrite in place
    Process {
        #[command(flatten)]
        stages: StageArgs,
    },
    /// Fetch configured sources and import files, then process and save
    Run {
        files: Vec<PathBuf>,
        /// Overwrite outputs instead of deduplicating against them
        #[arg(long)]
        no_merge: bool,
        /// Skip configured remote sources
        #[arg(long)]
        no_fetch: bool,
        #[command(flatten)]
        stages: StageArgs,
    },
    /// Show persisted output counts
    Status,
}

#[derive(Args)]
struct StageArgs {
    #[arg(long)]
    no_validate: bool,
    #[arg(long)]
    no_normalize: bool,
    #[arg(long)]
    no_dedup: bool,
    #[arg(long)]
    no_geocode: bool,
}

impl StageArgs {
    fn flags(&self) -> StageFlags {
        StageFlags {
            validate: !self.no_validate,
            normalize: !self.no_normalize,
            deduplicate: !self.no_dedup,
            geocode: !self.no_geocode,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs)?;

    let config = CasefileConfig::from_env_with(cli.config.as_deref())
        .context("Failed to load configuration")?;
    config.log_redacted();

    match cli.command {
        Command::Import { files } => {
            let report = import_only(&files)?;
            println!("{report}");
        }
        Command::Validate { files, limit } => validate(&config, &files, limit)?,
        Command::Fetch { stages } => {
            let mut pipeline = Pipeline::from_config(&config)?;
            let sources = configured_sources(&config.sources, &config.geocoder);
            let fetched = pipeline.fetch(&sources).await;
            println!("{fetched}");
            let stats = pipeline.process(stages.flags()).await;
            println!("{stats}");
            print_written(&pipeline.save(true)?);
        }
        Command::Process { stages } => {
            let mut pipeline = Pipeline::from_config(&config)?;
            pipeline.load_persisted().context("Failed to load persisted outputs")?;
            let stats = pipeline.process(stages.flags()).await;
            println!("{stats}");
            print_written(&pipeline.save(false)?);
        }
        Command::Run {
            files,
            no_merge,
            no_fetch,
            stages,
        } => {
            let mut pipeline = Pipeline::from_config(&config)?;
            if !no_fetch && !config.sources.is_empty() {
                let sources = configured_sources(&config.sources, &config.geocoder);
                let fetched = pipeline.fetch(&sources).await;
                println!("{fetched}");
            }
            if !files.is_empty() {
                let report = pipeline.import(&files).context("Import failed")?;
                println!("{report}");
            }
            let stats = pipeline.process(stages.flags()).await;
            println!("{stats}");
            print_written(&pipeline.save(!no_merge)?);
        }
        Command::Status => {
            let pipeline = Pipeline::from_config(&config)?;
            println!("{}", pipeline.status()?);
        }
    }

    Ok(())
}

fn init_logging(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("casefile=info".parse()?);
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

fn import_only(files: &[PathBuf]) -> Result<ImportReport> {
    let mut report = ImportReport::default();
    for path in files {
        let (_, file_report) =
            ingest::import_file(path).with_context(|| format!("Failed to import {}", path.display()))?;
        report.merge(file_report);
    }
    Ok(report)
}

fn validate(config: &CasefileConfig, files: &[PathBuf], limit: usize) -> Result<()> {
    let validator = Validator::new(config.vocabulary.build());
    let mut reports = Vec::new();
    for path in files {
        let (records, _) =
            ingest::import_file(path).with_context(|| format!("Failed to import {}", path.display()))?;
        reports.extend(records.iter().map(|r| validator.validate(r)));
    }

    let summary = ValidationSummary::from_reports(&reports);
    info!(total = summary.total, invalid = summary.invalid, "Validation finished");
    println!("{summary}");

    let flagged: Vec<_> = reports.iter().filter(|r| !r.is_clean()).collect();
    if !flagged.is_empty() {
        println!("\nFlagged records (showing {} of {}):", flagged.len().min(limit), flagged.len());
    }
    for report in flagged.into_iter().take(limit) {
        println!("  {}", report.record_id);
        for issue in &report.issues {
            let label = match issue.severity {
                Severity::Error => "ERROR",
                Severity::Warning => "WARN ",
                Severity::Info => "INFO ",
            };
            println!("    {label} {:<18} {}", issue.field, issue.message);
        }
    }
    Ok(())
}

fn print_written(locations: &[String]) {
    println!("\nWrote {} outputs:", locations.len());
    for location in locations {
        println!("  {location}");
    }
}
