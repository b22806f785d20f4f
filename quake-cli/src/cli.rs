use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use inquire::{CustomType, Text};
use std::path::PathBuf;

use quake_core::{
    Config, ExportMode, ExportPlan, ExportSummary, Exporter, PartitionKey, ResumePoint,
    logging::init_logging, source::source_from_config, store::AggregationStore,
};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "quake", version, about = "Earthquake data export CLI")]
pub struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch missing months, validate them and update every dataset.
    Export {
        /// Refetch everything from the start year and rewrite all partitions.
        #[arg(long)]
        full: bool,

        /// Number of concurrent requests.
        #[arg(long)]
        workers: Option<usize>,

        /// Root directory of the exported datasets.
        #[arg(long)]
        export_dir: Option<PathBuf>,

        /// Exclusive end date (YYYY-MM-DD); defaults to yesterday.
        #[arg(long)]
        cutoff: Option<NaiveDate>,
    },

    /// Show where the next incremental export would resume, without fetching.
    Status {
        /// Exclusive end date (YYYY-MM-DD); defaults to yesterday.
        #[arg(long)]
        cutoff: Option<NaiveDate>,
    },

    /// Interactively edit and save the configuration.
    Configure,
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let mut config = match &self.config {
            Some(path) => Config::load_from(path)?,
            None => Config::load()?,
        };

        match self.command {
            Command::Configure => configure(config, self.config),
            Command::Status { cutoff } => {
                if let Some(end) = cutoff {
                    config.export.end_date = Some(end);
                }
                status(&config)
            }
            Command::Export {
                full,
                workers,
                export_dir,
                cutoff,
            } => {
                if let Some(workers) = workers {
                    config.export.workers = workers;
                }
                if let Some(dir) = export_dir {
                    config.export.dir = dir;
                }
                if let Some(end) = cutoff {
                    config.export.end_date = Some(end);
                }
                let mode = if full {
                    ExportMode::Full
                } else {
                    ExportMode::Incremental
                };
                export(&config, mode).await
            }
        }
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

async fn export(config: &Config, mode: ExportMode) -> Result<()> {
    init_logging(&config.logging);

    let cutoff = config.export.cutoff(today());
    config.validate(cutoff)?;

    let source = source_from_config(config)?;
    let exporter = Exporter::from_config(config, source, cutoff)?;
    let plan = ExportPlan::build(mode, exporter.store(), config.export.start_year, cutoff);

    let summary = exporter
        .run(&plan)
        .await
        .with_context(|| format!("Export into {} failed", config.export.dir.display()))?;

    print_summary(config, &plan, &summary);
    Ok(())
}

fn print_summary(config: &Config, plan: &ExportPlan, summary: &ExportSummary) {
    if summary.windows_planned == 0 {
        println!("Already up to date (cutoff {}).", plan.cutoff);
        return;
    }

    println!();
    println!("Mode:            {}", plan.mode);
    println!(
        "Months:          {} processed, {} empty, {} failed",
        summary.windows_completed,
        summary.empty_windows,
        summary.failed_windows.len()
    );
    println!(
        "Records:         {} fetched -> {} valid ({} rejected)",
        summary.records_fetched,
        summary.records_valid,
        summary.rejections.total()
    );
    println!(
        "Written:         {} monthly, {} yearly, {} combined records",
        summary.monthly_written,
        summary.years_written.len(),
        summary.combined_written
    );
    println!(
        "Data exported in {}/{{json,csv}}/{{monthly,yearly,combined}}/",
        config.export.dir.display()
    );

    if !summary.carried_windows.is_empty() {
        println!(
            "Kept:            existing data of {} month(s) without new records",
            summary.carried_windows.len()
        );
    }

    if !summary.failed_windows.is_empty() {
        println!();
        println!("Months that failed and were recorded with no data:");
        for failed in &summary.failed_windows {
            println!("  {}  {}", failed.window, failed.cause);
        }
    }
}

fn status(config: &Config) -> Result<()> {
    let cutoff = config.export.cutoff(today());
    config.validate(cutoff)?;

    let store = AggregationStore::new(&config.export.dir);
    let plan = ExportPlan::build(
        ExportMode::Incremental,
        &store,
        config.export.start_year,
        cutoff,
    );

    println!("Export directory: {}", store.root().display());
    match &plan.resume {
        Some(ResumePoint::Resume { last_record }) => {
            let combined = store
                .read_partition(&PartitionKey::Combined)
                .context("Failed to read combined dataset")?;
            println!("Latest record:    {last_record} UTC");
            println!("Combined records: {}", combined.len());
        }
        Some(ResumePoint::Recovered { reason }) => {
            println!(
                "Combined dataset is unreadable ({reason}); next run rebuilds from {}.",
                config.export.start_year
            );
        }
        Some(ResumePoint::Fresh) | None => {
            println!(
                "No combined dataset yet; next run starts from {}.",
                config.export.start_year
            );
        }
    }

    match (plan.windows.first(), plan.windows.last()) {
        (Some(first), Some(last)) => println!(
            "Pending months:   {} ({first} .. {last}, cutoff {cutoff})",
            plan.windows.len()
        ),
        _ => println!("Pending months:   none (cutoff {cutoff})"),
    }

    Ok(())
}

fn configure(mut config: Config, path: Option<PathBuf>) -> Result<()> {
    config.source.api_url = Text::new("API URL:")
        .with_default(&config.source.api_url)
        .prompt()?;

    let dir = Text::new("Export directory:")
        .with_default(&config.export.dir.display().to_string())
        .prompt()?;
    config.export.dir = PathBuf::from(dir);

    config.export.start_year = CustomType::<i32>::new("Start year:")
        .with_default(config.export.start_year)
        .with_error_message("Please enter a year, e.g. 1950")
        .prompt()?;

    config.export.workers = CustomType::<usize>::new("Concurrent requests:")
        .with_default(config.export.workers)
        .with_error_message("Please enter a positive number")
        .prompt()?;

    config.validate(config.export.cutoff(today()))?;

    let saved_to = match path {
        Some(path) => {
            config.save_to(&path)?;
            path
        }
        None => config.save()?,
    };
    println!("Configuration saved to {}", saved_to.display());

    Ok(())
}
