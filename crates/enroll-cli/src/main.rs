//! Enroll - spreadsheet and file ETL into Postgres

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use enroll_common::logging::{init_logging, LogConfig, LogLevel};
use enroll_etl::datasets::DatasetName;
use enroll_etl::quality::RowCountRule;
use enroll_etl::{runner, EtlConfig};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "enroll")]
#[command(author, version, about = "Enrollment ETL and data quality tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print the run summary (or audit report) as JSON on stdout
    #[arg(long, global = true)]
    summary_json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync pending enrollment rows from the spreadsheet
    Students {
        #[command(flatten)]
        row_count: RowCountArgs,
    },

    /// Load university rankings from a CSV file
    Rankings {
        /// Input CSV file
        #[arg(short, long)]
        file: PathBuf,

        #[command(flatten)]
        row_count: RowCountArgs,
    },

    /// Load country reference data from a JSON file
    Countries {
        /// Input JSON file
        #[arg(short, long)]
        file: PathBuf,

        #[command(flatten)]
        row_count: RowCountArgs,
    },

    /// Audit an already loaded dataset table
    Audit {
        /// Dataset to audit (students, rankings, countries)
        dataset: DatasetName,

        #[command(flatten)]
        row_count: RowCountArgs,
    },
}

#[derive(Args, Debug)]
struct RowCountArgs {
    /// Expected row count in the target table
    #[arg(long)]
    expected_rows: Option<i64>,

    /// Allowed difference from the expected row count
    #[arg(long)]
    tolerance: Option<i64>,
}

impl RowCountArgs {
    /// Flags win over `QUALITY_*` settings; nothing is checked without an expected count
    fn rule(&self, config: &EtlConfig) -> Option<RowCountRule> {
        let expected = self.expected_rows.or(config.quality.expected_rows)?;
        Some(RowCountRule {
            expected,
            tolerance: self.tolerance.unwrap_or(config.quality.row_tolerance),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("enroll")
        .build();

    // Environment variables take precedence
    let log_config = log_config.merge_env()?;
    let _guard = init_logging(&log_config)?;

    let config = EtlConfig::load()?;

    match cli.command {
        Command::Students { row_count } => {
            let rule = row_count.rule(&config);
            sync(&config, DatasetName::Students, None, rule, cli.summary_json).await?;
        },
        Command::Rankings { file, row_count } => {
            let rule = row_count.rule(&config);
            sync(&config, DatasetName::Rankings, Some(file), rule, cli.summary_json).await?;
        },
        Command::Countries { file, row_count } => {
            let rule = row_count.rule(&config);
            sync(&config, DatasetName::Countries, Some(file), rule, cli.summary_json).await?;
        },
        Command::Audit { dataset, row_count } => {
            let report = runner::run_audit(&config, dataset, row_count.rule(&config)).await?;
            if report.passed {
                info!(dataset = %dataset, "Audit passed");
            } else {
                warn!(dataset = %dataset, error = ?report.error, "Audit failed");
            }
            if cli.summary_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        },
    }

    Ok(())
}

async fn sync(
    config: &EtlConfig,
    dataset: DatasetName,
    file: Option<PathBuf>,
    rule: Option<RowCountRule>,
    summary_json: bool,
) -> Result<()> {
    info!(dataset = %dataset, "Starting sync");
    let summary = runner::run_dataset(config, dataset, file.as_deref(), rule).await?;

    if !summary.quality_passed() {
        warn!(dataset = %dataset, "Load committed but quality checks failed");
    }
    if summary_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    info!(
        dataset = %dataset,
        inserted = summary.rows_inserted,
        rejected = summary.rows_rejected,
        "Sync complete"
    );
    Ok(())
}
