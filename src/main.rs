mod api;
mod config;
mod database;
mod error;
mod pipeline;
mod shared;

use anyhow::{bail, Context, Result};
use api::OuraClient;
use chrono::{Local, NaiveDate};
use clap::{ArgGroup, Args, Parser, Subcommand};
use config::{mask_token, resolve_config_path, ApiConfig, EnvOverrides, Settings};
use pipeline::{Pipeline, PipelineOptions, RunReport, RunRequest};
use shared::{DataType, DateWindow, Step};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "oura-etl")]
#[command(about = "Oura Ring data pipeline - extract, process and load", long_about = None)]
struct Cli {
    /// Directory for log files
    #[arg(long, global = true, default_value = "logs", env = "OURA_LOG_DIR")]
    log_dir: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline (default command)
    Run(RunArgs),

    /// Show the resolved configuration
    Config {
        /// Path to the configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Show only the [API] table as written in the file, ignoring OURA_* variables
        #[arg(long)]
        file_only: bool,
    },

    /// List the supported data types and their endpoints
    Types,
}

#[derive(Args, Default)]
#[command(group(ArgGroup::new("selection").required(true).args(["data_types", "all"])))]
struct RunArgs {
    /// Data types to extract
    #[arg(long, value_enum, value_delimiter = ',', num_args = 1..)]
    data_types: Vec<DataType>,

    /// Extract every data type
    #[arg(long)]
    all: bool,

    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for raw API responses
    #[arg(long, default_value = "data/raw")]
    raw_dir: PathBuf,

    /// Directory for processed JSONL files
    #[arg(long, default_value = "data/processed")]
    processed_dir: PathBuf,

    /// First day to fetch (YYYY-MM-DD)
    #[arg(long)]
    start_date: Option<NaiveDate>,

    /// Last day to fetch (YYYY-MM-DD)
    #[arg(long)]
    end_date: Option<NaiveDate>,

    /// Days back from today when no start date is given
    #[arg(long, default_value_t = 7)]
    days: u32,

    /// Steps to run
    #[arg(long, value_enum, value_delimiter = ',', num_args = 1..)]
    steps: Vec<Step>,

    /// SQLite database path, overrides the configured one
    #[arg(long)]
    db_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let _guards = shared::logging::init_logging(&cli.log_dir, "oura_etl")?;

    // Default to a full run if no command provided
    let command = cli.command.unwrap_or_else(|| {
        Commands::Run(RunArgs {
            all: true,
            raw_dir: PathBuf::from("data/raw"),
            processed_dir: PathBuf::from("data/processed"),
            days: 7,
            ..Default::default()
        })
    });

    match command {
        Commands::Run(args) => run(args).await,
        Commands::Config { config, file_only } => show_config(config.as_deref(), file_only),
        Commands::Types => {
            for data_type in DataType::ALL {
                println!("{:<28} {}", data_type.as_str(), data_type.endpoint());
            }
            Ok(())
        }
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let config_path = resolve_config_path(args.config.as_deref());
    let settings = Settings::load(&config_path, &EnvOverrides::from_env())
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;
    tracing::info!("Loaded configuration from {}", config_path.display());

    let window = date_window(args.start_date, args.end_date, args.days)?;
    let data_types = if args.all {
        DataType::ALL.to_vec()
    } else {
        args.data_types
    };

    let client = OuraClient::new(Arc::new(settings.api.clone()), &settings.client)?;
    let pipeline = Pipeline::new(
        Arc::new(client),
        PipelineOptions {
            raw_dir: args.raw_dir,
            processed_dir: args.processed_dir,
            db_path: args.db_path.unwrap_or(settings.database.db_path),
        },
    )?;

    let report = pipeline
        .run(&RunRequest {
            data_types,
            window,
            steps: args.steps,
        })
        .await?;
    print_report(&report);

    let failed = report.failed_types();
    if !failed.is_empty() {
        let names: Vec<&str> = failed.iter().map(|t| t.as_str()).collect();
        bail!("Extraction failed for: {}", names.join(", "));
    }
    Ok(())
}

/// Explicit dates win; otherwise the last `days` days ending today.
fn date_window(start: Option<NaiveDate>, end: Option<NaiveDate>, days: u32) -> Result<DateWindow> {
    let today = Local::now().date_naive();
    let window = match (start, end) {
        (None, None) => DateWindow::recent(days, today)?,
        (start, end) => DateWindow::between(start, end)?,
    };
    Ok(window)
}

fn print_report(report: &RunReport) {
    if let Some(extract) = &report.extract {
        println!(
            "Extract: {} saved, {} failed",
            extract.saved.len(),
            extract.failed.len()
        );
        for (data_type, reason) in &extract.failed {
            println!("  {data_type}: {reason}");
        }
    }
    if let Some(process) = &report.process {
        println!(
            "Process: {} files processed, {} failed, {} outputs",
            process.files_processed,
            process.files_failed,
            process.outputs.len()
        );
    }
    if let Some(load) = &report.load {
        println!(
            "Load: {} rows from {} files, {} failed",
            load.rows_written, load.files_loaded, load.files_failed
        );
        for (table, count) in &load.table_rows {
            println!("  {table:<28} {count}");
        }
    }
}

fn show_config(explicit: Option<&Path>, file_only: bool) -> Result<()> {
    let path = resolve_config_path(explicit);
    if file_only {
        let api = ApiConfig::load(&path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
        println!("Config file:          {}", path.display());
        println!("Base URL:             {}", api.base_url);
        println!("Token:                {}", mask_token(&api.token));
        return Ok(());
    }

    let settings = Settings::load(&path, &EnvOverrides::from_env())
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    println!("Config file:          {}", path.display());
    println!("Base URL:             {}", settings.api.base_url);
    println!("Token:                {}", mask_token(&settings.api.token));
    println!("Rate limit (per min): {}", settings.client.rate_limit_per_minute);
    println!(
        "Retries:              {} (backoff {}s, statuses {:?})",
        settings.client.retry_total,
        settings.client.retry_backoff_factor,
        settings.client.retry_status_forcelist
    );
    println!("Timeout:              {}s", settings.client.timeout.as_secs());
    println!("Database:             {}", settings.database.db_path.display());
    Ok(())
}
