use std::path::Path;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the non-blocking writers alive; logs are flushed when this is dropped.
pub struct LogGuards {
    _file: WorkerGuard,
    _console: WorkerGuard,
}

pub fn init_logging(log_dir: &str, service_name: &str) -> Result<LogGuards, anyhow::Error> {
    // Create log directory if it doesn't exist
    std::fs::create_dir_all(log_dir)?;
    // Keep the previous run's log next to the new one
    let backup = rotate_logs_on_startup(log_dir, service_name)?;

    let file_appender = rolling::never(log_dir, format!("{service_name}.log"));
    let (non_blocking_file, file_guard) = non_blocking(file_appender);

    let (non_blocking_stderr, console_guard) = non_blocking(std::io::stderr());

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true);

    let console_layer = fmt::layer()
        .with_writer(non_blocking_stderr)
        .with_ansi(true)
        .with_target(false)
        .with_thread_ids(false)
        .with_line_number(false);

    // Controlled via RUST_LOG
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()?;

    info!("Logging initialized - logs will be written to {log_dir}/{service_name}.log");
    if let Some(backup) = backup {
        info!("Previous log file backed up to: {backup}");
    }

    Ok(LogGuards {
        _file: file_guard,
        _console: console_guard,
    })
}

/// Renames `{service_name}.log` to a timestamped backup, returning the backup path.
pub fn rotate_logs_on_startup(
    log_dir: &str,
    service_name: &str,
) -> Result<Option<String>, anyhow::Error> {
    let log_file = format!("{log_dir}/{service_name}.log");
    let log_path = Path::new(&log_file);

    if !log_path.exists() {
        return Ok(None);
    }

    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let backup_file = format!("{log_dir}/{service_name}.{timestamp}.log");
    std::fs::rename(&log_file, &backup_file)?;

    Ok(Some(backup_file))
}
