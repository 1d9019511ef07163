use std::path::Path;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::config::LoggingConfig;

/// Keeps the non-blocking writers flushing; hold it for the life of the process.
pub struct LogGuards {
    _file: WorkerGuard,
    _stdout: WorkerGuard,
}

pub fn init_logging(config: &LoggingConfig) -> Result<LogGuards, anyhow::Error> {
    let log_dir = &config.dir;
    let service_name = &config.service_name;

    // Create log directory if it doesn't exist
    std::fs::create_dir_all(log_dir)?;
    // Rotate logs on startup
    let rotated = rotate_logs_on_startup(log_dir, service_name)?;

    let file_appender = rolling::never(log_dir, format!("{service_name}.log"));
    let (non_blocking_file, file_guard) = non_blocking(file_appender);

    let (non_blocking_stdout, stdout_guard) = non_blocking(std::io::stdout());

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false) // No colors in file logs
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true);

    let console_layer = fmt::layer()
        .with_writer(non_blocking_stdout)
        .with_ansi(true)
        .with_target(false)
        .with_thread_ids(false)
        .with_line_number(false);

    // Can be controlled via RUST_LOG
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()?;

    info!(
        "Logging initialized - logs will be written to {}/{service_name}.log",
        log_dir.display()
    );
    if let Some(backup) = rotated {
        info!("Previous log file backed up to: {backup}");
    }

    Ok(LogGuards {
        _file: file_guard,
        _stdout: stdout_guard,
    })
}

/// Moves an existing `<service>.log` aside with a timestamp suffix.
pub fn rotate_logs_on_startup(
    log_dir: &Path,
    service_name: &str,
) -> Result<Option<String>, anyhow::Error> {
    let log_path = log_dir.join(format!("{service_name}.log"));

    if log_path.exists() {
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let backup_path = log_dir.join(format!("{service_name}.{timestamp}.log"));

        std::fs::rename(&log_path, &backup_path)?;
        return Ok(Some(backup_path.display().to_string()));
    }

    Ok(None)
}
