use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::TallyConfig;

/// Initializes the logging system according to `config`.
///
/// With `log_to_file` set, events go to a daily-rolling file under
/// `~/.tally/logs` plus a compact console layer. Otherwise only the console
/// is used, through a non-blocking writer. `RUST_LOG` overrides the
/// configured level.
///
/// Returns a guard that must be kept alive for the duration of the process.
pub fn init_logging(config: &TallyConfig) -> Result<WorkerGuard> {
    let filter = env_or(&config.log_filter());

    if config.log_to_file {
        let (file, guard) = rolling_file(&TallyConfig::logs_dir()?)?;
        install(filter, Some(file), Some(BoxMakeWriter::new(std::io::stdout)))?;
        Ok(guard)
    } else {
        let (stdout, guard) = tracing_appender::non_blocking(std::io::stdout());
        install(filter, None, Some(BoxMakeWriter::new(stdout)))?;
        Ok(guard)
    }
}

/// File-only logging into `logs_dir` with `filter` as the fallback
/// directive. For tests and embedders that keep logs out of `~/.tally`.
pub fn init_logging_to_dir(logs_dir: &Path, filter: &str) -> Result<WorkerGuard> {
    let (file, guard) = rolling_file(logs_dir)?;
    install(env_or(filter), Some(file), None)?;
    Ok(guard)
}

fn env_or(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

fn rolling_file(logs_dir: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("Failed to create log directory: {}", logs_dir.display()))?;
    let appender = tracing_appender::rolling::daily(logs_dir, "tally");
    Ok(tracing_appender::non_blocking(appender))
}

/// Install the global subscriber. Fails if one is already set.
fn install(
    filter: EnvFilter,
    file: Option<NonBlocking>,
    console: Option<BoxMakeWriter>,
) -> Result<()> {
    let file_layer = file.map(|writer| {
        fmt::layer()
            .with_target(true)
            .with_ansi(false)
            .with_writer(writer)
    });
    let console_layer = console.map(|writer| {
        fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_writer(writer)
            .compact()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("Failed to initialize logging")
}
