//! Tracing setup mirroring `original_source/src/log_config.py`: a `logs_dir` present in settings
//! gets a debug-and-up `logs.log` file layer and an error-and-up `error_logs.log` file layer, both
//! non-blocking (`tracing-appender`), alongside a console layer. Absent `logs_dir`, only the
//! console layer is installed at `info`. The original disables logging entirely in that case,
//! but a CLI with no log output at all is a worse default for a systems tool (see DESIGN.md).

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Guards returned by [`init`] must be held for the process's lifetime, dropping them flushes
/// and tears down the non-blocking file writers.
pub struct LogGuards {
    _all: Option<WorkerGuard>,
    _error: Option<WorkerGuard>,
}

/// Install the global tracing subscriber. `logs_dir`, when `Some`, gets `logs.log` (debug+) and
/// `error_logs.log` (error+) file layers in addition to the console.
pub fn init(logs_dir: Option<&Path>) -> anyhow::Result<LogGuards> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer().with_filter(console_filter);

    let (all_layer, all_guard, error_layer, error_guard) = match logs_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let all_appender = tracing_appender::rolling::never(dir, "logs.log");
            let (all_writer, all_guard) = tracing_appender::non_blocking(all_appender);
            let error_appender = tracing_appender::rolling::never(dir, "error_logs.log");
            let (error_writer, error_guard) = tracing_appender::non_blocking(error_appender);

            let all_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(all_writer)
                .with_filter(EnvFilter::new("debug"));
            let error_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(error_writer.with_max_level(tracing::Level::ERROR))
                .with_filter(EnvFilter::new("error"));

            (Some(all_layer), Some(all_guard), Some(error_layer), Some(error_guard))
        }
        None => (None, None, None, None),
    };

    tracing_subscriber::registry().with(console).with(all_layer).with(error_layer).init();

    Ok(LogGuards { _all: all_guard, _error: error_guard })
}
