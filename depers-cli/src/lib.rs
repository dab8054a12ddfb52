//! Shared entrypoint plumbing for the `depers-replicate` and `depers-local` binaries: settings
//! and `.env` loading, tracing setup, and transformer construction. Business logic for the pipeline
//! itself lives in `depers-core`.

pub mod config;
pub mod logging;
pub mod method;
pub mod names;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use depers_core::controller::{RunConfig, RunNames};
use depers_core::db::introspect_columns;
use depers_core::pipeline::PipelineConfig;
use depers_metrics::MetricsSink;

/// CLI arguments shared by both entrypoints: `<settings-path> [--env <env-path>]`.
#[derive(Parser)]
pub struct Args {
    /// Path to the settings JSON file.
    pub settings: PathBuf,
    /// Path to the `.env` file. Defaults to `.env` in the working directory.
    #[arg(long)]
    pub env: Option<PathBuf>,
}

/// Everything an entrypoint needs after loading settings and connecting: the resolved run
/// configuration and the metrics sink to pass to [`depers_core::controller::run`].
pub struct Prepared {
    /// The fully resolved run configuration.
    pub run_config: RunConfig,
    /// The metrics sink (real if `metrics_dir` was set, a stub otherwise).
    pub metrics: Arc<dyn MetricsSink>,
    /// The source DSN, needed by the controller to open its own connections.
    pub src_dsn: String,
    /// Destination DSNs, `None` in local-only mode.
    pub dst_dsns: Option<Vec<String>>,
}

/// Load settings and `.env`, read connection strings, introspect the source table's columns, and
/// build the transformer. Everything common to both entrypoints up to the point where
/// `depers_core::controller::run` takes over. `replicated` selects which env var requirements
/// apply (`DST_CONN_STRINGS` is required when `true`).
pub async fn prepare(args: &Args, replicated: bool) -> Result<(Prepared, logging::LogGuards)> {
    let env_path = args.env.clone().unwrap_or_else(|| Path::new(".env").to_path_buf());
    config::load_env_file(&env_path)?;

    let settings = config::load_settings(&args.settings)?;
    let guards = logging::init(settings.logs_dir.as_deref().map(Path::new))?;

    tracing::info!("start of work");

    let conn_strings = config::read_conn_strings(replicated)?;
    let dst_dsns = conn_strings.destinations.filter(|_| replicated);

    let metrics_dir = settings.metrics_dir.as_deref().map(Path::new);
    let metrics = depers_metrics::build_sink(metrics_dir)?;

    let introspect_conn = depers_core::db::connect(&conn_strings.src).await?;
    let source_columns =
        introspect_columns(&introspect_conn, &settings.processing_settings.src_table).await?;
    let method = method::build_method(&settings.processing_settings, &source_columns)?;

    let ps = &settings.processing_settings;
    let run_config = RunConfig {
        names: RunNames {
            src_table: ps.src_table.clone(),
            xfer_table: ps.transfer_table.clone(),
            publication: names::PUBLICATION.to_string(),
            subscription: names::SUBSCRIPTION.to_string(),
            id_column: names::ID_COLUMN.to_string(),
        },
        method,
        pipeline: PipelineConfig {
            src_table: ps.src_table.clone(),
            xfer_table: ps.transfer_table.clone(),
            batch_size: ps.batch_size,
            continuous_mode: ps.continuous_mode,
            batch_sleep_ms: ps.batch_sleep_ms,
        },
        delete_sleep_s: ps.delete_sleep_s,
    };

    Ok((
        Prepared { run_config, metrics, src_dsn: conn_strings.src, dst_dsns },
        guards,
    ))
}

/// Spawn a task that watches for SIGINT and flips a `watch` channel, matching the Python
/// original's `except KeyboardInterrupt` handling: the run controller treats this exactly like
/// any other pipeline error, routing through the same `after_error=true` teardown path.
pub fn spawn_interrupt_watcher() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received interrupt signal");
            let _ = tx.send(true);
        }
    });
    rx
}
