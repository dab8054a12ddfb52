//! Local-only entrypoint: `depers-local <settings-path> [--env <env-path>]`. Mirrors
//! `original_source/depers_only.py`. No `DST_CONN_STRINGS` is required and no trim worker is
//! spawned; the transfer table itself is the deliverable.

use clap::Parser;
use depers_cli::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let (prepared, _guards) = depers_cli::prepare(&args, false).await?;
    let interrupt = depers_cli::spawn_interrupt_watcher();

    let result = depers_core::controller::run(
        &prepared.src_dsn,
        None,
        prepared.run_config,
        prepared.metrics,
        interrupt,
    )
    .await;

    if let Err(err) = &result {
        tracing::error!(%err, "run failed");
    }
    result.map_err(anyhow::Error::from)
}
