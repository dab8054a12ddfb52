//! Replicated-mode entrypoint: `depers-replicate <settings-path> [--env <env-path>]`. Mirrors
//! `original_source/depers_and_replicate.py`.

use clap::Parser;
use depers_cli::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let (prepared, _guards) = depers_cli::prepare(&args, true).await?;
    let interrupt = depers_cli::spawn_interrupt_watcher();

    let dst_dsns = prepared.dst_dsns.ok_or_else(|| {
        anyhow::anyhow!("replicated mode requires DST_CONN_STRINGS, none were configured")
    })?;

    let result = depers_core::controller::run(
        &prepared.src_dsn,
        Some(&dst_dsns),
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
