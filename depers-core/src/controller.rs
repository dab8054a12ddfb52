//! C9, the run controller: starts preparation, spawns the trim worker, drives the pipeline,
//! stops the trim worker, and invokes teardown under every exit path (success, pipeline error, or
//! interrupt).

use std::sync::Arc;

use depers_metrics::MetricsSink;
use tokio::sync::watch;
use tokio_postgres::Client;

use crate::db::{connect, MultiConn};
use crate::error::Result;
use crate::pipeline::{self, PipelineConfig};
use crate::prepare;
use crate::teardown;
use crate::transform::Method;
use crate::trim::{self, TrimConfig};

/// Names the run controller coordinates around; resolved once up front by the caller (the CLI
/// binary) from settings plus fixed conventions.
pub struct RunNames {
    /// Source table name.
    pub src_table: String,
    /// Transfer table name.
    pub xfer_table: String,
    /// Publication name (replicated mode only).
    pub publication: String,
    /// Subscription name (replicated mode only).
    pub subscription: String,
    /// Transfer table identity column.
    pub id_column: String,
}

/// Everything [`run`] needs beyond the source DSN and transformer: table/object names, pipeline
/// knobs and the trim worker's poll period.
pub struct RunConfig {
    /// Table/object names for this run.
    pub names: RunNames,
    /// The chosen transformer variant.
    pub method: Method,
    /// Batch size / sleep / continuous-mode knobs for the pipeline loop.
    pub pipeline: PipelineConfig,
    /// Trim worker poll period, in seconds. Ignored in local-only mode.
    pub delete_sleep_s: u64,
}

/// Drive one full run against `src_dsn`. `dst_dsns` is `None` in local-only mode and `Some`
/// (non-empty) in replicated mode. Opens its own connections throughout, one for preparation and
/// the pipeline, and, in replicated mode, a second, independent set dedicated to the trim worker
/// (per the design notes: the trimmer never shares connections with the producer).
pub async fn run(
    src_dsn: &str,
    dst_dsns: Option<&[String]>,
    config: RunConfig,
    metrics: Arc<dyn MetricsSink>,
    interrupt: watch::Receiver<bool>,
) -> Result<()> {
    tracing::info!("start of work");

    let src = connect(src_dsn).await?;
    let destinations = match dst_dsns {
        Some(dsns) => Some(MultiConn::connect_all(dsns).await?),
        None => None,
    };

    let outcome =
        run_inner(&src, src_dsn, dst_dsns, destinations.as_ref(), &config, &metrics, interrupt).await;

    let after_error = outcome.is_err();
    if let Err(err) = &outcome {
        tracing::error!(%err, "error during execution");
    }
    tracing::info!(after_error, "starting cleanup");
    teardown::teardown_all(
        &src,
        destinations.as_ref(),
        &config.names.src_table,
        &config.names.xfer_table,
        destinations.as_ref().map(|_| config.names.publication.as_str()),
        destinations.as_ref().map(|_| config.names.subscription.as_str()),
        after_error,
    )
    .await?;
    tracing::info!(after_error, "cleanup completed successfully");

    outcome
}

async fn run_inner(
    src: &Client,
    src_dsn: &str,
    dst_dsns: Option<&[String]>,
    destinations: Option<&MultiConn>,
    config: &RunConfig,
    metrics: &Arc<dyn MetricsSink>,
    interrupt: watch::Receiver<bool>,
) -> Result<()> {
    tracing::info!("starting preparations");
    let output_schema = config.method.output_schema();

    prepare::prepare_src_table(src, &config.names.src_table).await?;
    prepare::prepare_transfer_table(src, &config.names.xfer_table, &output_schema).await?;
    if let Some(destinations) = destinations {
        prepare::prepare_replication(
            src,
            src_dsn,
            destinations,
            &config.names.xfer_table,
            &output_schema,
            &config.names.publication,
            &config.names.subscription,
        )
        .await?;
    }
    tracing::info!("preparations completed successfully");

    // Local-only runs never spawn a trimmer: XFER is the deliverable and nothing ever deletes
    // from it.
    let trim_handle = match dst_dsns {
        Some(dsns) => {
            let trim_src = connect(src_dsn).await?;
            let trim_destinations = MultiConn::connect_all(dsns).await?;
            let trim_config = TrimConfig {
                xfer_table: config.names.xfer_table.clone(),
                id_column: config.names.id_column.clone(),
                delete_sleep_s: config.delete_sleep_s,
            };
            let (stop_tx, stop_rx) = watch::channel(false);
            tracing::info!("starting remove replicated process");
            let handle = trim::spawn(trim_src, trim_destinations, trim_config, stop_rx, metrics.clone());
            Some((stop_tx, handle))
        }
        None => None,
    };

    let pipeline_result =
        pipeline::run(src, &config.pipeline, &config.method, metrics.as_ref(), interrupt).await;

    if let Some((stop_tx, handle)) = trim_handle {
        match &pipeline_result {
            Ok(()) => {
                let _ = stop_tx.send(true);
                match handle.await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => return Err(err),
                    Err(join_err) => {
                        tracing::error!(%join_err, "trim worker task panicked");
                    }
                }
            }
            Err(_) => {
                // Force-terminate without draining: the controller doesn't wait for
                // replication to catch up when the producer itself has already failed.
                handle.abort();
            }
        }
    }

    pipeline_result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_names_are_plain_data() {
        let names = RunNames {
            src_table: "workers".into(),
            xfer_table: "_transfer_workers".into(),
            publication: "pub".into(),
            subscription: "sub".into(),
            id_column: "xfer_id".into(),
        };
        assert_eq!(names.src_table, "workers");
        assert_eq!(names.id_column, "xfer_id");
    }
}
