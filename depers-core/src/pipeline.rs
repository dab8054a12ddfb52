//! C6, the batch loop: identify rows, transform, insert, mark, commit, sleep, repeat. Drives
//! any [`Method`] over the shared skeleton described in the design notes: transformer
//! polymorphism as a tagged variant, pipeline composed as a free function over it.

use std::time::{Duration, Instant};

use depers_metrics::MetricsSink;
use depers_util::quote_ident;
use tokio::sync::watch;
use tokio_postgres::Client;

use crate::error::{Error, Result};
use crate::transform::Method;

/// Batch-loop configuration shared by every transformer variant.
pub struct PipelineConfig {
    /// Source table name.
    pub src_table: String,
    /// Transfer table name.
    pub xfer_table: String,
    /// Rows selected per batch.
    pub batch_size: i64,
    /// Loop forever instead of stopping once SRC is exhausted.
    pub continuous_mode: bool,
    /// Milliseconds slept between batches.
    pub batch_sleep_ms: u64,
}

async fn create_scratch_table(src: &Client) -> Result<()> {
    src.batch_execute(
        "CREATE TEMP TABLE IF NOT EXISTS temp_ctid_holder (_ctid_ tid);",
    )
    .await?;
    Ok(())
}

async fn select_batch(src: &Client, config: &PipelineConfig) -> Result<i64> {
    let src_table = quote_ident(&config.src_table);
    let rows = src
        .execute(
            &format!(
                "INSERT INTO temp_ctid_holder (_ctid_)
                 SELECT ctid FROM {src_table}
                 WHERE processed IS NULL
                 LIMIT $1;",
            ),
            &[&config.batch_size],
        )
        .await?;
    Ok(rows as i64)
}

async fn insert_transformed(src: &Client, xfer_table: &str, producer_funcs: &[String]) -> Result<u64> {
    let select_list = producer_funcs
        .iter()
        .map(|name| format!("({}()).*", quote_ident(name)))
        .collect::<Vec<_>>()
        .join(", ");
    let rows = src
        .execute(
            &format!(
                "INSERT INTO {xfer} SELECT {select_list};",
                xfer = quote_ident(xfer_table),
            ),
            &[],
        )
        .await?;
    Ok(rows)
}

async fn mark_processed(src: &Client, src_table: &str) -> Result<u64> {
    let rows = src
        .execute(
            &format!(
                "UPDATE {src_table} SET processed = true \
                 WHERE ctid IN (SELECT _ctid_ FROM temp_ctid_holder);",
                src_table = quote_ident(src_table),
            ),
            &[],
        )
        .await?;
    Ok(rows)
}

async fn truncate_scratch(src: &Client) -> Result<()> {
    src.batch_execute("TRUNCATE temp_ctid_holder;").await?;
    Ok(())
}

/// Drive `method` over `src` to completion. Autocommit is off for the duration of the loop; each
/// batch's select/insert/mark/truncate commit together as one transaction, so a crash between
/// any two of them rolls back the whole batch and leaves those source rows unprocessed for the
/// next run to pick up.
pub async fn run(
    src: &Client,
    config: &PipelineConfig,
    method: &Method,
    metrics: &dyn MetricsSink,
    interrupt: watch::Receiver<bool>,
) -> Result<()> {
    let outcome = run_inner(src, config, method, metrics, interrupt).await;
    // Every successful iteration already ends on a COMMIT, so the connection is back to
    // autocommit (no open transaction) on the Ok path with nothing further to do. On the Err
    // path a BEGIN may still be open (the failure could have come from any statement inside
    // it), so roll it back before cleanup; a ROLLBACK outside a transaction is a no-op.
    match outcome {
        Ok(()) => {
            method.cleanup(src).await?;
            Ok(())
        }
        Err(err) => {
            src.batch_execute("ROLLBACK;").await.ok();
            method.cleanup(src).await.ok();
            Err(err)
        }
    }
}

async fn run_inner(
    src: &Client,
    config: &PipelineConfig,
    method: &Method,
    metrics: &dyn MetricsSink,
    interrupt: watch::Receiver<bool>,
) -> Result<()> {
    method.prepare(src).await?;
    create_scratch_table(src).await?;

    let producer_funcs = method.producer_funcs();
    loop {
        if *interrupt.borrow() {
            return Err(Error::Interrupted);
        }

        src.batch_execute("BEGIN;").await?;
        let selected = select_batch(src, config).await?;
        metrics.increment("total_selected_ctids", selected as f64, None);

        let terminal =
            selected == 0 || (selected < config.batch_size && method.skip_last_partial_batch());

        if terminal {
            src.batch_execute("COMMIT;").await?;
            if config.continuous_mode {
                sleep_or_interrupt(
                    Duration::from_millis(config.batch_sleep_ms.max(1)),
                    &interrupt,
                )
                .await;
                continue;
            }
            break;
        }

        let batch_start = Instant::now();

        let converted = insert_transformed(src, &config.xfer_table, &producer_funcs).await?;
        metrics.increment("total_converted", converted as f64, None);

        let marked = mark_processed(src, &config.src_table).await?;
        metrics.increment("total_mark_processed", marked as f64, None);

        src.batch_execute("COMMIT;").await?;

        truncate_scratch(src).await?;
        src.batch_execute("COMMIT;").await.ok();

        metrics.add("batch_time_execution_s", batch_start.elapsed().as_secs_f64(), None);

        if config.batch_sleep_ms > 0 {
            sleep_or_interrupt(Duration::from_millis(config.batch_sleep_ms), &interrupt).await;
        }
    }
    Ok(())
}

/// Sleep for `duration`, waking early if `interrupt` flips to `true` in the meantime. The loop's
/// own top-of-iteration check then turns that into [`Error::Interrupted`] promptly rather than
/// after the full sleep elapses.
async fn sleep_or_interrupt(duration: Duration, interrupt: &watch::Receiver<bool>) {
    let mut interrupt = interrupt.clone();
    if *interrupt.borrow() {
        return;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = interrupt.changed() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_condition_matches_skip_semantics() {
        fn terminal(selected: i64, batch_size: i64, skip_partial: bool) -> bool {
            selected == 0 || (selected < batch_size && skip_partial)
        }

        assert!(terminal(0, 100, false));
        assert!(!terminal(100, 100, false));
        assert!(terminal(40, 100, true));
        assert!(!terminal(40, 100, false));
    }
}
