//! C7, the trim worker: a dedicated concurrent task that watches the destinations' delivered
//! watermark and deletes acknowledged rows from the source-side transfer table. Runs on its own
//! connections, communicating with the producer (C6) only through the database and one stop
//! signal; see the design notes on message-passing concurrency.

use std::sync::Arc;
use std::time::Duration;

use depers_metrics::MetricsSink;
use depers_util::quote_ident;
use tokio::sync::watch;
use tokio_postgres::Client;

use crate::db::{FanoutParams, MultiConn};
use crate::error::Result;

/// Configuration the trim worker needs, independent of its connections.
pub struct TrimConfig {
    /// Transfer table name.
    pub xfer_table: String,
    /// Identity column on the transfer table (`xfer_id`).
    pub id_column: String,
    /// Seconds slept between polls. `0` means no sleep.
    pub delete_sleep_s: u64,
}

async fn max_ids(destinations: &MultiConn, config: &TrimConfig) -> Result<Vec<Option<i64>>> {
    let sql = format!(
        "SELECT MAX({id}) FROM {table}",
        id = quote_ident(&config.id_column),
        table = quote_ident(&config.xfer_table),
    );
    let rows = destinations.query(&sql, FanoutParams::None).await?;
    Ok(rows
        .into_iter()
        .map(|per_dest| per_dest.into_iter().next().and_then(|row| row.get::<_, Option<i64>>(0)))
        .collect())
}

async fn delete_up_to(src: &Client, config: &TrimConfig, watermark: i64) -> Result<u64> {
    let sql = format!(
        "DELETE FROM {table} WHERE {id} <= $1",
        table = quote_ident(&config.xfer_table),
        id = quote_ident(&config.id_column),
    );
    let deleted = src.execute(&sql, &[&watermark]).await?;
    Ok(deleted)
}

/// Watermark computed from a round of per-destination maxes: `Some(min)` if every destination has
/// reported a non-null max, `None` if at least one hasn't received anything yet (in which case
/// this iteration's delete is skipped entirely).
fn watermark_from(maxes: &[Option<i64>]) -> Option<i64> {
    if maxes.is_empty() || maxes.iter().any(Option::is_none) {
        return None;
    }
    maxes.iter().map(|m| m.expect("checked above")).min()
}

/// Drive the trim loop until `stop` has been observed set AND the last delete on that iteration
/// returned zero rows, matching the original's ordering of "attempt a delete, then check
/// whether to exit" rather than racing to check the stop signal first, so replication is given a
/// chance to drain before the worker exits.
pub async fn run(
    src: &Client,
    destinations: &MultiConn,
    config: &TrimConfig,
    mut stop: watch::Receiver<bool>,
    metrics: &dyn MetricsSink,
) -> Result<()> {
    loop {
        let maxes = max_ids(destinations, config).await?;
        let tagged: Vec<f64> = maxes.iter().map(|m| m.unwrap_or(0) as f64).collect();
        let tags: Vec<Option<String>> =
            destinations.hosts().iter().map(|h| Some(h.clone())).collect();
        metrics.add_array("total_cnt", &tagged, &tags);

        let watermark = watermark_from(&maxes);

        let stop_requested = *stop.borrow();

        match watermark {
            Some(watermark) => {
                let deleted = delete_up_to(src, config, watermark).await?;
                metrics.increment("total_deleted", deleted as f64, None);
                tracing::debug!(watermark, deleted, "trimmed delivered rows from transfer table");

                if deleted == 0 && stop_requested {
                    break;
                }
            }
            None => {
                tracing::debug!("at least one destination has not received anything yet, skipping delete");
            }
        }

        if config.delete_sleep_s > 0 {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(config.delete_sleep_s)) => {}
                _ = stop.changed() => {}
            }
        }
    }
    Ok(())
}

/// Spawn the trim loop as its own task over connections it owns outright, never ones borrowed
/// from the producer, per the design notes ("no shared mutable state, owns its own connections").
/// The caller passes in a fresh source [`Client`] and destination [`MultiConn`] it opened just
/// for this purpose.
pub fn spawn(
    src: Client,
    destinations: MultiConn,
    config: TrimConfig,
    stop: watch::Receiver<bool>,
    metrics: Arc<dyn MetricsSink>,
) -> tokio::task::JoinHandle<Result<()>> {
    tokio::spawn(async move { run(&src, &destinations, &config, stop, metrics.as_ref()).await })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermark_is_min_only_when_every_destination_reported() {
        assert_eq!(watermark_from(&[Some(5), Some(3), Some(9)]), Some(3));
        assert_eq!(watermark_from(&[Some(5), None, Some(9)]), None);
        assert_eq!(watermark_from(&[]), None);
    }

    #[test]
    fn single_destination_watermark_is_its_own_max() {
        assert_eq!(watermark_from(&[Some(42)]), Some(42));
    }
}
