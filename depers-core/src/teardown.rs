//! C4, the inverse of C3. Runs on both the success and the failure path; every statement is
//! guarded with `IF EXISTS` so a partially-prepared run tears down cleanly.

use depers_util::quote_ident;
use tokio_postgres::Client;

use crate::db::MultiConn;
use crate::error::Result;
use crate::prepare::{PROCESSED_COLUMN, PROCESSED_INDEX};

/// Roll back any in-flight transaction on `src` and, if present, `destinations`. The first thing
/// teardown does when called with `after_error = true`.
pub async fn rollback_if_needed(
    src: &Client,
    destinations: Option<&MultiConn>,
    after_error: bool,
) -> Result<()> {
    if !after_error {
        return Ok(());
    }
    // ROLLBACK outside a transaction is a harmless no-op in Postgres, so this is safe to call
    // unconditionally rather than tracking whether a transaction was actually open.
    src.batch_execute("ROLLBACK;").await?;
    if let Some(destinations) = destinations {
        destinations.batch_execute("ROLLBACK;").await?;
    }
    Ok(())
}

/// Drop the `processed` partial index and column from SRC.
pub async fn teardown_src_table(src: &Client, src_table: &str) -> Result<()> {
    let table = quote_ident(src_table);
    let index = quote_ident(PROCESSED_INDEX);
    src.batch_execute(&format!(
        "DROP INDEX IF EXISTS {index};
         ALTER TABLE {table} DROP COLUMN IF EXISTS {col};",
        index = index,
        table = table,
        col = quote_ident(PROCESSED_COLUMN),
    ))
    .await?;
    tracing::info!(src_table, "tore down source table bookkeeping");
    Ok(())
}

/// Replicated mode: drop the publication and the source-side XFER table (cascades to the
/// subscription-independent objects it owns). Local-only mode: keep XFER as the deliverable and
/// only strip the `xfer_id` identity column.
pub async fn teardown_source_transfer(
    src: &Client,
    xfer_table: &str,
    publication: Option<&str>,
) -> Result<()> {
    let table = quote_ident(xfer_table);
    match publication {
        Some(publication) => {
            src.batch_execute(&format!(
                "DROP PUBLICATION IF EXISTS {pub_name};
                 DROP TABLE IF EXISTS {table} CASCADE;",
                pub_name = quote_ident(publication),
                table = table,
            ))
            .await?;
            tracing::info!(xfer_table, publication, "tore down replicated transfer table");
        }
        None => {
            src.batch_execute(&format!("ALTER TABLE {table} DROP COLUMN IF EXISTS xfer_id;"))
                .await?;
            tracing::info!(xfer_table, "stripped xfer_id, leaving transfer table as deliverable");
        }
    }
    Ok(())
}

/// Drop the subscription, the `xfer_id` index, and the `xfer_id` column on every destination.
pub async fn teardown_destinations(
    destinations: &MultiConn,
    xfer_table: &str,
    subscription: &str,
) -> Result<()> {
    if destinations.is_empty() {
        return Ok(());
    }
    let table = quote_ident(xfer_table);
    destinations
        .batch_execute(&format!(
            "DROP SUBSCRIPTION IF EXISTS {sub_name};
             DROP INDEX IF EXISTS {idx};
             ALTER TABLE {table} DROP COLUMN IF EXISTS xfer_id;",
            sub_name = quote_ident(subscription),
            idx = quote_ident(&format!("{xfer_table}_xfer_id_idx")),
            table = table,
        ))
        .await?;
    tracing::info!(xfer_table, subscription, "tore down destination tables");
    Ok(())
}

/// Run the full teardown sequence. `destinations` is `None` in local-only mode. Every step is
/// attempted even if an earlier one already reflects a torn-down state; the function only
/// surfaces the first database error it hits, since by that point there is no further
/// inconsistency teardown itself can repair.
pub async fn teardown_all(
    src: &Client,
    destinations: Option<&MultiConn>,
    src_table: &str,
    xfer_table: &str,
    publication: Option<&str>,
    subscription: Option<&str>,
    after_error: bool,
) -> Result<()> {
    rollback_if_needed(src, destinations, after_error).await?;

    if let (Some(destinations), Some(subscription)) = (destinations, subscription) {
        teardown_destinations(destinations, xfer_table, subscription).await?;
    }
    teardown_source_transfer(src, xfer_table, publication).await?;
    teardown_src_table(src, src_table).await?;

    tracing::info!(src_table, xfer_table, after_error, "teardown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn teardown_index_name_matches_prepare_index_name() {
        assert_eq!(PROCESSED_INDEX, "processed");
    }
}
