//! C3, idempotent preparation of the bookkeeping column, the transfer table and, in replicated
//! mode, the publication/destination tables/subscription.

use depers_util::quote_ident;
use tokio_postgres::Client;

use crate::db::{ColumnDef, FanoutParams, MultiConn};
use crate::error::{Error, Result};

/// Name of the bookkeeping column added to SRC.
pub const PROCESSED_COLUMN: &str = "processed";

/// Name of the partial index over [`PROCESSED_COLUMN`], matching the original's convention of
/// naming the index after the column itself (a single run per source table is assumed, so this
/// name never needs to be scoped by table).
pub const PROCESSED_INDEX: &str = "processed";

/// Step 1: add the `processed` column and its partial index to SRC. Idempotent: both statements
/// use `IF NOT EXISTS`.
pub async fn prepare_src_table(src: &Client, src_table: &str) -> Result<()> {
    let table = quote_ident(src_table);
    let index = quote_ident(PROCESSED_INDEX);
    src.batch_execute(&format!(
        "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {col} boolean;
         CREATE INDEX IF NOT EXISTS {index} ON {table} ({col}) WHERE {col} IS NULL;",
        table = table,
        col = quote_ident(PROCESSED_COLUMN),
        index = index,
    ))
    .await?;
    tracing::info!(src_table, "prepared source table");
    Ok(())
}

/// Step 2: create XFER on the source cluster with `output_schema` plus a `xfer_id bigserial`
/// primary key. Idempotent via `IF NOT EXISTS`.
pub async fn prepare_transfer_table(
    src: &Client,
    xfer_table: &str,
    output_schema: &[ColumnDef],
) -> Result<()> {
    if output_schema.is_empty() {
        return Err(Error::Invariant("output schema must not be empty".into()));
    }
    let mut columns = String::new();
    for (name, ty) in output_schema {
        columns.push_str(&format!("{} {}, ", quote_ident(name), ty));
    }
    src.batch_execute(&format!(
        "CREATE TABLE IF NOT EXISTS {table} ({columns}xfer_id bigserial primary key);",
        table = quote_ident(xfer_table),
        columns = columns,
    ))
    .await?;
    tracing::info!(xfer_table, "prepared transfer table");
    Ok(())
}

/// Steps 3-4: create the publication on the source and, on every destination, the mirror table,
/// `xfer_id` column, index, and subscription with a unique slot name. No-op if `destinations` is
/// empty (local-only mode stops after [`prepare_transfer_table`]).
pub async fn prepare_replication(
    src: &Client,
    src_dsn: &str,
    destinations: &MultiConn,
    xfer_table: &str,
    output_schema: &[ColumnDef],
    publication: &str,
    subscription: &str,
) -> Result<()> {
    if destinations.is_empty() {
        return Err(Error::Invariant(
            "prepare_replication called with no destination connections".into(),
        ));
    }

    let table = quote_ident(xfer_table);
    src.batch_execute(&format!(
        "CREATE PUBLICATION {pub_name} FOR TABLE {table} WITH (publish = 'insert');",
        pub_name = quote_ident(publication),
        table = table,
    ))
    .await?;
    tracing::info!(publication, xfer_table, "created publication");

    let mut columns = String::new();
    for (name, ty) in output_schema {
        columns.push_str(&format!("{} {}, ", quote_ident(name), ty));
    }
    destinations
        .batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS {table} ({columns}xfer_id bigint);
             CREATE INDEX IF NOT EXISTS {idx} ON {table} (xfer_id);",
            table = table,
            columns = columns,
            idx = quote_ident(&format!("{xfer_table}_xfer_id_idx")),
        ))
        .await?;
    tracing::info!(xfer_table, count = destinations.len(), "prepared destination tables");

    let slot_names: Vec<String> =
        depers_util::SlotNameGenerator::default().take(destinations.len()).collect();
    let sub_sql = format!(
        "CREATE SUBSCRIPTION {sub_name} CONNECTION $1 PUBLICATION {pub_name} \
         WITH (slot_name = $2, create_slot = true);",
        sub_name = quote_ident(subscription),
        pub_name = quote_ident(publication),
    );
    let params: Vec<Vec<&(dyn tokio_postgres::types::ToSql + Sync)>> = slot_names
        .iter()
        .map(|slot| {
            let src_dsn: &(dyn tokio_postgres::types::ToSql + Sync) = &src_dsn;
            let slot: &(dyn tokio_postgres::types::ToSql + Sync) = slot;
            vec![src_dsn, slot]
        })
        .collect();
    destinations.execute(&sub_sql, FanoutParams::PerMember(params)).await?;
    tracing::info!(subscription, slots = ?slot_names, "created subscriptions");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processed_index_name_matches_the_column_it_covers() {
        assert_eq!(PROCESSED_INDEX, PROCESSED_COLUMN);
    }
}
