//! C1 (fan-out connection) and C2 (schema introspector).

use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row};

use crate::error::{Error, Result};

/// A `(column_name, column_type)` pair as read from `information_schema.columns`.
pub type ColumnDef = (String, String);

/// Connect to a single Postgres cluster. Autocommit is the connection's natural mode: statements
/// take effect immediately unless wrapped in an explicit `BEGIN`/`COMMIT` issued by the caller,
/// which is how the pipeline loop (C6) gets its autocommit-off batches without needing a typed
/// transaction handle that would otherwise have to outlive the loop.
pub async fn connect(dsn: &str) -> Result<Client> {
    let (client, connection) = tokio_postgres::connect(dsn, NoTls).await?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            tracing::error!(%err, "connection task failed");
        }
    });
    tracing::info!(host = depers_util::extract_host(dsn).as_deref().unwrap_or("?"), "connected");
    Ok(client)
}

/// Parameters passed to a fan-out statement.
///
/// Either every destination receives the same bound parameters ([`FanoutParams::Broadcast`]), or
/// each destination receives its own distinct set ([`FanoutParams::PerMember`]), the latter being
/// how each destination ends up subscribing with a distinct replication slot name.
pub enum FanoutParams<'a> {
    /// No bound parameters.
    None,
    /// The same parameters are sent to every member.
    Broadcast(&'a [&'a (dyn ToSql + Sync)]),
    /// The Nth element is sent to the Nth member. Must have at least as many entries as there
    /// are members, or [`MultiConn::execute`]/[`MultiConn::query`] return
    /// [`Error::Invariant`].
    PerMember(Vec<Vec<&'a (dyn ToSql + Sync)>>),
}

/// One logical connection proxying statements to N destination clusters in lockstep.
pub struct MultiConn {
    clients: Vec<Client>,
    hosts: Vec<String>,
}

impl MultiConn {
    /// Connect to every DSN in `dsns`, in order.
    pub async fn connect_all(dsns: &[String]) -> Result<Self> {
        let mut clients = Vec::with_capacity(dsns.len());
        let mut hosts = Vec::with_capacity(dsns.len());
        for dsn in dsns {
            clients.push(connect(dsn).await?);
            hosts.push(depers_util::extract_host(dsn).unwrap_or_else(|| dsn.clone()));
        }
        Ok(MultiConn { clients, hosts })
    }

    /// The `host=...` tag for each underlying connection, in cluster order.
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Number of underlying connections.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether there are no underlying connections.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    fn params_for<'a>(&self, params: &'a FanoutParams<'a>, idx: usize) -> Result<&'a [&'a (dyn ToSql + Sync)]> {
        match params {
            FanoutParams::None => Ok(&[]),
            FanoutParams::Broadcast(p) => Ok(p),
            FanoutParams::PerMember(per) => per
                .get(idx)
                .map(|v| v.as_slice())
                .ok_or_else(|| Error::Invariant("fewer per-member parameter sets than connections".into())),
        }
    }

    /// Execute `sql` against every member, returning the affected-row count for each, aligned
    /// with connection order.
    pub async fn execute(&self, sql: &str, params: FanoutParams<'_>) -> Result<Vec<u64>> {
        let mut counts = Vec::with_capacity(self.clients.len());
        for (idx, client) in self.clients.iter().enumerate() {
            let p = self.params_for(&params, idx)?;
            counts.push(client.execute(sql, p).await?);
        }
        Ok(counts)
    }

    /// Run `sql` (which may contain multiple `;`-separated statements and takes no bound
    /// parameters) against every member. Used for `BEGIN`/`COMMIT`/`ROLLBACK` and for DDL.
    pub async fn batch_execute(&self, sql: &str) -> Result<()> {
        for client in &self.clients {
            client.batch_execute(sql).await?;
        }
        Ok(())
    }

    /// Run `sql` against every member and return all rows, aligned with connection order.
    pub async fn query(&self, sql: &str, params: FanoutParams<'_>) -> Result<Vec<Vec<Row>>> {
        let mut out = Vec::with_capacity(self.clients.len());
        for (idx, client) in self.clients.iter().enumerate() {
            let p = self.params_for(&params, idx)?;
            out.push(client.query(sql, p).await?);
        }
        Ok(out)
    }

    /// Run `sql` against every member and return the first row of each, aligned with connection
    /// order. `None` for a member whose result set was empty.
    pub async fn query_opt(&self, sql: &str, params: FanoutParams<'_>) -> Result<Vec<Option<Row>>> {
        let mut out = Vec::with_capacity(self.clients.len());
        for (idx, client) in self.clients.iter().enumerate() {
            let p = self.params_for(&params, idx)?;
            out.push(client.query_opt(sql, p).await?);
        }
        Ok(out)
    }
}

/// Read `(column_name, column_type)` for `table`, ordered by position. The schema introspector
/// (C2), used both to build the XFER output schema and to look up column types per method.
pub async fn introspect_columns(client: &Client, table: &str) -> Result<Vec<ColumnDef>> {
    let rows = client
        .query(
            "SELECT column_name, data_type FROM information_schema.columns \
             WHERE table_name = $1 ORDER BY ordinal_position",
            &[&table],
        )
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| (row.get::<_, String>(0), row.get::<_, String>(1)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_member_params_must_cover_every_connection() {
        // Exercise the bookkeeping logic without a live connection: build a MultiConn with no
        // clients and assert the PerMember lookup path is the thing that would fail first.
        let conn = MultiConn { clients: Vec::new(), hosts: Vec::new() };
        let params: FanoutParams<'_> = FanoutParams::PerMember(vec![]);
        // idx 0 is out of range for an empty Vec, regardless of client count.
        assert!(conn.params_for(&params, 0).is_err());
    }

    #[test]
    fn broadcast_params_are_reused_for_every_index() {
        let conn = MultiConn { clients: Vec::new(), hosts: Vec::new() };
        let bound: &[&(dyn ToSql + Sync)] = &[];
        let params = FanoutParams::Broadcast(bound);
        assert!(conn.params_for(&params, 0).is_ok());
        assert!(conn.params_for(&params, 5).is_ok());
    }
}
