//! An append-only metrics sink for the transfer pipeline.
//!
//! The pipeline (producer), the trim worker (consumer) and the run controller all report
//! counters and gauges through a [`MetricsSink`] trait object. When metrics persistence is
//! disabled, [`null_sink`] hands back a stub implementing the same surface, so call sites never
//! have to branch on whether metrics are enabled.
#![deny(missing_docs, rustdoc::missing_crate_level_docs)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;

/// Errors returned by a [`MetricsSink`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The underlying SQLite store returned an error.
    #[error("metrics store error: {0}")]
    Store(#[from] rusqlite::Error),
}

/// A single point in the `(name, value, tag?, timestamp)` series.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    /// The value recorded at this point.
    pub value: f64,
    /// RFC3339-ish timestamp string, as stored by SQLite's `strftime`.
    pub timestamp: String,
}

/// Append-only counters and gauges with an optional tag.
///
/// `increment`/`increment_array` additionally keep an in-process running total per `(name, tag)`
/// and record the *cumulative* value on every call, matching how the pipeline reports "total
/// selected so far" rather than "selected this batch".
pub trait MetricsSink: Send + Sync {
    /// Record `value` for `name`, optionally tagged.
    fn add(&self, name: &str, value: f64, tag: Option<&str>);

    /// Add `delta` to the running total for `(name, tag)` and record the new cumulative value.
    fn increment(&self, name: &str, delta: f64, tag: Option<&str>);

    /// [`MetricsSink::add`] for a batch of `(value, tag)` pairs sharing one series name.
    fn add_array(&self, name: &str, values: &[f64], tags: &[Option<String>]) {
        for (value, tag) in values.iter().zip(tags.iter()) {
            self.add(name, *value, tag.as_deref());
        }
    }

    /// [`MetricsSink::increment`] for a batch of `(delta, tag)` pairs sharing one series name.
    fn increment_array(&self, name: &str, deltas: &[f64], tags: &[Option<String>]) {
        for (delta, tag) in deltas.iter().zip(tags.iter()) {
            self.increment(name, *delta, tag.as_deref());
        }
    }

    /// All recorded points for `name`, oldest first.
    fn by_name(&self, name: &str) -> Vec<MetricPoint>;

    /// All recorded points for `name` restricted to `tag`, oldest first.
    fn by_tag_and_name(&self, tag: &str, name: &str) -> Vec<MetricPoint>;

    /// Distinct tags recorded so far that start with `host=`.
    fn hosts(&self) -> Vec<String>;
}

fn running_total_key(name: &str, tag: Option<&str>) -> String {
    match tag {
        Some(tag) => format!("{name}_{tag}"),
        None => name.to_string(),
    }
}

/// A [`MetricsSink`] backed by a WAL-mode SQLite database.
pub struct SqliteMetricsSink {
    conn: Mutex<Connection>,
    last_values: Mutex<HashMap<String, f64>>,
}

impl SqliteMetricsSink {
    /// Open (creating if absent) the metrics database at `path` and ensure its schema exists.
    pub fn open(path: &Path) -> Result<Self, MetricsError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open a purely in-memory store, useful for tests.
    pub fn open_in_memory() -> Result<Self, MetricsError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, MetricsError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS metrics (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                value REAL NOT NULL,
                tag TEXT DEFAULT NULL,
                timestamp TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
            );
            CREATE INDEX IF NOT EXISTS idx_name_timestamp ON metrics(name, timestamp);
            CREATE INDEX IF NOT EXISTS idx_tag ON metrics(tag) WHERE tag IS NOT NULL;",
        )?;
        Ok(SqliteMetricsSink {
            conn: Mutex::new(conn),
            last_values: Mutex::new(HashMap::new()),
        })
    }

    fn insert(&self, name: &str, value: f64, tag: Option<&str>) {
        let conn = self.conn.lock();
        if let Err(err) = conn.execute(
            "INSERT INTO metrics (name, value, tag) VALUES (?1, ?2, ?3)",
            rusqlite::params![name, value, tag],
        ) {
            tracing::error!(name, value, tag, %err, "failed to record metric");
        }
    }

    fn query(&self, sql: &str, params: impl rusqlite::Params) -> Vec<MetricPoint> {
        let conn = self.conn.lock();
        let mut stmt = match conn.prepare(sql) {
            Ok(stmt) => stmt,
            Err(err) => {
                tracing::error!(%err, "failed to prepare metrics query");
                return Vec::new();
            }
        };
        let rows = stmt.query_map(params, |row| {
            Ok(MetricPoint {
                value: row.get(0)?,
                timestamp: row.get(1)?,
            })
        });
        match rows {
            Ok(rows) => rows.filter_map(Result::ok).collect(),
            Err(err) => {
                tracing::error!(%err, "failed to run metrics query");
                Vec::new()
            }
        }
    }
}

impl MetricsSink for SqliteMetricsSink {
    fn add(&self, name: &str, value: f64, tag: Option<&str>) {
        self.insert(name, value, tag);
    }

    fn increment(&self, name: &str, delta: f64, tag: Option<&str>) {
        let key = running_total_key(name, tag);
        let new_value = {
            let mut last_values = self.last_values.lock();
            let new_value = last_values.get(&key).copied().unwrap_or(0.0) + delta;
            last_values.insert(key, new_value);
            new_value
        };
        self.insert(name, new_value, tag);
    }

    fn by_name(&self, name: &str) -> Vec<MetricPoint> {
        self.query(
            "SELECT value, timestamp FROM metrics WHERE name = ?1 ORDER BY id",
            [name],
        )
    }

    fn by_tag_and_name(&self, tag: &str, name: &str) -> Vec<MetricPoint> {
        self.query(
            "SELECT value, timestamp FROM metrics WHERE tag = ?1 AND name = ?2 ORDER BY id",
            rusqlite::params![tag, name],
        )
    }

    fn hosts(&self) -> Vec<String> {
        let conn = self.conn.lock();
        let mut stmt = match conn
            .prepare("SELECT DISTINCT tag FROM metrics WHERE tag IS NOT NULL AND tag LIKE 'host=%'")
        {
            Ok(stmt) => stmt,
            Err(err) => {
                tracing::error!(%err, "failed to prepare hosts query");
                return Vec::new();
            }
        };
        stmt.query_map([], |row| row.get(0))
            .map(|rows| rows.filter_map(Result::ok).collect())
            .unwrap_or_default()
    }
}

/// A [`MetricsSink`] that discards everything. Used when `metrics_dir` is absent from settings.
#[derive(Default)]
pub struct NullMetricsSink;

impl MetricsSink for NullMetricsSink {
    fn add(&self, _name: &str, _value: f64, _tag: Option<&str>) {}
    fn increment(&self, _name: &str, _delta: f64, _tag: Option<&str>) {}
    fn by_name(&self, _name: &str) -> Vec<MetricPoint> {
        Vec::new()
    }
    fn by_tag_and_name(&self, _tag: &str, _name: &str) -> Vec<MetricPoint> {
        Vec::new()
    }
    fn hosts(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Build the metrics sink: a real, WAL-mode SQLite-backed one if `metrics_dir` is `Some`, a stub
/// otherwise. Callers hold the result behind an `Arc` and never need to know which one they got.
pub fn build_sink(metrics_dir: Option<&Path>) -> Result<Arc<dyn MetricsSink>, MetricsError> {
    match metrics_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|err| {
                tracing::error!(%err, dir = %dir.display(), "failed to create metrics_dir");
                rusqlite::Error::InvalidPath(dir.to_path_buf())
            })?;
            let sink = SqliteMetricsSink::open(&dir.join("metrics.db"))?;
            Ok(Arc::new(sink))
        }
        None => Ok(Arc::new(NullMetricsSink)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn add_records_raw_values() {
        let sink = SqliteMetricsSink::open_in_memory().unwrap();
        sink.add("batch_time_execution_s", 0.5, None);
        sink.add("batch_time_execution_s", 0.75, None);

        let points = sink.by_name("batch_time_execution_s");
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].value, 0.5);
        assert_eq!(points[1].value, 0.75);
    }

    #[test]
    fn increment_tracks_running_total_per_name_and_tag() {
        let sink = SqliteMetricsSink::open_in_memory().unwrap();
        sink.increment("total_selected_ctids", 5.0, None);
        sink.increment("total_selected_ctids", 3.0, None);

        let points = sink.by_name("total_selected_ctids");
        assert_eq!(points.iter().map(|p| p.value).collect::<Vec<_>>(), vec![5.0, 8.0]);
    }

    #[test]
    fn increment_is_independent_per_tag() {
        let sink = SqliteMetricsSink::open_in_memory().unwrap();
        sink.increment("total_cnt", 10.0, Some("host=a"));
        sink.increment("total_cnt", 1.0, Some("host=b"));
        sink.increment("total_cnt", 2.0, Some("host=a"));

        assert_eq!(
            sink.by_tag_and_name("host=a", "total_cnt")
                .iter()
                .map(|p| p.value)
                .collect::<Vec<_>>(),
            vec![10.0, 12.0]
        );
        assert_eq!(
            sink.by_tag_and_name("host=b", "total_cnt")
                .iter()
                .map(|p| p.value)
                .collect::<Vec<_>>(),
            vec![1.0]
        );
    }

    #[test]
    fn hosts_returns_only_host_tags() {
        let sink = SqliteMetricsSink::open_in_memory().unwrap();
        sink.add("total_cnt", 1.0, Some("host=a"));
        sink.add("total_cnt", 2.0, Some("host=b"));
        sink.add("other", 3.0, Some("not-a-host"));

        let mut hosts = sink.hosts();
        hosts.sort();
        assert_eq!(hosts, vec!["host=a".to_string(), "host=b".to_string()]);
    }

    #[test]
    fn array_helpers_zip_values_and_tags() {
        let sink = SqliteMetricsSink::open_in_memory().unwrap();
        sink.add_array(
            "total_cnt",
            &[1.0, 2.0],
            &[Some("host=a".to_string()), Some("host=b".to_string())],
        );

        assert_eq!(sink.by_tag_and_name("host=a", "total_cnt").len(), 1);
        assert_eq!(sink.by_tag_and_name("host=b", "total_cnt").len(), 1);
    }

    #[test]
    fn null_sink_discards_everything() {
        let sink = NullMetricsSink;
        sink.add("x", 1.0, None);
        sink.increment("y", 1.0, Some("host=a"));
        assert!(sink.by_name("x").is_empty());
        assert!(sink.hosts().is_empty());
    }

    #[test]
    fn build_sink_without_dir_is_a_stub() {
        let sink = build_sink(None).unwrap();
        sink.add("x", 1.0, None);
        assert!(sink.by_name("x").is_empty());
    }

    #[test]
    fn build_sink_with_dir_persists() {
        let dir = tempfile::tempdir().unwrap();
        let sink = build_sink(Some(dir.path())).unwrap();
        sink.increment("total_deleted", 4.0, None);
        assert_eq!(sink.by_name("total_deleted").last().unwrap().value, 4.0);
        assert!(dir.path().join("metrics.db").exists());
    }
}
