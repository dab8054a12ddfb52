//! Settings-file and `.env` loading, out of scope as *business logic* per the core's spec, but a
//! complete binary still needs a thin loader. Mirrors `original_source/src/settings.py` (settings
//! JSON) and `db_connector.py` (`SRC_CONN_STRING`/`DST_CONN_STRINGS` env vars), with `.env`
//! parsing done by hand since no crate in the example pack pulls in a `.env`-file dependency.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level settings file shape.
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Directory log files are written under. Absent ⇒ console-only logging.
    pub logs_dir: Option<String>,
    /// Directory the metrics SQLite database is written under. Absent ⇒ metrics disabled.
    pub metrics_dir: Option<String>,
    /// The method/batching/column knobs the run controller and transformer family consume.
    pub processing_settings: ProcessingSettings,
}

/// The `processing_settings` object.
#[derive(Debug, Deserialize)]
pub struct ProcessingSettings {
    /// Source table name.
    pub src_table: String,
    /// Transfer table name.
    pub transfer_table: String,
    /// `copy` | `aggr` | `reduce_aggr` | `shuffle` | `select_random` | `uuid`.
    pub method: String,
    /// Rows selected per batch.
    pub batch_size: i64,
    /// Milliseconds slept between batches.
    pub batch_sleep_ms: u64,
    /// Seconds the trim worker sleeps between polls. Ignored in local-only mode.
    #[serde(default)]
    pub delete_sleep_s: u64,
    /// If true, the pipeline loops forever instead of stopping at end-of-source.
    #[serde(default)]
    pub continuous_mode: bool,
    /// `copy`: columns to carry through unchanged.
    #[serde(default)]
    pub columns: Vec<String>,
    /// `aggr`/`reduce_aggr`/`uuid`: per-column operation (`"echo"` or an op/function name).
    #[serde(default)]
    pub column_operations: HashMap<String, String>,
    /// `shuffle`/`select_random`: column groups.
    #[serde(default)]
    pub groups: Vec<Vec<String>>,
}

/// Parse the settings JSON at `path`.
pub fn load_settings(path: &Path) -> Result<Settings> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading settings file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("parsing settings file {}", path.display()))
}

/// Parse a `.env` file (`KEY=VALUE` per line, blank lines and `#` comments skipped) and apply its
/// entries to the process environment, without overwriting variables already set.
pub fn load_env_file(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let text =
        fs::read_to_string(path).with_context(|| format!("reading env file {}", path.display()))?;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim().trim_matches('"');
        if std::env::var_os(key).is_none() {
            // SAFETY: single-threaded at startup, before any worker spawns.
            unsafe { std::env::set_var(key, value) };
        }
    }
    Ok(())
}

/// The DSNs the run controller needs, read from the environment after `.env` loading.
pub struct ConnStrings {
    /// `SRC_CONN_STRING`.
    pub src: String,
    /// `DST_CONN_STRINGS`, parsed from its JSON array. `None` if the variable is unset (expected
    /// in local-only mode).
    pub destinations: Option<Vec<String>>,
}

/// Read `SRC_CONN_STRING` (required) and `DST_CONN_STRINGS` (a JSON array, optional) from the
/// process environment.
pub fn read_conn_strings(require_destinations: bool) -> Result<ConnStrings> {
    let src = std::env::var("SRC_CONN_STRING").context("SRC_CONN_STRING is not set")?;
    let destinations = match std::env::var("DST_CONN_STRINGS") {
        Ok(raw) => {
            let dsns: Vec<String> = serde_json::from_str(&raw)
                .context("DST_CONN_STRINGS is not a valid JSON array of strings")?;
            if dsns.is_empty() {
                bail!("DST_CONN_STRINGS must not be an empty array");
            }
            Some(dsns)
        }
        Err(_) if require_destinations => {
            bail!("DST_CONN_STRINGS is required in replicated mode")
        }
        Err(_) => None,
    };
    Ok(ConnStrings { src, destinations })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_copy_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{
                "logs_dir": "/tmp/logs",
                "processing_settings": {
                    "src_table": "workers",
                    "transfer_table": "_transfer_workers",
                    "method": "copy",
                    "batch_size": 5,
                    "batch_sleep_ms": 0,
                    "columns": ["name", "salary"]
                }
            }"#,
        )
        .unwrap();

        let settings = load_settings(&path).unwrap();
        assert_eq!(settings.logs_dir.as_deref(), Some("/tmp/logs"));
        assert_eq!(settings.processing_settings.method, "copy");
        assert_eq!(settings.processing_settings.columns, vec!["name", "salary"]);
        assert!(!settings.processing_settings.continuous_mode);
    }

    #[test]
    fn env_file_skips_comments_and_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "# a comment\n\nTEST_DEPERS_KEY=value\n").unwrap();

        load_env_file(&path).unwrap();
        assert_eq!(std::env::var("TEST_DEPERS_KEY").unwrap(), "value");
        std::env::remove_var("TEST_DEPERS_KEY");
    }

    #[test]
    fn missing_env_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_env_file(&dir.path().join("absent.env")).is_ok());
    }
}
