//! This crate provides miscellaneous utilities shared by the other `depers-*` crates: SQL
//! identifier quoting, DSN host extraction for metric tags, and name-joining helpers.
#![deny(missing_docs, rustdoc::missing_crate_level_docs)]

/// Quote a SQL identifier (table, column, type or function name) for safe interpolation into a
/// DDL/DML statement built via `format!`.
///
/// Identifiers in this system are always derived from trusted configuration (never from
/// untrusted user input), so quoting here is a defense-in-depth measure rather than the sole
/// barrier against injection: doubling embedded `"` is enough to keep `format!`-built statements
/// well-formed.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Join a list of already-quoted (or intentionally bare) SQL fragments with `, `.
pub fn join_names<S: AsRef<str>>(names: &[S]) -> String {
    join_names_with(names, ", ")
}

/// Join a list of SQL fragments with an arbitrary delimiter.
pub fn join_names_with<S: AsRef<str>>(names: &[S], delimiter: &str) -> String {
    names
        .iter()
        .map(|n| n.as_ref())
        .collect::<Vec<_>>()
        .join(delimiter)
}

/// Build a deterministic suffix for type/function/table names from an ordered column list, e.g.
/// `["name", "salary"]` becomes `"_name_salary"`. Repeated runs with identical settings produce
/// identical names, so teardown can find and drop them by construction rather than bookkeeping.
pub fn column_suffix<S: AsRef<str>>(columns: &[S]) -> String {
    let mut out = String::new();
    for c in columns {
        out.push('_');
        out.push_str(c.as_ref());
    }
    out
}

/// Extract the `host=...` fragment from a libpq-style DSN, for use as a metric tag.
///
/// Returns `None` if the DSN has no `host` key (e.g. a bare `postgresql://` URL without one).
pub fn extract_host(dsn: &str) -> Option<String> {
    dsn.split_whitespace()
        .find(|tok| tok.starts_with("host="))
        .map(|tok| tok.to_string())
}

/// An infinite generator of deterministic, monotonically increasing replication slot names:
/// `transfer_slot_replica_1`, `transfer_slot_replica_2`, ...
///
/// Restarts at 1 every process run (slot names are not stable across re-runs, see DESIGN.md); a
/// fresh [`CREATE SUBSCRIPTION`] after a full teardown always starts replication from scratch.
pub struct SlotNameGenerator {
    next: u64,
}

impl SlotNameGenerator {
    /// Create a generator that will yield `transfer_slot_replica_1` first.
    pub fn new() -> Self {
        SlotNameGenerator { next: 1 }
    }
}

impl Default for SlotNameGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for SlotNameGenerator {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let name = format!("transfer_slot_replica_{}", self.next);
        self.next += 1;
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_and_escapes_identifiers() {
        assert_eq!(quote_ident("workers"), "\"workers\"");
        assert_eq!(quote_ident("weird\"name"), "\"weird\"\"name\"");
    }

    #[test]
    fn joins_names_with_default_delimiter() {
        assert_eq!(join_names(&["a", "b", "c"]), "a, b, c");
    }

    #[test]
    fn joins_names_with_custom_delimiter() {
        assert_eq!(join_names_with(&["a", "b"], "_"), "a_b");
    }

    #[test]
    fn column_suffix_is_deterministic() {
        assert_eq!(column_suffix(&["name", "salary"]), "_name_salary");
        assert_eq!(column_suffix(&["name", "salary"]), column_suffix(&["name", "salary"]));
    }

    #[test]
    fn extracts_host_from_dsn() {
        assert_eq!(
            extract_host("host=10.0.0.1 port=5432 dbname=prod"),
            Some("host=10.0.0.1".to_string())
        );
        assert_eq!(extract_host("dbname=prod"), None);
    }

    #[test]
    fn slot_name_generator_is_monotonic_and_restarts_from_one() {
        let mut gen = SlotNameGenerator::new();
        assert_eq!(gen.next().as_deref(), Some("transfer_slot_replica_1"));
        assert_eq!(gen.next().as_deref(), Some("transfer_slot_replica_2"));

        let mut gen2 = SlotNameGenerator::new();
        assert_eq!(gen2.next().as_deref(), Some("transfer_slot_replica_1"));
    }
}
