//! Resolves a [`ProcessingSettings`] + the source table's introspected columns into a concrete
//! [`Method`], mirroring `build_transformer` in `original_source/depers_and_replicate.py` /
//! `depers_only.py`.

use std::collections::HashMap;

use anyhow::{bail, Result};
use depers_core::db::ColumnDef;
use depers_core::transform::{
    Aggregate, ColumnOp, CopyMethod, Method, RandomSelect, ReduceAggregate, Shuffle, UuidReplace,
};

use crate::config::ProcessingSettings;

fn resolve_columns(
    names: &[String],
    by_name: &HashMap<String, String>,
) -> Result<Vec<ColumnDef>> {
    names
        .iter()
        .map(|name| {
            by_name
                .get(name)
                .map(|ty| (name.clone(), ty.clone()))
                .ok_or_else(|| anyhow::anyhow!("unknown column {name:?} in source table"))
        })
        .collect()
}

fn resolve_column_ops(
    ops: &HashMap<String, String>,
    by_name: &HashMap<String, String>,
) -> Result<Vec<ColumnOp>> {
    if ops.is_empty() {
        bail!("column_operations must not be empty for this method");
    }
    // HashMap has no stable iteration order; resolve against the source's column order so the
    // emitted schema is deterministic run to run.
    let mut resolved: Vec<ColumnOp> = by_name
        .iter()
        .filter_map(|(name, ty)| {
            ops.get(name).map(|op| ColumnOp { column: name.clone(), ty: ty.clone(), op: op.clone() })
        })
        .collect();
    resolved.sort_by(|a, b| a.column.cmp(&b.column));
    if resolved.len() != ops.len() {
        bail!("column_operations references a column not present in the source table");
    }
    Ok(resolved)
}

fn resolve_groups(
    groups: &[Vec<String>],
    by_name: &HashMap<String, String>,
) -> Result<Vec<Vec<ColumnDef>>> {
    if groups.is_empty() {
        bail!("groups must not be empty for this method");
    }
    groups.iter().map(|g| resolve_columns(g, by_name)).collect()
}

/// Build the transformer variant named by `settings.method`, resolving every column name it
/// references against `source_columns` (the schema introspector's output for the source table).
pub fn build_method(settings: &ProcessingSettings, source_columns: &[ColumnDef]) -> Result<Method> {
    let by_name: HashMap<String, String> =
        source_columns.iter().cloned().collect();

    let method = match settings.method.as_str() {
        "copy" => {
            if settings.columns.is_empty() {
                bail!("columns must not be empty for the copy method");
            }
            Method::Copy(CopyMethod::new(
                settings.src_table.clone(),
                resolve_columns(&settings.columns, &by_name)?,
            ))
        }
        "aggr" => Method::Aggregate(Aggregate::new(
            settings.src_table.clone(),
            resolve_column_ops(&settings.column_operations, &by_name)?,
        )),
        "reduce_aggr" => Method::ReduceAggregate(ReduceAggregate::new(
            settings.src_table.clone(),
            resolve_column_ops(&settings.column_operations, &by_name)?,
        )),
        "shuffle" => Method::Shuffle(Shuffle::new(
            settings.src_table.clone(),
            resolve_groups(&settings.groups, &by_name)?,
        )),
        "select_random" => Method::RandomSelect(RandomSelect::new(
            settings.src_table.clone(),
            resolve_groups(&settings.groups, &by_name)?,
        )),
        "uuid" => Method::UuidReplace(UuidReplace::new(
            settings.src_table.clone(),
            settings.transfer_table.clone(),
            resolve_column_ops(&settings.column_operations, &by_name)?,
        )),
        other => bail!("unknown method {other:?}"),
    };
    Ok(method)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols() -> Vec<ColumnDef> {
        vec![
            ("name".to_string(), "text".to_string()),
            ("salary".to_string(), "numeric".to_string()),
            ("address".to_string(), "text".to_string()),
        ]
    }

    fn settings(method: &str) -> ProcessingSettings {
        ProcessingSettings {
            src_table: "workers".into(),
            transfer_table: "_transfer_workers".into(),
            method: method.into(),
            batch_size: 5,
            batch_sleep_ms: 0,
            delete_sleep_s: 0,
            continuous_mode: false,
            columns: vec![],
            column_operations: HashMap::new(),
            groups: vec![],
        }
    }

    #[test]
    fn copy_resolves_requested_columns_in_order() {
        let mut s = settings("copy");
        s.columns = vec!["name".into(), "salary".into()];
        let method = build_method(&s, &cols()).unwrap();
        assert_eq!(
            method.output_schema(),
            vec![("name".to_string(), "text".to_string()), ("salary".to_string(), "numeric".to_string())]
        );
    }

    #[test]
    fn copy_rejects_unknown_columns() {
        let mut s = settings("copy");
        s.columns = vec!["nonexistent".into()];
        assert!(build_method(&s, &cols()).is_err());
    }

    #[test]
    fn unknown_method_is_rejected() {
        let s = settings("bogus");
        assert!(build_method(&s, &cols()).is_err());
    }

    #[test]
    fn shuffle_resolves_every_group() {
        let mut s = settings("shuffle");
        s.groups = vec![vec!["name".into()], vec!["salary".into(), "address".into()]];
        let method = build_method(&s, &cols()).unwrap();
        assert_eq!(method.output_schema().len(), 3);
    }
}
