//! Within-group shuffle: columns are partitioned into independent groups, each group emitted in
//! its own random order within the batch. The outer `INSERT ... SELECT (g1()).*, (g2()).*` lines
//! the groups' rows up positionally, so a shuffled group never leaks correlation with any other
//! group's order.

use depers_util::{column_suffix, quote_ident};
use tokio_postgres::Client;

use crate::db::ColumnDef;
use crate::error::Result;

/// Columns partitioned into independently shuffled groups.
pub struct Shuffle {
    src_table: String,
    groups: Vec<Vec<ColumnDef>>,
}

impl Shuffle {
    /// `groups` are the `(name, type)` pairs for each group, resolved against SRC by the caller.
    pub fn new(src_table: String, groups: Vec<Vec<ColumnDef>>) -> Self {
        Shuffle { src_table, groups }
    }

    fn function_name(&self, group_idx: usize) -> String {
        let names: Vec<&str> =
            self.groups[group_idx].iter().map(|(n, _)| n.as_str()).collect();
        format!("_shuffle_g{}_{}", group_idx, column_suffix(&names))
    }

    /// `(name, type)` pairs XFER is created with, groups concatenated in order.
    pub fn output_schema(&self) -> Vec<ColumnDef> {
        self.groups.iter().flatten().cloned().collect()
    }

    /// Create one set-returning function per group, each selecting that group's columns from
    /// the batch in `RANDOM()` order.
    pub async fn prepare(&self, src: &Client) -> Result<()> {
        for (idx, group) in self.groups.iter().enumerate() {
            let func = quote_ident(&self.function_name(idx));
            let select_list = group
                .iter()
                .map(|(name, _)| format!("src.{}", quote_ident(name)))
                .collect::<Vec<_>>()
                .join(", ");
            let return_cols = group
                .iter()
                .map(|(name, ty)| format!("{} {}", quote_ident(name), ty))
                .collect::<Vec<_>>()
                .join(", ");
            src.batch_execute(&format!(
                "CREATE OR REPLACE FUNCTION {func}() RETURNS TABLE({return_cols}) AS $$
                    SELECT {select_list}
                    FROM {src_table} AS src
                    JOIN temp_ctid_holder AS scratch ON src.ctid = scratch._ctid_
                    ORDER BY RANDOM();
                $$ LANGUAGE sql;",
                func = func,
                return_cols = return_cols,
                select_list = select_list,
                src_table = quote_ident(&self.src_table),
            ))
            .await?;
        }
        Ok(())
    }

    /// One function per group, in group order.
    pub fn producer_funcs(&self) -> Vec<String> {
        (0..self.groups.len()).map(|idx| self.function_name(idx)).collect()
    }

    /// Drop every function [`Shuffle::prepare`] created.
    pub async fn cleanup(&self, src: &Client) -> Result<()> {
        for idx in 0..self.groups.len() {
            src.batch_execute(&format!(
                "DROP FUNCTION IF EXISTS {func}();",
                func = quote_ident(&self.function_name(idx))
            ))
            .await?;
        }
        Ok(())
    }

    /// A partial final batch still shuffles correctly; nothing to skip.
    pub fn skip_last_partial_batch(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_group_gets_its_own_function_name() {
        let shuffle = Shuffle::new(
            "workers".into(),
            vec![
                vec![("a".into(), "text".into())],
                vec![("b".into(), "int4".into()), ("c".into(), "int4".into())],
            ],
        );
        let funcs = shuffle.producer_funcs();
        assert_eq!(funcs.len(), 2);
        assert_ne!(funcs[0], funcs[1]);
        assert!(funcs[0].contains("g0"));
        assert!(funcs[1].contains("g1"));
    }

    #[test]
    fn output_schema_concatenates_groups_in_order() {
        let shuffle = Shuffle::new(
            "workers".into(),
            vec![vec![("a".into(), "text".into())], vec![("b".into(), "int4".into())]],
        );
        assert_eq!(
            shuffle.output_schema(),
            vec![("a".to_string(), "text".to_string()), ("b".to_string(), "int4".to_string())]
        );
    }
}
