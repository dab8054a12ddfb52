//! One randomly chosen row per group per batch. The only variant where
//! [`RandomSelect::skip_last_partial_batch`] is `true`: "one random row per group" has no
//! well-defined meaning for a partial group composition that will never recur once the batch is
//! committed, so a short final batch is dropped rather than processed.

use depers_util::{column_suffix, quote_ident};
use tokio_postgres::Client;

use crate::db::ColumnDef;
use crate::error::Result;

/// Columns partitioned into groups, one row selected at random per group per batch.
pub struct RandomSelect {
    src_table: String,
    groups: Vec<Vec<ColumnDef>>,
}

impl RandomSelect {
    /// `groups` are the `(name, type)` pairs for each group, resolved against SRC by the caller.
    pub fn new(src_table: String, groups: Vec<Vec<ColumnDef>>) -> Self {
        RandomSelect { src_table, groups }
    }

    fn function_name(&self, group_idx: usize) -> String {
        let names: Vec<&str> =
            self.groups[group_idx].iter().map(|(n, _)| n.as_str()).collect();
        format!("_randsel_g{}_{}", group_idx, column_suffix(&names))
    }

    /// `(name, type)` pairs XFER is created with, groups concatenated in order.
    pub fn output_schema(&self) -> Vec<ColumnDef> {
        self.groups.iter().flatten().cloned().collect()
    }

    /// Create one set-returning function per group, each returning a single row chosen at
    /// random from the batch.
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
                    ORDER BY RANDOM()
                    LIMIT 1;
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

    /// Drop every function [`RandomSelect::prepare`] created.
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

    /// A partial final batch is dropped, not sampled from.
    pub fn skip_last_partial_batch(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_skips_partial_batches() {
        let select = RandomSelect::new("workers".into(), vec![vec![("a".into(), "text".into())]]);
        assert!(select.skip_last_partial_batch());
    }

    #[test]
    fn function_names_are_scoped_per_group() {
        let select = RandomSelect::new(
            "workers".into(),
            vec![vec![("a".into(), "text".into())], vec![("b".into(), "text".into())]],
        );
        assert_eq!(select.function_name(0), "_randsel_g0_a");
        assert_eq!(select.function_name(1), "_randsel_g1_b");
    }
}
