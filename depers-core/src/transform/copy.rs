//! Column-wise copy: the output schema is exactly the listed source columns, unmodified.

use depers_util::{column_suffix, quote_ident};
use tokio_postgres::Client;

use crate::db::ColumnDef;
use crate::error::Result;

/// Selects a fixed list of source columns, passed through unchanged.
pub struct Copy {
    src_table: String,
    columns: Vec<ColumnDef>,
}

impl Copy {
    /// `columns` are the `(name, type)` pairs to copy, already resolved against SRC by the
    /// caller (the run controller, via the schema introspector).
    pub fn new(src_table: String, columns: Vec<ColumnDef>) -> Self {
        Copy { src_table, columns }
    }

    fn function_name(&self) -> String {
        let names: Vec<&str> = self.columns.iter().map(|(n, _)| n.as_str()).collect();
        format!("_copy_{}", column_suffix(&names))
    }

    /// `(name, type)` pairs XFER is created with.
    pub fn output_schema(&self) -> Vec<ColumnDef> {
        self.columns.clone()
    }

    /// Create the set-returning function selecting `columns` from SRC joined to the scratch
    /// table.
    pub async fn prepare(&self, src: &Client) -> Result<()> {
        let func = quote_ident(&self.function_name());
        let select_list = self
            .columns
            .iter()
            .map(|(name, _)| format!("src.{}", quote_ident(name)))
            .collect::<Vec<_>>()
            .join(", ");
        let return_cols = self
            .columns
            .iter()
            .map(|(name, ty)| format!("{} {}", quote_ident(name), ty))
            .collect::<Vec<_>>()
            .join(", ");
        src.batch_execute(&format!(
            "CREATE OR REPLACE FUNCTION {func}() RETURNS TABLE({return_cols}) AS $$
                SELECT {select_list}
                FROM {src_table} AS src
                JOIN temp_ctid_holder AS scratch ON src.ctid = scratch._ctid_;
            $$ LANGUAGE sql;",
            func = func,
            return_cols = return_cols,
            select_list = select_list,
            src_table = quote_ident(&self.src_table),
        ))
        .await?;
        Ok(())
    }

    /// This method's output comes from a single set-returning function.
    pub fn producer_funcs(&self) -> Vec<String> {
        vec![self.function_name()]
    }

    /// Drop the function [`Copy::prepare`] created.
    pub async fn cleanup(&self, src: &Client) -> Result<()> {
        src.batch_execute(&format!(
            "DROP FUNCTION IF EXISTS {func}();",
            func = quote_ident(&self.function_name())
        ))
        .await?;
        Ok(())
    }

    /// Copy never drops a partial final batch.
    pub fn skip_last_partial_batch(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_name_is_deterministic_from_columns() {
        let a =
            Copy::new("workers".into(), vec![("a".into(), "text".into()), ("b".into(), "int4".into())]);
        let b =
            Copy::new("workers".into(), vec![("a".into(), "text".into()), ("b".into(), "int4".into())]);
        assert_eq!(a.function_name(), b.function_name());
        assert_eq!(a.function_name(), "_copy_a_b");
    }

    #[test]
    fn output_schema_preserves_order_and_types() {
        let copy =
            Copy::new("workers".into(), vec![("a".into(), "text".into()), ("b".into(), "int4".into())]);
        assert_eq!(
            copy.output_schema(),
            vec![("a".to_string(), "text".to_string()), ("b".to_string(), "int4".to_string())]
        );
    }
}
