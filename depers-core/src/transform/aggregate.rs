//! Windowed aggregation: one output row per input row, each column either passed through
//! (`echo`) or rewritten to `op(column) OVER()`, cast back to its original type. Because the
//! function body restricts `FROM` to `SRC ⨝ scratch`, the window never sees anything outside the
//! current batch.

use depers_util::{column_suffix, quote_ident};
use tokio_postgres::Client;

use crate::db::ColumnDef;
use crate::error::Result;

/// One `column_operations` entry: the source column, its declared type, and the operation
/// (`"echo"` or a window function name such as `"sum"`/`"avg"`/`"rank"`).
#[derive(Clone)]
pub struct ColumnOp {
    /// Source column name.
    pub column: String,
    /// Source column type, also the cast target for the aggregated result.
    pub ty: String,
    /// `"echo"` or a window function name.
    pub op: String,
}

/// Per-row windowed aggregation over a fixed set of columns.
pub struct Aggregate {
    src_table: String,
    operations: Vec<ColumnOp>,
}

impl Aggregate {
    /// `operations` is the ordered `column_operations` list from settings.
    pub fn new(src_table: String, operations: Vec<ColumnOp>) -> Self {
        Aggregate { src_table, operations }
    }

    fn function_name(&self) -> String {
        let names: Vec<&str> = self.operations.iter().map(|c| c.column.as_str()).collect();
        format!("_aggr_{}", column_suffix(&names))
    }

    fn expr_for(op: &ColumnOp) -> String {
        let col = quote_ident(&op.column);
        if op.op == "echo" {
            format!("src.{col}")
        } else {
            format!("({func}(src.{col}) OVER())::{ty}", func = op.op, col = col, ty = op.ty)
        }
    }

    /// `(name, type)` pairs XFER is created with. The aggregated value keeps the source
    /// column's type, per the `::<original_type>` cast in the function body.
    pub fn output_schema(&self) -> Vec<ColumnDef> {
        self.operations.iter().map(|c| (c.column.clone(), c.ty.clone())).collect()
    }

    /// Create the set-returning function computing every column's windowed value for the
    /// current batch.
    pub async fn prepare(&self, src: &Client) -> Result<()> {
        let func = quote_ident(&self.function_name());
        let select_list =
            self.operations.iter().map(Self::expr_for).collect::<Vec<_>>().join(", ");
        let return_cols = self
            .operations
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.column), c.ty))
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

    /// One function emits every column, all in one pass over the batch.
    pub fn producer_funcs(&self) -> Vec<String> {
        vec![self.function_name()]
    }

    /// Drop the function [`Aggregate::prepare`] created.
    pub async fn cleanup(&self, src: &Client) -> Result<()> {
        src.batch_execute(&format!(
            "DROP FUNCTION IF EXISTS {func}();",
            func = quote_ident(&self.function_name())
        ))
        .await?;
        Ok(())
    }

    /// A windowed aggregation is well-defined over any non-empty batch, partial or not.
    pub fn skip_last_partial_batch(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_columns_pass_through_unchanged() {
        let op = ColumnOp { column: "name".into(), ty: "text".into(), op: "echo".into() };
        assert_eq!(Aggregate::expr_for(&op), "src.\"name\"");
    }

    #[test]
    fn aggregated_columns_apply_window_and_cast() {
        let op = ColumnOp { column: "amount".into(), ty: "numeric".into(), op: "sum".into() };
        assert_eq!(Aggregate::expr_for(&op), "(sum(src.\"amount\") OVER())::numeric");
    }

    #[test]
    fn output_schema_keeps_original_types() {
        let aggr = Aggregate::new("workers".into(), vec![
            ColumnOp { column: "amount".into(), ty: "numeric".into(), op: "sum".into() },
            ColumnOp { column: "name".into(), ty: "text".into(), op: "echo".into() },
        ]);
        assert_eq!(
            aggr.output_schema(),
            vec![
                ("amount".to_string(), "numeric".to_string()),
                ("name".to_string(), "text".to_string())
            ]
        );
    }
}
