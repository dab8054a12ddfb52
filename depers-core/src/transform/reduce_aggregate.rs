//! Reducing aggregation: same `column_operations` input shape as [`super::Aggregate`], but
//! emits a single output row per batch instead of one per input row, using plain aggregate functions
//! (`GROUP BY` collapsing the whole batch to one group) rather than window functions.

use depers_util::{column_suffix, quote_ident};
use tokio_postgres::Client;

use super::aggregate::ColumnOp;
use crate::db::ColumnDef;
use crate::error::Result;

/// Per-batch reducing aggregation over a fixed set of columns.
pub struct ReduceAggregate {
    src_table: String,
    operations: Vec<ColumnOp>,
}

impl ReduceAggregate {
    /// `operations` is the ordered `column_operations` list from settings.
    pub fn new(src_table: String, operations: Vec<ColumnOp>) -> Self {
        ReduceAggregate { src_table, operations }
    }

    fn function_name(&self) -> String {
        let names: Vec<&str> = self.operations.iter().map(|c| c.column.as_str()).collect();
        format!("_reduceaggr_{}", column_suffix(&names))
    }

    fn expr_for(op: &ColumnOp) -> String {
        let col = quote_ident(&op.column);
        if op.op == "echo" {
            // No reducing operation: echo under a reducing aggregation still needs a single
            // representative value per batch; `min` is an arbitrary deterministic choice.
            format!("min(src.{col})::{ty}", col = col, ty = op.ty)
        } else {
            format!("{func}(src.{col})::{ty}", func = op.op, col = col, ty = op.ty)
        }
    }

    /// `(name, type)` pairs XFER is created with.
    pub fn output_schema(&self) -> Vec<ColumnDef> {
        self.operations.iter().map(|c| (c.column.clone(), c.ty.clone())).collect()
    }

    /// Create the set-returning function reducing the whole batch to one output row.
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

    /// One function emits the batch's single reduced row.
    pub fn producer_funcs(&self) -> Vec<String> {
        vec![self.function_name()]
    }

    /// Drop the function [`ReduceAggregate::prepare`] created.
    pub async fn cleanup(&self, src: &Client) -> Result<()> {
        src.batch_execute(&format!(
            "DROP FUNCTION IF EXISTS {func}();",
            func = quote_ident(&self.function_name())
        ))
        .await?;
        Ok(())
    }

    /// A reduction is well-defined over any non-empty batch, partial or not.
    pub fn skip_last_partial_batch(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_name_is_distinct_from_aggregate() {
        let reduce = ReduceAggregate::new("workers".into(), vec![ColumnOp {
            column: "amount".into(),
            ty: "numeric".into(),
            op: "sum".into(),
        }]);
        assert_eq!(reduce.function_name(), "_reduceaggr_amount");
    }

    #[test]
    fn echo_under_reduction_uses_min_as_representative() {
        let op = ColumnOp { column: "name".into(), ty: "text".into(), op: "echo".into() };
        assert_eq!(ReduceAggregate::expr_for(&op), "min(src.\"name\")::text");
    }
}
