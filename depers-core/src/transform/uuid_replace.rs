//! UUID replacement: each column is either passed through (`echo`) or replaced by a freshly
//! generated UUID, with the mapping `(uuid, original_value)` recorded in a column-owned table so
//! the substitution can be reversed by whoever holds access to the mapping table.

use depers_util::{column_suffix, quote_ident};
use tokio_postgres::Client;

use super::aggregate::ColumnOp;
use crate::db::ColumnDef;
use crate::error::Result;

/// Columns each either echoed or replaced by a generated UUID.
pub struct UuidReplace {
    src_table: String,
    xfer_table: String,
    operations: Vec<ColumnOp>,
}

impl UuidReplace {
    /// `operations` is the ordered `column_operations` list from settings; `op` is `"echo"` or
    /// `"uuid"`. `xfer_table` names the mapping tables, so two runs against different transfer
    /// tables with the same column name never collide.
    pub fn new(src_table: String, xfer_table: String, operations: Vec<ColumnOp>) -> Self {
        UuidReplace { src_table, xfer_table, operations }
    }

    fn function_name(&self) -> String {
        let names: Vec<&str> = self.operations.iter().map(|c| c.column.as_str()).collect();
        format!("_uuid_{}", column_suffix(&names))
    }

    fn mapping_table_name(&self, column: &str) -> String {
        format!("{}_uuid_{}", self.xfer_table, column)
    }

    /// `(name, type)` pairs XFER is created with: `uuid` for replaced columns, the original type
    /// for echoed ones.
    pub fn output_schema(&self) -> Vec<ColumnDef> {
        self.operations
            .iter()
            .map(|c| {
                if c.op == "uuid" {
                    (c.column.clone(), "uuid".to_string())
                } else {
                    (c.column.clone(), c.ty.clone())
                }
            })
            .collect()
    }

    /// Create a mapping table per `uuid` column plus the single function emitting one output
    /// row per input row: echoed columns pass through, `uuid` columns get a freshly generated
    /// UUID with the `(uuid, original_value)` pair recorded as a side effect.
    pub async fn prepare(&self, src: &Client) -> Result<()> {
        for op in self.operations.iter().filter(|c| c.op == "uuid") {
            let table = quote_ident(&self.mapping_table_name(&op.column));
            src.batch_execute(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (uuid uuid primary key, original_value {ty});",
                table = table,
                ty = op.ty,
            ))
            .await?;
        }

        let func = quote_ident(&self.function_name());
        let return_cols = self
            .operations
            .iter()
            .map(|c| {
                let ty = if c.op == "uuid" { "uuid".to_string() } else { c.ty.clone() };
                format!("{} {}", quote_ident(&c.column), ty)
            })
            .collect::<Vec<_>>()
            .join(", ");

        let mut body = String::new();
        body.push_str("DECLARE\n    rec RECORD;\n");
        for op in self.operations.iter().filter(|c| c.op == "uuid") {
            body.push_str(&format!("    gen_{col} uuid;\n", col = op.column));
        }
        body.push_str("BEGIN\n");
        body.push_str(&format!(
            "    FOR rec IN SELECT src.* FROM {src_table} AS src \
             JOIN temp_ctid_holder AS scratch ON src.ctid = scratch._ctid_ LOOP\n",
            src_table = quote_ident(&self.src_table),
        ));
        for op in self.operations.iter().filter(|c| c.op == "uuid") {
            let mapping_table = quote_ident(&self.mapping_table_name(&op.column));
            body.push_str(&format!(
                "        gen_{col} := gen_random_uuid();\n        \
                 INSERT INTO {mapping_table} (uuid, original_value) VALUES (gen_{col}, rec.{col});\n",
                col = op.column,
                mapping_table = mapping_table,
            ));
        }
        let return_exprs = self
            .operations
            .iter()
            .map(|c| {
                if c.op == "uuid" {
                    format!("gen_{col}", col = c.column)
                } else {
                    format!("rec.{}", quote_ident(&c.column))
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        body.push_str(&format!("        RETURN QUERY SELECT {return_exprs};\n"));
        body.push_str("    END LOOP;\nEND;\n");

        src.batch_execute(&format!(
            "CREATE OR REPLACE FUNCTION {func}() RETURNS TABLE({return_cols}) AS $$
                {body}
            $$ LANGUAGE plpgsql;",
            func = func,
            return_cols = return_cols,
            body = body,
        ))
        .await?;
        Ok(())
    }

    /// One function emits every column, echoed or replaced, for the whole batch.
    pub fn producer_funcs(&self) -> Vec<String> {
        vec![self.function_name()]
    }

    /// Drop the function and every mapping table [`UuidReplace::prepare`] created.
    pub async fn cleanup(&self, src: &Client) -> Result<()> {
        src.batch_execute(&format!(
            "DROP FUNCTION IF EXISTS {func}();",
            func = quote_ident(&self.function_name())
        ))
        .await?;
        for op in self.operations.iter().filter(|c| c.op == "uuid") {
            src.batch_execute(&format!(
                "DROP TABLE IF EXISTS {table};",
                table = quote_ident(&self.mapping_table_name(&op.column))
            ))
            .await?;
        }
        Ok(())
    }

    /// A partial final batch still maps correctly; nothing to skip.
    pub fn skip_last_partial_batch(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_columns_get_uuid_output_type_echo_columns_keep_their_own() {
        let replace = UuidReplace::new("workers".into(), "_transfer_workers".into(), vec![
            ColumnOp { column: "email".into(), ty: "text".into(), op: "uuid".into() },
            ColumnOp { column: "country".into(), ty: "text".into(), op: "echo".into() },
        ]);
        assert_eq!(
            replace.output_schema(),
            vec![
                ("email".to_string(), "uuid".to_string()),
                ("country".to_string(), "text".to_string())
            ]
        );
    }

    #[test]
    fn mapping_table_name_is_scoped_per_transfer_table_and_column() {
        let replace = UuidReplace::new("workers".into(), "_transfer_workers".into(), vec![]);
        assert_eq!(replace.mapping_table_name("name"), "_transfer_workers_uuid_name");

        let other = UuidReplace::new("workers".into(), "_transfer_other".into(), vec![]);
        assert_eq!(other.mapping_table_name("name"), "_transfer_other_uuid_name");
    }
}
