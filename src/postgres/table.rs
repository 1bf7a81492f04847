// ABOUTME: PgTable - PostgreSQL-backed schema introspection, full-table reads and statement execution
// ABOUTME: Implements the TableSource and StatementRunner traits over one tokio-postgres client

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_postgres::types::ToSql;
use tokio_postgres::Client;

use super::types::read_row;
use crate::sync::{
    ColumnDescriptor, DbError, Row, Statement, StatementRunner, TableSchema, TableSource,
    TransactionFailure, TransactionStage,
};
use crate::utils::quote_ident;

/// One database side, scoped to a schema.
///
/// Every query locks the client for its duration. A transactional batch
/// holds the lock from BEGIN to COMMIT or ROLLBACK, so no other query on the
/// same client can land inside it.
pub struct PgTable<'a> {
    client: &'a Mutex<Client>,
    schema: String,
}

impl<'a> PgTable<'a> {
    pub fn new(client: &'a Mutex<Client>, schema: impl Into<String>) -> Self {
        Self {
            client,
            schema: schema.into(),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Build the full-table select for `schema`.
    ///
    /// Columns the driver has no native mapping for are cast to text.
    pub fn select_sql(&self, schema: &TableSchema) -> String {
        select_all_sql(&self.schema, schema)
    }
}

fn select_all_sql(namespace: &str, schema: &TableSchema) -> String {
    let columns: Vec<String> = schema
        .columns
        .iter()
        .map(|c| {
            let ident = quote_ident(&c.name);
            if c.is_native() {
                ident
            } else {
                format!("{}::text AS {}", ident, ident)
            }
        })
        .collect();

    format!(
        "SELECT {} FROM {}.{}",
        columns.join(", "),
        quote_ident(namespace),
        quote_ident(&schema.table)
    )
}

fn params(statement: &Statement) -> Vec<&(dyn ToSql + Sync)> {
    statement
        .params
        .iter()
        .map(|v| v as &(dyn ToSql + Sync))
        .collect()
}

#[async_trait]
impl TableSource for PgTable<'_> {
    async fn table_schema(&self, table: &str) -> Result<TableSchema, DbError> {
        let namespace = self.schema.as_str();
        let client = self.client.lock().await;
        let rows = client
            .query(
                "SELECT column_name::text, data_type::text, is_nullable::text,
                        udt_name::text, udt_schema::text
                 FROM information_schema.columns
                 WHERE table_schema = $1 AND table_name = $2
                 ORDER BY ordinal_position",
                &[&namespace, &table],
            )
            .await?;

        let columns = rows
            .iter()
            .map(|row| {
                let nullable = row.get::<_, String>(2) == "YES";
                ColumnDescriptor::new(row.get::<_, String>(0), row.get::<_, String>(1), nullable)
                    .with_udt_name(row.get::<_, String>(3))
                    .with_udt_schema(row.get::<_, String>(4))
            })
            .collect();

        Ok(TableSchema::new(table, columns))
    }

    async fn primary_key_columns(&self, table: &str) -> Result<Vec<String>, DbError> {
        let namespace = self.schema.as_str();
        let client = self.client.lock().await;
        let rows = client
            .query(
                "SELECT a.attname::text
                 FROM pg_index i
                 JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
                 JOIN pg_class c ON c.oid = i.indrelid
                 JOIN pg_namespace n ON n.oid = c.relnamespace
                 WHERE i.indisprimary
                   AND n.nspname = $1
                   AND c.relname = $2
                 ORDER BY array_position(i.indkey::int2[], a.attnum)",
                &[&namespace, &table],
            )
            .await?;

        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn fetch_rows(&self, schema: &TableSchema) -> Result<Vec<Row>, DbError> {
        let sql = self.select_sql(schema);
        tracing::debug!("Reading {}.{}", self.schema, schema.table);

        let client = self.client.lock().await;
        let rows = client.query(sql.as_str(), &[]).await?;
        rows.iter()
            .map(|row| read_row(row, schema).map_err(DbError::from))
            .collect()
    }
}

#[async_trait]
impl StatementRunner for PgTable<'_> {
    async fn execute(&self, statement: &Statement) -> Result<u64, DbError> {
        let client = self.client.lock().await;
        Ok(client
            .execute(statement.sql.as_str(), &params(statement))
            .await?)
    }

    async fn execute_in_transaction(
        &self,
        statements: &[Statement],
    ) -> Result<Vec<u64>, TransactionFailure> {
        let mut client = self.client.lock().await;
        // Declared after the guard so a dropped future rolls back before unlocking
        let tx = client
            .transaction()
            .await
            .map_err(|e| TransactionFailure::new(TransactionStage::Begin, Vec::new(), e.into()))?;

        let mut affected = Vec::with_capacity(statements.len());
        for (index, statement) in statements.iter().enumerate() {
            tracing::debug!("{} {} key={}", statement.kind, statement.table, statement.key);
            match tx.execute(statement.sql.as_str(), &params(statement)).await {
                Ok(rows) => affected.push(rows),
                Err(e) => {
                    if let Err(rollback) = tx.rollback().await {
                        tracing::error!("ROLLBACK of {} failed: {}", statement.table, rollback);
                    }
                    return Err(TransactionFailure::new(
                        TransactionStage::Statement(index),
                        affected,
                        e.into(),
                    ));
                }
            }
        }

        match tx.commit().await {
            Ok(()) => Ok(affected),
            Err(e) => Err(TransactionFailure::new(
                TransactionStage::Commit,
                affected,
                e.into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_casts_non_native_columns() {
        let schema = TableSchema::new(
            "prices",
            vec![
                ColumnDescriptor::new("id", "integer", false),
                ColumnDescriptor::new("amount", "numeric", true),
                ColumnDescriptor::new("tags", "ARRAY", true).with_udt_name("_text"),
            ],
        );

        assert_eq!(
            select_all_sql("shop", &schema),
            "SELECT \"id\", \"amount\"::text AS \"amount\", \"tags\"::text AS \"tags\" FROM \"shop\".\"prices\""
        );
    }
}
