// ABOUTME: Table reconciliation core - schema check, key resolution, row diff, corrective writes
// ABOUTME: Database access goes through the TableSource and StatementRunner traits

pub mod diff;
pub mod error;
pub mod key;
pub mod reconciler;
pub mod schema;
pub mod value;
pub mod writer;

use async_trait::async_trait;

pub use diff::{diff, DiffError, DiffResult};
pub use error::{DbError, Side, SyncError};
pub use key::{resolve_primary_key, KeyPolicy, KeyTuple, PrimaryKey};
pub use reconciler::{
    read_table, ReconcileConfig, Reconciler, SyncOutcome, SyncPhase, SyncPlan,
};
pub use schema::{compatible, find_mismatch, ColumnDescriptor, SchemaMismatch, TableSchema};
pub use value::{Row, Value};
pub use writer::{
    apply, synthesize, ApplyCounts, ApplyMode, Statement, StatementKind, TransactionFailure,
    TransactionStage,
};

/// Read access to one database: catalog introspection and full-table reads.
#[async_trait]
pub trait TableSource: Send + Sync {
    /// Columns of `table` in ordinal order. An empty schema means the table
    /// does not exist.
    async fn table_schema(&self, table: &str) -> Result<TableSchema, DbError>;

    /// Primary-key columns of `table` in key order; empty when it has none.
    async fn primary_key_columns(&self, table: &str) -> Result<Vec<String>, DbError>;

    /// Every row of `table`, with fields in the order of `schema`.
    async fn fetch_rows(&self, schema: &TableSchema) -> Result<Vec<Row>, DbError>;
}

/// Executes data-modification statements against the target.
#[async_trait]
pub trait StatementRunner: Send + Sync {
    /// Run one statement, returning the number of affected rows.
    async fn execute(&self, statement: &Statement) -> Result<u64, DbError>;

    /// Run `statements` in order inside one transaction, stopping at the
    /// first failure, and return the affected rows of each.
    ///
    /// The transaction commits only when every statement succeeded. A
    /// failure rolls it back, and so does dropping the returned future
    /// before it completes: the connection is never left inside an open
    /// transaction.
    async fn execute_in_transaction(
        &self,
        statements: &[Statement],
    ) -> Result<Vec<u64>, TransactionFailure>;
}
