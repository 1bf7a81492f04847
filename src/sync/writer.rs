// ABOUTME: Statement synthesis and execution for a computed diff
// ABOUTME: Builds parameterized INSERT/UPDATE/DELETE statements and runs them insert-first

use serde::{Deserialize, Serialize};
use std::fmt;

use super::diff::{DiffError, DiffResult};
use super::error::{DbError, Side, SyncError};
use super::key::{KeyTuple, PrimaryKey};
use super::schema::{ColumnDescriptor, TableSchema};
use super::value::{Row, Value};
use super::StatementRunner;
use crate::utils::quote_ident;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementKind {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementKind::Insert => write!(f, "insert"),
            StatementKind::Update => write!(f, "update"),
            StatementKind::Delete => write!(f, "delete"),
        }
    }
}

/// One parameterized data-modification statement.
///
/// `columns[i]` names the column bound to `params[i]` (`$i+1` in `sql`).
/// For updates the SET columns come first, then the key columns of the
/// WHERE clause; for deletes only key columns are bound.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    pub kind: StatementKind,
    pub schema: String,
    pub table: String,
    pub sql: String,
    pub columns: Vec<String>,
    pub params: Vec<Value>,
    pub key: KeyTuple,
}

/// Whether the three write phases share a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyMode {
    /// Each statement commits on its own; a failure leaves earlier statements applied.
    #[default]
    Independent,
    /// All statements run in one transaction that is rolled back on failure.
    Transactional,
}

#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Schema holding the target table
    pub schema: String,
    /// Emit `OVERRIDING SYSTEM VALUE` so identity columns keep source values
    pub override_system_value: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            override_system_value: true,
        }
    }
}

/// Rows affected per statement kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplyCounts {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
}

impl ApplyCounts {
    pub fn total(&self) -> u64 {
        self.inserted + self.updated + self.deleted
    }

    fn record(&mut self, kind: StatementKind, affected: u64) {
        match kind {
            StatementKind::Insert => self.inserted += affected,
            StatementKind::Update => self.updated += affected,
            StatementKind::Delete => self.deleted += affected,
        }
    }
}

fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Bind marker for parameter `n`.
///
/// Columns the driver cannot bind natively travel as text and are cast
/// back to their own type on the server.
fn placeholder(n: usize, column: Option<&ColumnDescriptor>) -> String {
    match column {
        Some(c) if !c.is_native() => format!("${}::text::{}", n, c.cast_type()),
        _ => format!("${}", n),
    }
}

/// Build an insert for every column present in the row.
///
/// ```sql
/// INSERT INTO "public"."t" ("id", "val") OVERRIDING SYSTEM VALUE VALUES ($1, $2)
/// ```
pub fn build_insert(
    options: &WriterOptions,
    schema: &TableSchema,
    key: KeyTuple,
    row: &Row,
) -> Statement {
    let columns: Vec<String> = row.columns().map(str::to_string).collect();
    let params: Vec<Value> = row.iter().map(|(_, v)| v.clone()).collect();

    let quoted: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let placeholders: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| placeholder(i + 1, schema.column(c)))
        .collect();

    let sql = format!(
        "INSERT INTO {} ({}){} VALUES ({})",
        qualified_table(&options.schema, &schema.table),
        quoted.join(", "),
        if options.override_system_value {
            " OVERRIDING SYSTEM VALUE"
        } else {
            ""
        },
        placeholders.join(", ")
    );

    Statement {
        kind: StatementKind::Insert,
        schema: options.schema.clone(),
        table: schema.table.clone(),
        sql,
        columns,
        params,
        key,
    }
}

/// Build an update setting every non-key column to the source value.
///
/// Key columns are never rewritten; they only appear in the WHERE clause.
/// Returns `None` when the row has no non-key column to set.
///
/// ```sql
/// UPDATE "public"."t" SET "val" = $1 WHERE "id" = $2
/// ```
pub fn build_update(
    options: &WriterOptions,
    schema: &TableSchema,
    primary_key: &PrimaryKey,
    key: KeyTuple,
    row: &Row,
) -> Option<Statement> {
    let set: Vec<(&str, &Value)> = row
        .iter()
        .filter(|(column, _)| !primary_key.contains(column))
        .collect();
    if set.is_empty() {
        return None;
    }

    let mut columns = Vec::with_capacity(set.len() + primary_key.columns().len());
    let mut params = Vec::with_capacity(columns.capacity());
    let mut assignments = Vec::with_capacity(set.len());

    for (column, value) in set {
        columns.push(column.to_string());
        params.push(value.clone());
        assignments.push(format!(
            "{} = {}",
            quote_ident(column),
            placeholder(columns.len(), schema.column(column))
        ));
    }

    let conditions = key_conditions(schema, primary_key, &key, &mut columns, &mut params);

    let sql = format!(
        "UPDATE {} SET {} WHERE {}",
        qualified_table(&options.schema, &schema.table),
        assignments.join(", "),
        conditions
    );

    Some(Statement {
        kind: StatementKind::Update,
        schema: options.schema.clone(),
        table: schema.table.clone(),
        sql,
        columns,
        params,
        key,
    })
}

/// Build a delete constrained by the row's key.
///
/// ```sql
/// DELETE FROM "public"."t" WHERE "id" = $1
/// ```
pub fn build_delete(
    options: &WriterOptions,
    schema: &TableSchema,
    primary_key: &PrimaryKey,
    key: KeyTuple,
) -> Statement {
    let mut columns = Vec::with_capacity(primary_key.columns().len());
    let mut params = Vec::with_capacity(primary_key.columns().len());
    let conditions = key_conditions(schema, primary_key, &key, &mut columns, &mut params);

    let sql = format!(
        "DELETE FROM {} WHERE {}",
        qualified_table(&options.schema, &schema.table),
        conditions
    );

    Statement {
        kind: StatementKind::Delete,
        schema: options.schema.clone(),
        table: schema.table.clone(),
        sql,
        columns,
        params,
        key,
    }
}

/// Append key bindings after whatever is already bound and render the
/// `"a" = $n AND "b" = $n+1` clause.
fn key_conditions(
    schema: &TableSchema,
    primary_key: &PrimaryKey,
    key: &KeyTuple,
    columns: &mut Vec<String>,
    params: &mut Vec<Value>,
) -> String {
    let mut conditions = Vec::with_capacity(primary_key.columns().len());
    for (column, value) in primary_key.columns().iter().zip(key.values()) {
        columns.push(column.clone());
        params.push(value.clone());
        conditions.push(format!(
            "{} = {}",
            quote_ident(column),
            placeholder(columns.len(), schema.column(column))
        ));
    }
    conditions.join(" AND ")
}

/// Synthesize every corrective statement for a diff, inserts first, then
/// updates, then deletes.
pub fn synthesize(
    options: &WriterOptions,
    schema: &TableSchema,
    primary_key: &PrimaryKey,
    diff: &DiffResult,
) -> Result<Vec<Statement>, DiffError> {
    let key_of = |side: Side, index: usize, row: &Row| {
        primary_key.key_of(row).ok_or_else(|| DiffError::MissingKey {
            side,
            index,
            key: primary_key.clone(),
        })
    };

    let mut statements = Vec::with_capacity(diff.change_count());

    for (i, row) in diff.to_insert.iter().enumerate() {
        let key = key_of(Side::Source, i, row)?;
        statements.push(build_insert(options, schema, key, row));
    }

    for (i, row) in diff.to_update.iter().enumerate() {
        let key = key_of(Side::Source, i, row)?;
        match build_update(options, schema, primary_key, key, row) {
            Some(statement) => statements.push(statement),
            None => tracing::debug!(
                "Skipping update of {} row {}: no non-key columns",
                schema.table,
                i
            ),
        }
    }

    for (i, row) in diff.to_delete.iter().enumerate() {
        let key = key_of(Side::Target, i, row)?;
        statements.push(build_delete(options, schema, primary_key, key));
    }

    Ok(statements)
}

/// Where a transactional batch stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStage {
    Begin,
    /// The statement at this index failed
    Statement(usize),
    Commit,
}

/// Failure of [`StatementRunner::execute_in_transaction`]. Nothing of the
/// batch is left applied.
#[derive(Debug, Clone)]
pub struct TransactionFailure {
    pub stage: TransactionStage,
    /// Affected rows of each statement that ran before the failure
    pub affected: Vec<u64>,
    pub source: DbError,
}

impl TransactionFailure {
    pub fn new(stage: TransactionStage, affected: Vec<u64>, source: DbError) -> Self {
        Self {
            stage,
            affected,
            source,
        }
    }
}

fn tally(statements: &[Statement], affected: &[u64]) -> ApplyCounts {
    let mut counts = ApplyCounts::default();
    for (statement, rows) in statements.iter().zip(affected) {
        counts.record(statement.kind, *rows);
    }
    counts
}

/// Execute synthesized statements in order against the target.
///
/// The first failing statement stops the run. In
/// [`ApplyMode::Independent`] everything executed before it stays applied
/// and the error says so; in [`ApplyMode::Transactional`] the runner rolls
/// the whole batch back.
pub async fn apply(
    runner: &dyn StatementRunner,
    table: &str,
    statements: &[Statement],
    mode: ApplyMode,
) -> Result<ApplyCounts, SyncError> {
    if statements.is_empty() {
        return Ok(ApplyCounts::default());
    }

    for kind in [StatementKind::Insert, StatementKind::Update, StatementKind::Delete] {
        let count = statements.iter().filter(|s| s.kind == kind).count();
        if count > 0 {
            tracing::info!("Applying {} {} statement(s) to {}", count, kind, table);
        }
    }

    match mode {
        ApplyMode::Independent => apply_each(runner, table, statements).await,
        ApplyMode::Transactional => apply_atomically(runner, table, statements).await,
    }
}

async fn apply_each(
    runner: &dyn StatementRunner,
    table: &str,
    statements: &[Statement],
) -> Result<ApplyCounts, SyncError> {
    let mut counts = ApplyCounts::default();

    for (executed, statement) in statements.iter().enumerate() {
        tracing::debug!("{} {} key={}", statement.kind, table, statement.key);

        match runner.execute(statement).await {
            Ok(affected) => counts.record(statement.kind, affected),
            Err(source) => {
                if executed > 0 {
                    tracing::warn!(
                        "{} left partially synchronized: {} inserted, {} updated, {} deleted before the failure",
                        table,
                        counts.inserted,
                        counts.updated,
                        counts.deleted
                    );
                }
                return Err(SyncError::StatementFailure {
                    kind: statement.kind,
                    table: table.to_string(),
                    key: statement.key.to_string(),
                    executed,
                    applied: counts,
                    rolled_back: false,
                    source,
                });
            }
        }
    }

    Ok(counts)
}

async fn apply_atomically(
    runner: &dyn StatementRunner,
    table: &str,
    statements: &[Statement],
) -> Result<ApplyCounts, SyncError> {
    let failure = match runner.execute_in_transaction(statements).await {
        Ok(affected) => return Ok(tally(statements, &affected)),
        Err(failure) => failure,
    };

    let transaction_error = |action| SyncError::Transaction {
        action,
        table: table.to_string(),
        source: failure.source.clone(),
    };

    Err(match failure.stage {
        TransactionStage::Begin => transaction_error("begin"),
        TransactionStage::Commit => transaction_error("commit"),
        TransactionStage::Statement(index) => match statements.get(index) {
            Some(statement) => SyncError::StatementFailure {
                kind: statement.kind,
                table: table.to_string(),
                key: statement.key.to_string(),
                executed: failure.affected.len(),
                applied: tally(statements, &failure.affected),
                rolled_back: true,
                source: failure.source.clone(),
            },
            None => transaction_error("run"),
        },
    })
}
