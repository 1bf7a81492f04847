// ABOUTME: Reconciler - runs one sync of a target table from a source table
// ABOUTME: Schema check, key resolution, full fetch, diff, then insert/update/delete on target

use serde::Serialize;
use std::fmt;
use std::time::Instant;

use super::diff::{diff, DiffResult};
use super::error::{DbError, Side, SyncError};
use super::key::{ensure_keys_match, resolve_primary_key, KeyPolicy, PrimaryKey};
use super::schema::{find_mismatch, TableSchema};
use super::value::Row;
use super::writer::{apply, synthesize, ApplyMode, Statement, WriterOptions};
use super::{StatementRunner, TableSource};

/// Configuration for reconciliation behavior.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub key_policy: KeyPolicy,
    pub apply_mode: ApplyMode,
    /// Schema the target table lives in, used to qualify written statements
    pub target_schema: String,
    pub override_system_value: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            key_policy: KeyPolicy::Single,
            apply_mode: ApplyMode::Independent,
            target_schema: "public".to_string(),
            override_system_value: true,
        }
    }
}

impl ReconcileConfig {
    fn writer_options(&self) -> WriterOptions {
        WriterOptions {
            schema: self.target_schema.clone(),
            override_system_value: self.override_system_value,
        }
    }
}

/// Where a sync run currently is. Runs move strictly forward and end in
/// `Done` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncPhase {
    Idle,
    SchemaChecking,
    KeyResolving,
    DataFetching,
    Diffing,
    Applying,
    Done,
    Failed,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::SchemaChecking => "schema check",
            SyncPhase::KeyResolving => "key resolution",
            SyncPhase::DataFetching => "data fetch",
            SyncPhase::Diffing => "diff",
            SyncPhase::Applying => "apply",
            SyncPhase::Done => "done",
            SyncPhase::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Result of a completed sync.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub source_table: String,
    pub target_table: String,
    pub primary_key: PrimaryKey,
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
    pub unchanged: usize,
    pub duration_ms: u64,
}

impl SyncOutcome {
    /// Check if the target already matched the source.
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.updated == 0 && self.deleted == 0
    }
}

/// Everything a sync would do, computed without writing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPlan {
    pub source_table: String,
    pub target_table: String,
    pub primary_key: PrimaryKey,
    pub diff: DiffResult,
    pub statements: Vec<Statement>,
}

/// Reconciler makes a target table's content match a source table.
///
/// Both sides must already be connected. The reconciler never retries: a
/// failed run ends in [`SyncPhase::Failed`] and the caller starts over.
pub struct Reconciler<'a> {
    source: &'a dyn TableSource,
    target: &'a dyn TableSource,
    runner: &'a dyn StatementRunner,
    config: ReconcileConfig,
    phase: SyncPhase,
}

impl<'a> Reconciler<'a> {
    /// Create a Reconciler over the source reader, the target reader and the
    /// runner that writes to the target.
    pub fn new(
        source: &'a dyn TableSource,
        target: &'a dyn TableSource,
        runner: &'a dyn StatementRunner,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            source,
            target,
            runner,
            config,
            phase: SyncPhase::Idle,
        }
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Synchronize `target_table` so its rows equal `source_table`'s.
    ///
    /// Nothing is written unless schemas and primary keys agree. Inserts run
    /// first, then updates, then deletes. See [`SyncError::target_modified`]
    /// for what a statement failure leaves behind.
    pub async fn synchronize(
        &mut self,
        source_table: &str,
        target_table: &str,
    ) -> Result<SyncOutcome, SyncError> {
        let start = Instant::now();
        self.phase = SyncPhase::Idle;

        let result = self.run(source_table, target_table, start).await;
        let result = self.finish(source_table, target_table, result);

        if let Ok(outcome) = &result {
            tracing::info!(
                "Synchronized {} -> {}: {} inserted, {} updated, {} deleted, {} unchanged in {}ms",
                source_table,
                target_table,
                outcome.inserted,
                outcome.updated,
                outcome.deleted,
                outcome.unchanged,
                outcome.duration_ms
            );
        }
        result
    }

    /// Compute the corrective statements without executing them.
    pub async fn plan(
        &mut self,
        source_table: &str,
        target_table: &str,
    ) -> Result<SyncPlan, SyncError> {
        self.phase = SyncPhase::Idle;
        let result = self.prepare(source_table, target_table).await;
        self.finish(source_table, target_table, result)
    }

    async fn run(
        &mut self,
        source_table: &str,
        target_table: &str,
        start: Instant,
    ) -> Result<SyncOutcome, SyncError> {
        let plan = self.prepare(source_table, target_table).await?;

        self.transition(SyncPhase::Applying);
        let counts = apply(
            self.runner,
            target_table,
            &plan.statements,
            self.config.apply_mode,
        )
        .await?;

        Ok(SyncOutcome {
            source_table: plan.source_table,
            target_table: plan.target_table,
            primary_key: plan.primary_key,
            inserted: counts.inserted,
            updated: counts.updated,
            deleted: counts.deleted,
            unchanged: plan.diff.unchanged,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn prepare(
        &mut self,
        source_table: &str,
        target_table: &str,
    ) -> Result<SyncPlan, SyncError> {
        self.transition(SyncPhase::SchemaChecking);
        let source_schema = load_schema(self.source, Side::Source, source_table).await?;
        let target_schema = load_schema(self.target, Side::Target, target_table).await?;

        if let Some(mismatch) = find_mismatch(&source_schema, &target_schema) {
            return Err(SyncError::SchemaIncompatible {
                source_table: source_table.to_string(),
                target_table: target_table.to_string(),
                mismatch,
            });
        }

        self.transition(SyncPhase::KeyResolving);
        let source_key = load_primary_key(
            self.source,
            Side::Source,
            source_table,
            self.config.key_policy,
        )
        .await?;
        let target_key = load_primary_key(
            self.target,
            Side::Target,
            target_table,
            self.config.key_policy,
        )
        .await?;
        ensure_keys_match(&source_key, &target_key)?;

        self.transition(SyncPhase::DataFetching);
        let source_rows = self
            .source
            .fetch_rows(&source_schema)
            .await
            .map_err(|e| fetch_error(Side::Source, source_table, e))?;
        let target_rows = self
            .target
            .fetch_rows(&target_schema)
            .await
            .map_err(|e| fetch_error(Side::Target, target_table, e))?;

        tracing::info!(
            "Fetched {} source rows from {} and {} target rows from {}",
            source_rows.len(),
            source_table,
            target_rows.len(),
            target_table
        );

        self.transition(SyncPhase::Diffing);
        let invalid = |source| SyncError::InvalidRows {
            source_table: source_table.to_string(),
            target_table: target_table.to_string(),
            source,
        };
        let result = diff(source_rows, target_rows, &target_key).map_err(invalid)?;
        let statements = synthesize(
            &self.config.writer_options(),
            &target_schema,
            &target_key,
            &result,
        )
        .map_err(invalid)?;

        tracing::info!(
            "{} -> {}: {} to insert, {} to update, {} to delete",
            source_table,
            target_table,
            result.to_insert.len(),
            result.to_update.len(),
            result.to_delete.len()
        );

        Ok(SyncPlan {
            source_table: source_table.to_string(),
            target_table: target_table.to_string(),
            primary_key: target_key,
            diff: result,
            statements,
        })
    }

    fn transition(&mut self, next: SyncPhase) {
        tracing::debug!("Sync phase {} -> {}", self.phase, next);
        self.phase = next;
    }

    fn finish<T>(
        &mut self,
        source_table: &str,
        target_table: &str,
        result: Result<T, SyncError>,
    ) -> Result<T, SyncError> {
        match &result {
            Ok(_) => self.transition(SyncPhase::Done),
            Err(e) => {
                tracing::error!(
                    "Sync of {} -> {} failed during {}: {}",
                    source_table,
                    target_table,
                    self.phase,
                    e
                );
                self.phase = SyncPhase::Failed;
            }
        }
        result
    }
}

/// Read every row of one table, refusing tables that do not exist.
pub async fn read_table(
    source: &dyn TableSource,
    side: Side,
    table: &str,
) -> Result<Vec<Row>, SyncError> {
    let schema = load_schema(source, side, table).await?;
    source
        .fetch_rows(&schema)
        .await
        .map_err(|e| fetch_error(side, table, e))
}

async fn load_schema(
    source: &dyn TableSource,
    side: Side,
    table: &str,
) -> Result<TableSchema, SyncError> {
    let schema = source
        .table_schema(table)
        .await
        .map_err(|e| introspection_error(side, table, e))?;

    if schema.is_empty() {
        return Err(SyncError::UnknownTable {
            side,
            table: table.to_string(),
        });
    }
    Ok(schema)
}

async fn load_primary_key(
    source: &dyn TableSource,
    side: Side,
    table: &str,
    policy: KeyPolicy,
) -> Result<PrimaryKey, SyncError> {
    let columns = source
        .primary_key_columns(table)
        .await
        .map_err(|e| introspection_error(side, table, e))?;
    resolve_primary_key(side, table, columns, policy)
}

fn introspection_error(side: Side, table: &str, source: DbError) -> SyncError {
    if source.is_connection_failure() {
        SyncError::Connection { side, source }
    } else {
        SyncError::Introspection {
            side,
            table: table.to_string(),
            source,
        }
    }
}

fn fetch_error(side: Side, table: &str, source: DbError) -> SyncError {
    if source.is_connection_failure() {
        SyncError::Connection { side, source }
    } else {
        SyncError::Fetch {
            side,
            table: table.to_string(),
            source,
        }
    }
}
