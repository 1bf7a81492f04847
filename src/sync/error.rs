// ABOUTME: Error taxonomy for a reconciliation run
// ABOUTME: Separates pre-flight refusals (nothing written) from statement-phase failures

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::diff::DiffError;
use super::key::PrimaryKey;
use super::schema::SchemaMismatch;
use super::writer::{ApplyCounts, StatementKind};

/// SQLSTATE for a rejected password.
pub const SQLSTATE_INVALID_PASSWORD: &str = "28P01";

/// Which side of a sync a database handle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Source,
    Target,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Source => write!(f, "source"),
            Side::Target => write!(f, "target"),
        }
    }
}

/// A failure reported by the database driver, reduced to what callers act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbError {
    /// SQLSTATE code when the server sent one
    pub code: Option<String>,
    pub message: String,
    /// The connection was closed underneath the query
    pub closed: bool,
}

impl DbError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            closed: false,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn connection_closed(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            closed: true,
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        self.code.as_deref() == Some(SQLSTATE_INVALID_PASSWORD)
    }

    /// Closed connections, SQLSTATE class 08 and authentication failures.
    pub fn is_connection_failure(&self) -> bool {
        self.closed
            || self.is_auth_failure()
            || self.code.as_deref().is_some_and(|c| c.starts_with("08"))
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} (SQLSTATE {})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for DbError {}

fn rollback_note(rolled_back: &bool) -> &'static str {
    if *rolled_back {
        " (rolled back)"
    } else {
        ""
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{side} database is unreachable: {source}")]
    Connection {
        side: Side,
        #[source]
        source: DbError,
    },

    #[error("failed to read schema of {side} table {table}: {source}")]
    Introspection {
        side: Side,
        table: String,
        #[source]
        source: DbError,
    },

    #[error("{side} table {table} does not exist")]
    UnknownTable { side: Side, table: String },

    #[error("table {source_table} is not compatible with {target_table}: {mismatch}")]
    SchemaIncompatible {
        source_table: String,
        target_table: String,
        mismatch: SchemaMismatch,
    },

    #[error("{side} table {table} has no primary key")]
    NoPrimaryKey { side: Side, table: String },

    #[error(
        "{side} table {table} has a composite primary key ({}); a single-column key is required",
        .columns.join(", ")
    )]
    AmbiguousPrimaryKey {
        side: Side,
        table: String,
        columns: Vec<String>,
    },

    #[error("primary keys do not match: source {source_key}, target {target_key}")]
    PrimaryKeyMismatch {
        source_key: PrimaryKey,
        target_key: PrimaryKey,
    },

    #[error("failed to read rows of {side} table {table}: {source}")]
    Fetch {
        side: Side,
        table: String,
        #[source]
        source: DbError,
    },

    #[error("cannot diff {source_table} against {target_table}: {source}")]
    InvalidRows {
        source_table: String,
        target_table: String,
        #[source]
        source: DiffError,
    },

    #[error(
        "{kind} into {table} failed for key {key} after {executed} statements affecting {} rows{}: {source}",
        .applied.total(),
        rollback_note(.rolled_back)
    )]
    StatementFailure {
        kind: StatementKind,
        table: String,
        key: String,
        /// Statements that succeeded before the failing one
        executed: usize,
        /// Rows those statements affected, per kind
        applied: ApplyCounts,
        rolled_back: bool,
        #[source]
        source: DbError,
    },

    #[error("failed to {action} transaction on {table}: {source}")]
    Transaction {
        action: &'static str,
        table: String,
        #[source]
        source: DbError,
    },
}

impl SyncError {
    /// True when the run stopped before any corrective statement was issued.
    pub fn is_preflight(&self) -> bool {
        !matches!(
            self,
            SyncError::StatementFailure { .. } | SyncError::Transaction { .. }
        )
    }

    /// True when some corrective statements are left applied on the target.
    pub fn target_modified(&self) -> bool {
        match self {
            SyncError::StatementFailure {
                applied,
                rolled_back,
                ..
            } => !rolled_back && applied.total() > 0,
            _ => false,
        }
    }

    pub fn db_error(&self) -> Option<&DbError> {
        match self {
            SyncError::Connection { source, .. }
            | SyncError::Introspection { source, .. }
            | SyncError::Fetch { source, .. }
            | SyncError::StatementFailure { source, .. }
            | SyncError::Transaction { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        self.db_error().is_some_and(DbError::is_auth_failure)
    }
}
