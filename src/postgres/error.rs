// ABOUTME: Maps tokio-postgres failures onto the driver-agnostic DbError
// ABOUTME: Also finds SQLSTATE 28P01 inside anyhow chains from the connection layer

use tokio_postgres::error::SqlState;

use crate::sync::DbError;

impl From<&tokio_postgres::Error> for DbError {
    fn from(err: &tokio_postgres::Error) -> Self {
        let message = match err.as_db_error() {
            Some(db) => db.message().to_string(),
            None => err.to_string(),
        };
        DbError {
            code: err.code().map(|c| c.code().to_string()),
            message,
            closed: err.is_closed(),
        }
    }
}

impl From<tokio_postgres::Error> for DbError {
    fn from(err: tokio_postgres::Error) -> Self {
        DbError::from(&err)
    }
}

/// Find the first driver error in an `anyhow` chain.
pub fn find_db_error(err: &anyhow::Error) -> Option<DbError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<tokio_postgres::Error>())
        .map(DbError::from)
}

/// Whether the server rejected the credentials (SQLSTATE 28P01).
pub fn is_auth_failure(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<tokio_postgres::Error>()
            .and_then(|e| e.code())
            .is_some_and(|code| *code == SqlState::INVALID_PASSWORD)
    })
}
