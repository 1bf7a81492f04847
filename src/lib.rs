// ABOUTME: Library root for table-sync
// ABOUTME: Makes a PostgreSQL target table match a source table via keyed diff and corrective writes

pub mod commands;
pub mod config;
pub mod postgres;
pub mod server;
pub mod sync;
pub mod utils;

pub use config::{AppConfig, DbConfig};
pub use sync::{Reconciler, SyncError, SyncOutcome};
