// ABOUTME: PostgreSQL adapter for the sync core
// ABOUTME: Connection bootstrap, driver error mapping, value binding and the PgTable handle

pub mod connection;
pub mod error;
pub mod table;
pub mod types;

pub use connection::{connect, connect_with_retry, init_tls_policy, list_tables};
pub use error::is_auth_failure;
pub use table::PgTable;
