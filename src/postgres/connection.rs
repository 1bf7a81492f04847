// ABOUTME: Connection provider - opens tokio-postgres clients over native-tls
// ABOUTME: Process-wide certificate policy, ping-verified retry, table listing

use anyhow::{Context, Result};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use std::sync::OnceLock;
use std::time::Duration;
use tokio_postgres::Client;

use super::error::is_auth_failure;
use crate::utils::{retry_with_backoff_when, strip_password};

static ALLOW_SELF_SIGNED_CERTS: OnceLock<bool> = OnceLock::new();

/// Set whether TLS connections accept invalid or self-signed certificates.
///
/// Only the first call has an effect; call it once at startup, before any
/// connection is opened.
pub fn init_tls_policy(allow_self_signed: bool) {
    if ALLOW_SELF_SIGNED_CERTS.set(allow_self_signed).is_ok() && allow_self_signed {
        tracing::warn!("TLS certificate verification is disabled (--allow-self-signed-certs)");
    }
}

fn allow_self_signed() -> bool {
    ALLOW_SELF_SIGNED_CERTS.get().copied().unwrap_or(false)
}

/// Open a client for a libpq keyword string or `postgresql://` URL.
///
/// TLS is negotiated according to the connection string's `sslmode`. The
/// connection task is spawned onto the runtime and logs when it ends with
/// an error.
pub async fn connect(connection_string: &str) -> Result<Client> {
    let config: tokio_postgres::Config = connection_string.parse().with_context(|| {
        format!(
            "Invalid connection string: {}",
            strip_password(connection_string)
        )
    })?;

    let allow = allow_self_signed();
    let connector = TlsConnector::builder()
        .danger_accept_invalid_certs(allow)
        .danger_accept_invalid_hostnames(allow)
        .build()
        .context("Failed to build TLS connector")?;

    let (client, connection) = config
        .connect(MakeTlsConnector::new(connector))
        .await
        .with_context(|| format!("Failed to connect to {}", strip_password(connection_string)))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("Connection error: {}", e);
        }
    });

    Ok(client)
}

/// Connect and verify the connection answers `SELECT 1`, retrying with
/// exponential backoff.
///
/// Rejected credentials are returned at once; retrying them cannot succeed.
pub async fn connect_with_retry(
    connection_string: &str,
    retries: u32,
    initial_delay: Duration,
) -> Result<Client> {
    retry_with_backoff_when(
        || async move {
            let client = connect(connection_string).await?;
            client
                .simple_query("SELECT 1")
                .await
                .context("Connection did not answer ping")?;
            Ok(client)
        },
        retries,
        initial_delay,
        |e| !is_auth_failure(e),
    )
    .await
    .with_context(|| {
        format!(
            "Could not connect to {}",
            strip_password(connection_string)
        )
    })
}

/// Base tables of `schema`, sorted by name.
pub async fn list_tables(client: &Client, schema: &str) -> Result<Vec<String>> {
    let rows = client
        .query(
            "SELECT tablename::text FROM pg_tables WHERE schemaname = $1 ORDER BY tablename",
            &[&schema],
        )
        .await
        .with_context(|| format!("Failed to list tables in schema {}", schema))?;

    Ok(rows.iter().map(|row| row.get(0)).collect())
}
