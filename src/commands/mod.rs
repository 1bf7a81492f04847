// ABOUTME: Command implementations for the CLI
// ABOUTME: Exports tables, rows, sync and serve, plus the shared connection context

pub mod inspect;
pub mod serve;
pub mod sync;

pub use inspect::{rows, tables, RowsArgs, TablesArgs};
pub use serve::{serve, ServeArgs};
pub use sync::{sync, SyncArgs};

use anyhow::{Context, Result};
use clap::ValueEnum;
use tokio_postgres::Client;

use crate::config::AppConfig;
use crate::postgres::{connect_with_retry, is_auth_failure};
use crate::sync::{KeyPolicy, Side};
use crate::utils::strip_password;

/// `--side` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SideArg {
    Source,
    Target,
}

impl From<SideArg> for Side {
    fn from(arg: SideArg) -> Self {
        match arg {
            SideArg::Source => Side::Source,
            SideArg::Target => Side::Target,
        }
    }
}

/// `--key-policy` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KeyPolicyArg {
    Single,
    Composite,
}

impl From<KeyPolicyArg> for KeyPolicy {
    fn from(arg: KeyPolicyArg) -> Self {
        match arg {
            KeyPolicyArg::Single => KeyPolicy::Single,
            KeyPolicyArg::Composite => KeyPolicy::Composite,
        }
    }
}

/// Settings every command shares: the loaded config file and the
/// connection strings given on the command line or in the environment.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub config: AppConfig,
    pub source: Option<String>,
    pub target: Option<String>,
}

impl GlobalOptions {
    pub fn connection_string(&self, side: Side) -> Result<String> {
        let cli_value = match side {
            Side::Source => self.source.as_deref(),
            Side::Target => self.target.as_deref(),
        };
        self.config.connection_string(side, cli_value)
    }

    /// Connect to one side using the configured retry policy.
    pub async fn connect(&self, side: Side) -> Result<Client> {
        let dsn = self.connection_string(side)?;
        tracing::info!("Connecting to {} database {}", side, strip_password(&dsn));

        connect_with_retry(
            &dsn,
            self.config.sync.connect_retries,
            self.config.sync.retry_delay(),
        )
        .await
        .map_err(|e| {
            if is_auth_failure(&e) {
                e.context(format!("Invalid username or password for the {} database", side))
            } else {
                e
            }
        })
        .with_context(|| format!("Failed to connect to the {} database", side))
    }

    /// Schema from `--schema`, else the config file.
    pub fn schema<'a>(&'a self, flag: Option<&'a str>) -> &'a str {
        flag.unwrap_or(&self.config.sync.schema)
    }
}
