// ABOUTME: CLI entry point for table-sync
// ABOUTME: Parses commands, sets up logging and TLS policy, routes to handlers

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use table_sync::commands::{self, GlobalOptions, RowsArgs, ServeArgs, SyncArgs, TablesArgs};
use table_sync::config::AppConfig;

#[derive(Parser)]
#[command(name = "table-sync")]
#[command(about = "Make a PostgreSQL target table match a source table", long_about = None)]
#[command(version)]
struct Cli {
    /// Allow self-signed TLS certificates (insecure - use only for testing)
    #[arg(
        long = "allow-self-signed-certs",
        global = true,
        default_value_t = false
    )]
    allow_self_signed_certs: bool,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    /// Path to config.toml (defaults to ~/.table-sync/config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Source database connection string (URL or libpq keywords)
    #[arg(long, env = "TABLE_SYNC_SOURCE", global = true, hide_env_values = true)]
    source: Option<String>,
    /// Target database connection string (URL or libpq keywords)
    #[arg(long, env = "TABLE_SYNC_TARGET", global = true, hide_env_values = true)]
    target: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the tables of the source or target database
    Tables(TablesArgs),
    /// Print every row of a table as JSON
    Rows(RowsArgs),
    /// Make a target table's rows match a source table
    Sync(SyncArgs),
    /// Run the HTTP API
    Serve(ServeArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --log
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    table_sync::postgres::init_tls_policy(cli.allow_self_signed_certs);

    let config = AppConfig::load_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;
    let options = GlobalOptions {
        config,
        source: cli.source,
        target: cli.target,
    };

    match cli.command {
        Commands::Tables(args) => commands::tables(args, &options).await,
        Commands::Rows(args) => commands::rows(args, &options).await,
        Commands::Sync(args) => commands::sync(args, &options).await,
        Commands::Serve(args) => commands::serve(args, &options).await,
    }
}
