// ABOUTME: Read-only inspection commands - list tables, dump rows
// ABOUTME: Rows print as JSON (bytea as base64, timestamps RFC 3339)

use anyhow::{Context, Result};
use clap::Args;
use tokio::sync::Mutex;

use super::{GlobalOptions, SideArg};
use crate::postgres::{list_tables, PgTable};
use crate::sync::{read_table, Side};

#[derive(Args, Debug)]
pub struct TablesArgs {
    /// Which database to list
    #[arg(long, value_enum, default_value_t = SideArg::Source)]
    pub side: SideArg,
    /// Schema to list (defaults to sync.schema)
    #[arg(long)]
    pub schema: Option<String>,
}

#[derive(Args, Debug)]
pub struct RowsArgs {
    /// Which database to read
    #[arg(long, value_enum, default_value_t = SideArg::Source)]
    pub side: SideArg,
    /// Table to dump
    #[arg(long)]
    pub table: String,
    /// Schema holding the table (defaults to sync.schema)
    #[arg(long)]
    pub schema: Option<String>,
    /// Print compact JSON instead of pretty-printed
    #[arg(long)]
    pub compact: bool,
}

pub async fn tables(args: TablesArgs, options: &GlobalOptions) -> Result<()> {
    let side = Side::from(args.side);
    let client = options.connect(side).await?;
    let schema = options.schema(args.schema.as_deref());

    let tables = list_tables(&client, schema).await?;
    if tables.is_empty() {
        println!("No tables in schema {} of the {} database", schema, side);
    }
    for table in tables {
        println!("{}", table);
    }
    Ok(())
}

pub async fn rows(args: RowsArgs, options: &GlobalOptions) -> Result<()> {
    let side = Side::from(args.side);
    let client = Mutex::new(options.connect(side).await?);
    let pg = PgTable::new(&client, options.schema(args.schema.as_deref()));

    let rows = read_table(&pg, side, &args.table).await?;
    tracing::info!("Read {} rows from {}", rows.len(), args.table);

    let json = if args.compact {
        serde_json::to_string(&rows)
    } else {
        serde_json::to_string_pretty(&rows)
    }
    .context("Failed to serialize rows")?;
    println!("{}", json);
    Ok(())
}
