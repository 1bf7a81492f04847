// ABOUTME: Sync command - reconciles one target table against one source table
// ABOUTME: Supports dry runs that print the corrective statements without executing them

use anyhow::{Context, Result};
use clap::Args;
use tokio::sync::Mutex;

use super::{GlobalOptions, KeyPolicyArg};
use crate::postgres::PgTable;
use crate::sync::{ApplyMode, Reconciler, Side, SyncOutcome, SyncPlan};

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Table to read from the source database
    #[arg(long = "source-table")]
    pub source_table: String,
    /// Table to update in the target database (defaults to --source-table)
    #[arg(long = "target-table")]
    pub target_table: Option<String>,
    /// Schema holding both tables (defaults to sync.schema)
    #[arg(long)]
    pub schema: Option<String>,
    /// Accept composite primary keys, or require a single key column
    #[arg(long = "key-policy", value_enum)]
    pub key_policy: Option<KeyPolicyArg>,
    /// Apply all changes in one transaction, rolled back on failure
    #[arg(long)]
    pub transactional: bool,
    /// Compute and print the changes without writing to the target
    #[arg(long = "dry-run")]
    pub dry_run: bool,
    /// Print the outcome (or plan) as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn sync(args: SyncArgs, options: &GlobalOptions) -> Result<()> {
    let mut settings = options.config.sync.clone();
    if let Some(schema) = &args.schema {
        settings.schema = schema.clone();
    }
    if let Some(policy) = args.key_policy {
        settings.key_policy = policy.into();
    }
    if args.transactional {
        settings.apply_mode = ApplyMode::Transactional;
    }

    let target_table = args
        .target_table
        .clone()
        .unwrap_or_else(|| args.source_table.clone());

    let source_client = Mutex::new(options.connect(Side::Source).await?);
    let target_client = Mutex::new(options.connect(Side::Target).await?);
    let source = PgTable::new(&source_client, &settings.schema);
    let target = PgTable::new(&target_client, &settings.schema);

    let mut reconciler = Reconciler::new(&source, &target, &target, settings.reconcile_config());

    if args.dry_run {
        let plan = reconciler.plan(&args.source_table, &target_table).await?;
        if args.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&plan).context("Failed to serialize plan")?
            );
        } else {
            print_plan(&plan);
        }
        return Ok(());
    }

    let outcome = reconciler
        .synchronize(&args.source_table, &target_table)
        .await?;
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&outcome).context("Failed to serialize outcome")?
        );
    } else {
        print_outcome(&outcome);
    }
    Ok(())
}

fn print_plan(plan: &SyncPlan) {
    println!(
        "Dry run {} -> {} (key {}): {} to insert, {} to update, {} to delete, {} unchanged",
        plan.source_table,
        plan.target_table,
        plan.primary_key,
        plan.diff.to_insert.len(),
        plan.diff.to_update.len(),
        plan.diff.to_delete.len(),
        plan.diff.unchanged
    );
    for statement in &plan.statements {
        println!("  {} key={}: {}", statement.kind, statement.key, statement.sql);
    }
}

fn print_outcome(outcome: &SyncOutcome) {
    if outcome.is_noop() {
        println!(
            "✓ {} already matches {} ({} rows)",
            outcome.target_table, outcome.source_table, outcome.unchanged
        );
        return;
    }
    println!(
        "✓ Synchronized {} -> {}: {} inserted, {} updated, {} deleted, {} unchanged ({}ms)",
        outcome.source_table,
        outcome.target_table,
        outcome.inserted,
        outcome.updated,
        outcome.deleted,
        outcome.unchanged,
        outcome.duration_ms
    );
}
