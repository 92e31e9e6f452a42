use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use interaction_log_core::{filter_by_item_id, NewInteraction};
use interaction_log_store_sqlite::SqliteStore;
use serde_json::Value;
use tracing_subscriber::{fmt, EnvFilter};

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "ilog")]
#[command(about = "Interaction Log CLI")]
struct Cli {
    #[arg(long, env = "INTERACTION_LOG_DB", default_value = "./interaction_log.sqlite3")]
    db: PathBuf,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Interaction {
        #[command(subcommand)]
        command: InteractionCommand,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum InteractionCommand {
    Add(AddInteractionArgs),
    List(ListInteractionsArgs),
}

#[derive(Debug, Args)]
struct AddInteractionArgs {
    #[arg(long)]
    learner_id: i64,
    #[arg(long)]
    item_id: i64,
    #[arg(long, default_value = "attempt")]
    kind: String,
}

#[derive(Debug, Args)]
struct ListInteractionsArgs {
    #[arg(long)]
    item_id: Option<i64>,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut store = SqliteStore::open(&cli.db)?;
    match cli.command {
        Command::Db { command } => run_db(command, &mut store),
        Command::Interaction { command } => run_interaction(command, &mut store),
    }
}

fn run_db(command: DbCommand, store: &mut SqliteStore) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => run_db_schema_version(store),
        DbCommand::Migrate(args) => run_db_migrate(&args, store),
    }
}

fn run_db_schema_version(store: &SqliteStore) -> Result<()> {
    let status = store.schema_status()?;
    emit_json(serde_json::json!({
        "current_version": status.current_version,
        "target_version": status.target_version,
        "pending_versions": status.pending_versions,
        "up_to_date": status.pending_versions.is_empty()
    }))
}

fn run_db_migrate(args: &DbMigrateArgs, store: &mut SqliteStore) -> Result<()> {
    let before = store.schema_status()?;
    if args.dry_run {
        emit_json(serde_json::json!({
            "dry_run": true,
            "current_version": before.current_version,
            "target_version": before.target_version,
            "would_apply_versions": before.pending_versions
        }))?;
        return Ok(());
    }

    store.migrate()?;
    let after = store.schema_status()?;
    tracing::info!(from = before.current_version, to = after.current_version, "schema migrated");
    emit_json(serde_json::json!({
        "dry_run": false,
        "before_version": before.current_version,
        "applied_versions": before.pending_versions,
        "after_version": after.current_version,
        "target_version": after.target_version,
        "up_to_date": after.pending_versions.is_empty()
    }))
}

fn run_interaction(command: InteractionCommand, store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    match command {
        InteractionCommand::Add(args) => {
            let record = store.insert_interaction(&NewInteraction {
                learner_id: args.learner_id,
                item_id: args.item_id,
                kind: args.kind,
            })?;
            emit_json(serde_json::to_value(&record).context("failed to serialize interaction")?)
        }
        InteractionCommand::List(args) => {
            let records = filter_by_item_id(store.list_interactions()?, args.item_id);
            tracing::debug!(item_id = ?args.item_id, returned = records.len(), "listed interactions");
            emit_json(serde_json::json!({
                "item_id": args.item_id,
                "interactions": records
            }))
        }
    }
}
