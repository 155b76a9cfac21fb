use std::path::PathBuf;

use bloom_core::{EntityType, OperationType};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bloom")]
#[command(about = "Inspect and maintain the Bloom offline sync queue")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to a JSON config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect or edit pending sync operations
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Inspect resolved configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// List pending operations in replay order
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show queue statistics
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Queue an operation by hand
    Add {
        /// Entity type (e.g. health-log, blood-pressure)
        #[arg(long, value_parser = parse_entity_type)]
        entity: EntityType,
        /// Operation type
        #[arg(long, value_parser = parse_operation_type)]
        op: OperationType,
        /// Target record id (required for update and delete)
        #[arg(long, value_name = "ID")]
        entity_id: Option<String>,
        /// JSON payload forwarded to the handler
        #[arg(long, value_name = "JSON", default_value = "{}")]
        data: String,
    },
    /// Cancel a pending operation
    Remove {
        /// Operation ID or unique ID prefix
        id: String,
    },
    /// Drop every pending operation
    Clear {
        /// Confirm clearing the queue
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration as JSON
    Show,
}

fn parse_entity_type(raw: &str) -> Result<EntityType, String> {
    raw.parse()
}

fn parse_operation_type(raw: &str) -> Result<OperationType, String> {
    raw.parse()
}
