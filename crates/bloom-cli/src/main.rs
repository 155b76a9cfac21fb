//! Bloom CLI - inspect and maintain the offline sync queue
//!
//! Works directly on the local queue database with the network treated as
//! offline, so nothing here ever replays operations against the backend.

mod cli;
mod commands;
mod error;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, ConfigCommands, QueueCommands};
use crate::commands::add::run_add;
use crate::commands::clear::run_clear;
use crate::commands::common::CliContext;
use crate::commands::config::run_config_show;
use crate::commands::list::run_list;
use crate::commands::remove::run_remove;
use crate::commands::stats::run_stats;
use crate::error::CliError;

fn main() {
    if let Err(error) = run() {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bloom=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let context = CliContext {
        db_path: cli.db_path,
        config_path: cli.config,
    };

    match cli.command {
        Commands::Queue { command } => match command {
            QueueCommands::List { json } => run_list(json, &context)?,
            QueueCommands::Stats { json } => run_stats(json, &context)?,
            QueueCommands::Add {
                entity,
                op,
                entity_id,
                data,
            } => run_add(entity, op, entity_id, &data, &context)?,
            QueueCommands::Remove { id } => run_remove(&id, &context)?,
            QueueCommands::Clear { yes } => run_clear(yes, &context)?,
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show => run_config_show(&context)?,
        },
    }

    Ok(())
}
