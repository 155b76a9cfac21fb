use serde::Serialize;

use bloom_core::config::AppConfig;

use crate::commands::common::{default_db_path, CliContext};
use crate::error::CliError;

#[derive(Debug, Serialize)]
struct EffectiveConfig {
    config_path: String,
    config_file_exists: bool,
    resolved_database_path: String,
    #[serde(flatten)]
    config: AppConfig,
}

pub fn run_config_show(context: &CliContext) -> Result<(), CliError> {
    let config_path = context.resolved_config_path();
    let config = context.load_config()?;
    let database_path = config
        .database_path
        .clone()
        .unwrap_or_else(default_db_path);

    let effective = EffectiveConfig {
        config_file_exists: config_path.exists(),
        config_path: config_path.display().to_string(),
        resolved_database_path: database_path.display().to_string(),
        config,
    };
    println!("{}", serde_json::to_string_pretty(&effective)?);
    Ok(())
}
