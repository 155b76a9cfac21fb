use std::env;
use std::path::PathBuf;

use bloom_core::config::AppConfig;
use bloom_core::services::SyncRuntime;
use bloom_core::sync::QueueStats;
use bloom_core::{OperationId, OperationType, SyncOperation};
use chrono::{DateTime, Utc};

use crate::error::CliError;

/// Env var naming the config file.
const ENV_CONFIG_PATH: &str = "BLOOM_CONFIG";

/// Global options shared by every command.
#[derive(Debug, Clone, Default)]
pub struct CliContext {
    pub db_path: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
}

impl CliContext {
    pub fn resolved_config_path(&self) -> PathBuf {
        self.config_path
            .clone()
            .or_else(|| env::var_os(ENV_CONFIG_PATH).map(PathBuf::from))
            .unwrap_or_else(default_config_path)
    }

    /// Config file, then `BLOOM_*` env overrides, then `--db-path`.
    pub fn load_config(&self) -> Result<AppConfig, CliError> {
        let mut config = AppConfig::load(&self.resolved_config_path())?.apply_env_overrides()?;
        if let Some(db_path) = self.db_path.clone() {
            config.database_path = Some(db_path);
        }
        Ok(config)
    }

    pub fn open_queue(&self) -> Result<SyncRuntime, CliError> {
        let config = self.load_config()?;
        let runtime = SyncRuntime::open_offline(&config, &default_db_path())?;
        tracing::debug!(
            "Opened sync queue with {} pending operations",
            runtime.queue().len()
        );
        Ok(runtime)
    }
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bloom")
        .join("bloom.db")
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bloom")
        .join("config.json")
}

pub fn normalize_operation_identifier(raw: &str) -> Result<String, CliError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyOperationId)
    } else {
        Ok(trimmed.to_ascii_lowercase())
    }
}

/// Resolve a full operation id or a unique prefix of one.
pub fn resolve_operation_id(
    query: &str,
    operations: &[SyncOperation],
) -> Result<OperationId, CliError> {
    if let Ok(id) = query.parse::<OperationId>() {
        if operations.iter().any(|op| op.id == id) {
            return Ok(id);
        }
    }

    let matching: Vec<OperationId> = operations
        .iter()
        .map(|op| op.id)
        .filter(|id| id.to_string().starts_with(query))
        .collect();

    match matching.as_slice() {
        [] => Err(CliError::OperationNotFound(query.to_string())),
        [id] => Ok(*id),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|id| short_id(*id))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousOperationId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn parse_payload(raw: &str) -> Result<serde_json::Value, CliError> {
    serde_json::from_str(raw).map_err(|error| CliError::InvalidPayload(error.to_string()))
}

/// Creates may omit the target id; updates and deletes may not.
pub fn require_entity_id(
    operation_type: OperationType,
    entity_id: Option<String>,
) -> Result<Option<String>, CliError> {
    let entity_id = entity_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());
    match (operation_type, entity_id) {
        (OperationType::Create, entity_id) => Ok(entity_id),
        (_, Some(entity_id)) => Ok(Some(entity_id)),
        (other, None) => Err(CliError::MissingEntityId(other.to_string())),
    }
}

pub fn short_id(id: OperationId) -> String {
    id.to_string().chars().take(13).collect()
}

pub fn format_operation_lines(operations: &[SyncOperation]) -> Vec<String> {
    let now = Utc::now();
    operations
        .iter()
        .map(|op| {
            let target = op.entity_id.as_deref().unwrap_or("-");
            let age = format_relative_time(op.timestamp, now);
            format!(
                "{:<13}  {:<6}  {:<14}  {:<20}  retries={}  {}",
                short_id(op.id),
                op.operation_type.as_str(),
                op.entity_type.as_str(),
                target,
                op.retry_count,
                age
            )
        })
        .collect()
}

pub fn format_stats_lines(stats: &QueueStats) -> Vec<String> {
    let mut lines = vec![
        format!("pending:      {}", stats.total),
        format!("retrying:     {}", stats.retrying),
        format!("max retries:  {}", stats.max_retries),
    ];
    if let Some(oldest) = stats.oldest {
        lines.push(format!(
            "oldest:       {}",
            oldest.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    for (entity, count) in &stats.by_entity {
        lines.push(format!("  {:<14}  {count}", entity.as_str()));
    }
    for (operation, count) in &stats.by_operation {
        lines.push(format!("  {:<14}  {count}", operation.as_str()));
    }
    lines
}

/// Coarse age of a queued operation, e.g. `5m ago`.
pub fn format_relative_time(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let age = now.signed_duration_since(timestamp);
    match (age.num_days(), age.num_hours(), age.num_minutes()) {
        (days, _, _) if days > 0 => format!("{days}d ago"),
        (_, hours, _) if hours > 0 => format!("{hours}h ago"),
        (_, _, minutes) if minutes > 0 => format!("{minutes}m ago"),
        _ => "just now".to_string(),
    }
}
