//! Queued sync operation model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unique identifier for a queued operation, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Create a new unique operation ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s.trim())?))
    }
}

/// Kind of record an operation targets. Each kind has at most one handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    FoodItem,
    HealthLog,
    Profile,
    Timeline,
    KickSession,
    Contraction,
    Weight,
    BloodPressure,
    Mood,
    Sleep,
    Exercise,
    Symptom,
}

impl EntityType {
    /// Every entity kind, in declaration order.
    pub const ALL: [Self; 12] = [
        Self::FoodItem,
        Self::HealthLog,
        Self::Profile,
        Self::Timeline,
        Self::KickSession,
        Self::Contraction,
        Self::Weight,
        Self::BloodPressure,
        Self::Mood,
        Self::Sleep,
        Self::Exercise,
        Self::Symptom,
    ];

    /// Wire name as stored in the persisted queue (e.g. `HEALTH_LOG`).
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FoodItem => "FOOD_ITEM",
            Self::HealthLog => "HEALTH_LOG",
            Self::Profile => "PROFILE",
            Self::Timeline => "TIMELINE",
            Self::KickSession => "KICK_SESSION",
            Self::Contraction => "CONTRACTION",
            Self::Weight => "WEIGHT",
            Self::BloodPressure => "BLOOD_PRESSURE",
            Self::Mood => "MOOD",
            Self::Sleep => "SLEEP",
            Self::Exercise => "EXERCISE",
            Self::Symptom => "SYMPTOM",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    /// Accepts the wire name in any case, with `-` or `_` separators.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_").to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("unknown entity type '{}'", s.trim()))
    }
}

/// Mutation applied to the remote record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl OperationType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CREATE" => Ok(Self::Create),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            other => Err(format!("unknown operation type '{other}'")),
        }
    }
}

/// A pending mutation against the remote store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    /// Unique identifier, generated at enqueue time
    pub id: OperationId,
    /// Which handler applies
    pub entity_type: EntityType,
    /// Create, update or delete
    pub operation_type: OperationType,
    /// Target record, absent for creates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Payload forwarded verbatim to the handler
    #[serde(default)]
    pub data: serde_json::Value,
    /// Enqueue time
    pub timestamp: DateTime<Utc>,
    /// Number of processing attempts so far
    #[serde(default)]
    pub retry_count: u32,
    /// Time of the most recent attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_retry: Option<DateTime<Utc>>,
}

impl SyncOperation {
    /// Build a fresh operation with `retry_count = 0`
    #[must_use]
    pub fn new(
        entity_type: EntityType,
        operation_type: OperationType,
        data: serde_json::Value,
        entity_id: Option<String>,
    ) -> Self {
        Self {
            id: OperationId::new(),
            entity_type,
            operation_type,
            entity_id,
            data,
            timestamp: Utc::now(),
            retry_count: 0,
            last_retry: None,
        }
    }

    /// Record a processing attempt.
    pub fn mark_attempt(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_retry = Some(Utc::now());
    }

    /// Whether the attempts made so far have used up the retry cap.
    pub const fn is_exhausted(&self, max_retries: u32) -> bool {
        self.retry_count >= max_retries
    }
}
