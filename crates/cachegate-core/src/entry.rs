use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Pending cold-tier action for an entry.
///
/// An entry without a pending action (`Option::<SyncType>::None`) is clean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncType {
    /// Payload must be written to the cold tier.
    Update,
    /// Object must be removed from the cold tier, then the record purged.
    Delete,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Update => "update",
            SyncType::Delete => "delete",
        }
    }
}

impl FromStr for SyncType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "update" => Ok(SyncType::Update),
            "delete" => Ok(SyncType::Delete),
            _ => Err(CoreError::internal(format!("Invalid sync type: {}", s))),
        }
    }
}

impl std::fmt::Display for SyncType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bookkeeping record for one cached key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub id: String,
    pub update_time: DateTime<Utc>,
    pub sync_type: Option<SyncType>,
    pub has_data: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default)]
    pub version: i64,
}

impl CacheEntry {
    /// Whether the cold tier is stale relative to this entry.
    pub fn is_dirty(&self) -> bool {
        self.sync_type.is_some()
    }

    /// Whether the entry is visible to reads.
    pub fn is_live(&self) -> bool {
        self.sync_type != Some(SyncType::Delete)
    }

    /// Checks the record-level invariants:
    /// `data` present iff `has_data`, and a pending delete carries no payload.
    pub fn check_invariants(&self) -> CoreResult<()> {
        if self.data.is_some() != self.has_data {
            return Err(CoreError::internal(format!(
                "entry `{}` has_data={} but data present={}",
                self.id,
                self.has_data,
                self.data.is_some()
            )));
        }
        if self.sync_type == Some(SyncType::Delete) && self.has_data {
            return Err(CoreError::internal(format!(
                "entry `{}` is pending delete but still holds data",
                self.id
            )));
        }
        Ok(())
    }
}

/// Validates a caller-supplied key.
pub fn validate_key(key: &str) -> CoreResult<()> {
    if key.is_empty() {
        return Err(CoreError::invalid_argument("key must not be empty"));
    }
    Ok(())
}
