//! Flag records as persisted in the flag store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound of a rollout percentage.
pub const MAX_ROLLOUT: u8 = 100;

/// Clamp an arbitrary rollout input into `[0, 100]`.
///
/// Out-of-range values are accepted and clamped, never rejected.
pub fn clamp_percentage(value: i32) -> u8 {
    value.clamp(0, MAX_ROLLOUT as i32) as u8
}

/// A persisted feature flag.
///
/// Rows use snake_case columns, so a store row decodes directly:
///
/// ```
/// use flag_kit::FlagRecord;
///
/// let row = r#"{
///     "name": "new_checkout",
///     "enabled": true,
///     "rollout_percentage": 25,
///     "description": "Staged checkout redesign",
///     "created_at": "2024-01-01T00:00:00Z",
///     "updated_at": "2024-01-02T00:00:00Z"
/// }"#;
///
/// let record: FlagRecord = serde_json::from_str(row).unwrap();
/// assert_eq!(record.rollout_percentage, 25);
/// ```
///
/// Columns other than `name` fall back to defaults when absent; delete
/// events from a change feed often carry nothing but the key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagRecord {
    /// Unique, immutable flag name.
    pub name: String,

    /// Master switch. When false the rollout percentage is ignored.
    #[serde(default)]
    pub enabled: bool,

    /// Share of users receiving the feature when `enabled`, in `[0, 100]`.
    #[serde(default, deserialize_with = "deserialize_percentage")]
    pub rollout_percentage: u8,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

impl FlagRecord {
    /// Build a new record stamped with the current time.
    pub fn new(name: impl Into<String>, enabled: bool, rollout_percentage: i32) -> Self {
        let now = Utc::now();
        FlagRecord {
            name: name.into(),
            enabled,
            rollout_percentage: clamp_percentage(rollout_percentage),
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Apply a partial update, refreshing `updated_at` from the patch.
    pub fn apply(&mut self, patch: &FlagPatch) {
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        if let Some(pct) = patch.rollout_percentage {
            self.rollout_percentage = pct.min(MAX_ROLLOUT);
        }
        self.updated_at = patch.updated_at;
    }
}

/// Partial update written by `FlagStore::update`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FlagPatch {
    pub enabled: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollout_percentage: Option<u8>,

    pub updated_at: DateTime<Utc>,
}

impl FlagPatch {
    /// Patch for `updateFlag(name, enabled, rollout?)`. The percentage is clamped.
    pub fn toggle(enabled: bool, rollout_percentage: Option<i32>) -> Self {
        FlagPatch {
            enabled: Some(enabled),
            rollout_percentage: rollout_percentage.map(clamp_percentage),
            updated_at: Utc::now(),
        }
    }
}

// Stores are not guaranteed to enforce the range check, so rows are clamped on read.
fn deserialize_percentage<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = i64::deserialize(deserializer)?;
    Ok(raw.clamp(0, MAX_ROLLOUT as i64) as u8)
}
