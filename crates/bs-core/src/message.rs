//! Cross-script messages
//!
//! Runtime messages are JSON objects tagged by an `action` field. Unknown
//! actions are not errors; they parse to `None` and are ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::StoredSettings;
use crate::types::StatsDelta;

/// Recognized `action` values.
pub const ACTION_SETTINGS_UPDATED: &str = "settingsUpdated";
pub const ACTION_UPDATE_STATS: &str = "updateStats";
pub const ACTION_UPDATE_SETTINGS: &str = "updateSettings";

/// Error type for message decoding.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Malformed '{action}' message: {source}")]
    Malformed {
        action: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A runtime message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Message {
    /// Popup → background: the stored record changed.
    SettingsUpdated { settings: StoredSettings },
    /// Content script → background: stats increment.
    UpdateStats {
        #[serde(default)]
        stats: StatsDelta,
    },
    /// Background → content script: current record for a loaded tab.
    UpdateSettings { settings: StoredSettings },
}

impl Message {
    pub fn action(&self) -> &'static str {
        match self {
            Self::SettingsUpdated { .. } => ACTION_SETTINGS_UPDATED,
            Self::UpdateStats { .. } => ACTION_UPDATE_STATS,
            Self::UpdateSettings { .. } => ACTION_UPDATE_SETTINGS,
        }
    }

    /// Decode a message. `Ok(None)` for missing or unrecognized actions.
    pub fn from_value(value: &Value) -> Result<Option<Self>, MessageError> {
        let Some(action) = value.get("action").and_then(Value::as_str) else {
            return Ok(None);
        };
        if !matches!(
            action,
            ACTION_SETTINGS_UPDATED | ACTION_UPDATE_STATS | ACTION_UPDATE_SETTINGS
        ) {
            return Ok(None);
        }
        serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|source| MessageError::Malformed {
                action: action.to_string(),
                source,
            })
    }

    pub fn from_json(text: &str) -> Result<Option<Self>, MessageError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Settings;
    use serde_json::json;

    #[test]
    fn parses_update_stats() {
        let msg = Message::from_value(&json!({
            "action": "updateStats",
            "stats": { "bandwidthSaved": 5242880, "elementsBlocked": 1 }
        }))
        .unwrap();
        assert_eq!(
            msg,
            Some(Message::UpdateStats {
                stats: StatsDelta {
                    bandwidth_saved: 5 * 1024 * 1024,
                    elements_blocked: 1,
                }
            })
        );
    }

    #[test]
    fn missing_stats_fields_add_zero() {
        let msg = Message::from_json(r#"{"action":"updateStats","stats":{}}"#).unwrap();
        assert_eq!(
            msg,
            Some(Message::UpdateStats {
                stats: StatsDelta::default()
            })
        );
    }

    #[test]
    fn unknown_actions_are_ignored() {
        assert_eq!(Message::from_value(&json!({ "action": "ping" })).unwrap(), None);
        assert_eq!(Message::from_value(&json!({ "type": "x" })).unwrap(), None);
        assert_eq!(Message::from_value(&json!(42)).unwrap(), None);
    }

    #[test]
    fn malformed_known_action_is_an_error() {
        let err = Message::from_value(&json!({ "action": "updateStats", "stats": "lots" }))
            .unwrap_err();
        assert!(err.to_string().starts_with("Malformed 'updateStats' message"));
    }

    #[test]
    fn serializes_with_action_tag() {
        let msg = Message::UpdateSettings {
            settings: StoredSettings {
                settings: Settings::disabled(),
                ..StoredSettings::default()
            },
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["action"], "updateSettings");
        assert_eq!(value["settings"]["blockVideos"], false);
        assert_eq!(value["settings"]["stats"]["elementsBlocked"], 0);
        assert_eq!(msg.action(), ACTION_UPDATE_SETTINGS);
    }
}
