//! Persisted wire formats.
//!
//! Two independent records: the session record (draw progress) and the
//! settings record (auto-generation preferences). They are separate so that
//! a session reset never touches the user's settings. Both parse leniently —
//! missing fields fall back to the fresh-session defaults.

use serde::{Deserialize, Serialize};

/// Store key for the session record.
pub const SESSION_KEY: &str = "session";
/// Store key for the settings record.
pub const SETTINGS_KEY: &str = "settings";

/// Draw progress, persisted after every mutation of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionRecord {
    pub current_number: Option<u32>,
    pub generated_numbers: Vec<u32>,
    pub is_paused: bool,
}

impl Default for SessionRecord {
    fn default() -> Self {
        Self {
            current_number: None,
            generated_numbers: Vec::new(),
            // A fresh session starts paused; a record written before the
            // pause flag existed hydrates the same way.
            is_paused: true,
        }
    }
}

impl SessionRecord {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Auto-generation preferences, persisted when changed from settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsRecord {
    pub is_auto_mode: bool,
    /// Seconds between automatic draws. Clamped on hydration — stored values
    /// are not trusted verbatim.
    pub auto_speed: u64,
}

impl Default for SettingsRecord {
    fn default() -> Self {
        Self {
            is_auto_mode: false,
            auto_speed: crate::state::DEFAULT_AUTO_INTERVAL_SECS,
        }
    }
}

impl SettingsRecord {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
