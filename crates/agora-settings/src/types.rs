//! Settings type definitions.
//!
//! All types use camelCase field names and `#[serde(default)]`, so partial
//! JSON files are accepted and missing fields keep their default value.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgoraSettings {
    pub engine: EngineSettings,
    pub session: SessionSettings,
    /// Role name to system prompt. `{topic}` is replaced at session start.
    pub prompts: BTreeMap<String, String>,
    pub logging: LoggingSettings,
    pub store: StoreSettings,
}

impl AgoraSettings {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let checks: [(&str, u64); 5] = [
            ("engine.roleTimeoutSecs", self.engine.role_timeout_secs),
            ("engine.queueCapacity", self.engine.queue_capacity as u64),
            ("session.windowSize", self.session.window_size as u64),
            ("session.durationSecs", self.session.duration_secs),
            ("session.tickIntervalSecs", self.session.tick_interval_secs),
        ];
        for (key, value) in checks {
            if value == 0 {
                return Err(SettingsError::InvalidValue(format!("{key} must be at least 1")));
            }
        }
        Ok(())
    }

    /// Prompt for a role with the topic substituted; empty if unconfigured.
    pub fn prompt_for(&self, role: &str, topic: &str) -> String {
        self.prompts
            .get(role)
            .map(|p| p.replace("{topic}", topic))
            .unwrap_or_default()
    }
}

/// Role invocation and queueing limits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Upper bound for every role call, observe and broadcast.
    pub role_timeout_secs: u64,
    /// Per-room queue capacity. Producers wait when it is full.
    pub queue_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            role_timeout_secs: 15,
            queue_capacity: 500,
        }
    }
}

/// Per-session behavior.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Registered pipeline name ("standard", "windowed", "toulmin", ...).
    pub pipeline: String,
    /// Messages per window for the windowed and threshold pipelines.
    pub window_size: usize,
    pub duration_secs: u64,
    pub tick_interval_secs: u64,
    /// Where transcripts are written when a session stops. Unset disables it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript_dir: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            pipeline: "standard".to_string(),
            window_size: 5,
            duration_secs: 600,
            tick_interval_secs: 60,
            transcript_dir: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    /// Module path to level, e.g. `{"agora_engine": "debug"}`.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
            modules: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    pub db_path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        Self {
            db_path: format!("{home}/.agora/agora.db"),
        }
    }
}
