//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::AgoraSettings;

/// Resolve the path to the settings file (`~/.agora/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".agora").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<AgoraSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides, then validate.
///
/// A missing file yields defaults. Invalid JSON or invalid values are errors.
pub fn load_settings_from_path(path: &Path) -> Result<AgoraSettings> {
    let defaults = serde_json::to_value(AgoraSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: AgoraSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `AGORA_*` environment variable overrides.
pub fn apply_env_overrides(settings: &mut AgoraSettings) {
    apply_overrides(settings, |key| std::env::var(key).ok());
}

/// Apply overrides from an arbitrary lookup. Invalid values are ignored
/// with a warning and the file/default value is kept.
pub(crate) fn apply_overrides(
    settings: &mut AgoraSettings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let string = |key: &str| lookup(key).filter(|v| !v.is_empty());
    let ranged = |key: &str, min: u64, max: u64| {
        let val = string(key)?;
        let parsed = parse_u64_range(&val, min, max);
        if parsed.is_none() {
            tracing::warn!(key, value = %val, "invalid numeric env var, ignoring");
        }
        parsed
    };

    if let Some(v) = string("AGORA_PIPELINE") {
        settings.session.pipeline = v;
    }
    if let Some(v) = ranged("AGORA_WINDOW_SIZE", 1, 1_000) {
        settings.session.window_size = v as usize;
    }
    if let Some(v) = ranged("AGORA_SESSION_DURATION", 1, 86_400) {
        settings.session.duration_secs = v;
    }
    if let Some(v) = ranged("AGORA_TICK_INTERVAL", 1, 3_600) {
        settings.session.tick_interval_secs = v;
    }
    if let Some(v) = ranged("AGORA_ROLE_TIMEOUT", 1, 600) {
        settings.engine.role_timeout_secs = v;
    }
    if let Some(v) = ranged("AGORA_QUEUE_CAPACITY", 1, 100_000) {
        settings.engine.queue_capacity = v as usize;
    }
    if let Some(v) = string("AGORA_TRANSCRIPT_DIR") {
        settings.session.transcript_dir = Some(v);
    }
    if let Some(v) = string("AGORA_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = string("AGORA_DB_PATH") {
        settings.store.db_path = v;
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
