//! # agora-settings
//!
//! Layered configuration for the room orchestration engine.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** ([`AgoraSettings::default()`])
//! 2. **User file**: `~/.agora/settings.json`, deep-merged over defaults
//! 3. **Environment variables**: `AGORA_*` overrides (highest priority)
//!
//! The engine copies what it needs into a per-session config when a session
//! starts; changing settings never affects a running session.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path,
};
pub use types::*;
