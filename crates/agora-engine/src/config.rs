use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use agora_settings::AgoraSettings;

use crate::error::EngineError;
use crate::pipeline::PipelineKind;

/// Resolved per-session configuration.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub pipeline: PipelineKind,
    pub window_size: usize,
    pub duration: Duration,
    pub tick_interval: Duration,
    pub role_timeout: Duration,
    pub queue_capacity: usize,
    /// Role name to system prompt template.
    pub prompts: BTreeMap<String, String>,
    pub transcript_dir: Option<PathBuf>,
}

impl SessionConfig {
    pub fn from_settings(settings: &AgoraSettings) -> Result<Self, EngineError> {
        settings.validate()?;
        Ok(Self::resolve(settings))
    }

    fn resolve(settings: &AgoraSettings) -> Self {
        Self {
            pipeline: PipelineKind::from_name(&settings.session.pipeline),
            window_size: settings.session.window_size,
            duration: Duration::from_secs(settings.session.duration_secs),
            tick_interval: Duration::from_secs(settings.session.tick_interval_secs),
            role_timeout: Duration::from_secs(settings.engine.role_timeout_secs),
            queue_capacity: settings.engine.queue_capacity,
            prompts: settings.prompts.clone(),
            transcript_dir: settings.session.transcript_dir.as_ref().map(PathBuf::from),
        }
    }

    /// Prompt for a role with `{topic}` substituted; empty if unconfigured.
    pub fn prompt_for(&self, role: &str, topic: &str) -> String {
        self.prompts
            .get(role)
            .map(|p| p.replace("{topic}", topic))
            .unwrap_or_default()
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::resolve(&AgoraSettings::default())
    }
}
