use std::time::Duration;

use agora_core::errors::{PersistenceError, RoleError};
use agora_core::ids::RoomId;
use agora_settings::SettingsError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("role {role} timed out after {timeout:?}")]
    RoleTimeout { role: String, timeout: Duration },

    #[error("role {role} failed: {cause}")]
    RoleFailure { role: String, cause: RoleError },

    #[error("no broadcast channel attached")]
    ChannelUnavailable,

    #[error("persistence failed: {0}")]
    PersistenceFailure(#[from] PersistenceError),

    #[error("queue item failed: {0}")]
    QueueItemFailure(String),

    #[error("room {0} already has an active session")]
    SessionAlreadyActive(RoomId),

    #[error("no active session for room {0}")]
    SessionNotFound(RoomId),

    #[error("session stopped")]
    SessionStopped,

    #[error("message queue closed")]
    QueueClosed,

    #[error("timer already started")]
    TimerAlreadyStarted,

    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),
}

impl EngineError {
    /// Short classification string for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::RoleTimeout { .. } => "role_timeout",
            Self::RoleFailure { .. } => "role_failure",
            Self::ChannelUnavailable => "channel_unavailable",
            Self::PersistenceFailure(_) => "persistence_failure",
            Self::QueueItemFailure(_) => "queue_item_failure",
            Self::SessionAlreadyActive(_) => "session_already_active",
            Self::SessionNotFound(_) => "session_not_found",
            Self::SessionStopped => "session_stopped",
            Self::QueueClosed => "queue_closed",
            Self::TimerAlreadyStarted => "timer_already_started",
            Self::Settings(_) => "settings",
        }
    }

    /// Map a role-level error to the engine taxonomy.
    pub fn from_role(role: &str, err: RoleError) -> Self {
        match err {
            RoleError::Timeout(timeout) => Self::RoleTimeout {
                role: role.to_string(),
                timeout,
            },
            cause => Self::RoleFailure {
                role: role.to_string(),
                cause,
            },
        }
    }
}
