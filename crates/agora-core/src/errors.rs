use std::time::Duration;

/// Failure of a single moderator role operation.
/// Callers treat every variant as "no opinion"; none of them end a session.
#[derive(Clone, Debug, thiserror::Error)]
pub enum RoleError {
    #[error("role timed out after {0:?}")]
    Timeout(Duration),
    #[error("role failed: {0}")]
    Failure(String),
    #[error("role panicked")]
    Panicked,
}

impl RoleError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "role_timeout",
            Self::Failure(_) => "role_failure",
            Self::Panicked => "role_panicked",
        }
    }
}

/// Failure writing a delivered reply to storage.
#[derive(Clone, Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("write rejected: {0}")]
    Rejected(String),
}

/// Failure pushing an event to connected clients.
#[derive(Clone, Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no subscribers for room {0}")]
    NoSubscribers(String),
    #[error("transport closed")]
    Closed,
    #[error("send failed: {0}")]
    Send(String),
}
