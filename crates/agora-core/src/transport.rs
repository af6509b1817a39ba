use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::TransportError;
use crate::ids::RoomId;
use crate::messages::Reply;

/// Events pushed to the clients connected to a room.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    /// Replies delivered by the moderator roles.
    Evaluation { replies: Vec<Reply> },
    /// Session clock progress, in whole seconds.
    TimerUpdate { elapsed: u64, remaining: u64 },
}

impl RoomEvent {
    /// Wire event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Evaluation { .. } => "evaluacion",
            Self::TimerUpdate { .. } => "timer_update",
        }
    }

    /// Wire payload, without the event name.
    pub fn payload(&self) -> serde_json::Value {
        match self {
            Self::Evaluation { replies } => serde_json::json!(replies),
            Self::TimerUpdate { elapsed, remaining } => serde_json::json!({
                "elapsed": elapsed,
                "remaining": remaining,
            }),
        }
    }
}

/// Real-time push collaborator. The engine never retries a failed emit.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn emit(&self, room: &RoomId, event: RoomEvent) -> Result<(), TransportError>;
}
