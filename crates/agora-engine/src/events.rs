//! In-process [`Transport`] over a tokio broadcast channel.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;

use agora_core::errors::TransportError;
use agora_core::ids::RoomId;
use agora_core::transport::{RoomEvent, Transport};

const DEFAULT_CAPACITY: usize = 1024;

/// An event addressed to one room.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RoomEnvelope {
    pub room: RoomId,
    pub event: RoomEvent,
}

/// Fans room events out to every subscriber. Non-blocking: slow receivers
/// lag instead of stalling the room.
pub struct ChannelTransport {
    tx: broadcast::Sender<RoomEnvelope>,
    emit_count: AtomicU64,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            emit_count: AtomicU64::new(0),
        }
    }

    /// Receive every event emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<RoomEnvelope> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn emit_count(&self) -> u64 {
        self.emit_count.load(Ordering::Relaxed)
    }
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn emit(&self, room: &RoomId, event: RoomEvent) -> Result<(), TransportError> {
        let _ = self.emit_count.fetch_add(1, Ordering::Relaxed);
        self.tx
            .send(RoomEnvelope {
                room: room.clone(),
                event,
            })
            .map(|_| ())
            .map_err(|_| TransportError::NoSubscribers(room.to_string()))
    }
}
