use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{info, warn};

use agora_core::ids::{RoomId, SessionId};
use agora_core::messages::Reply;

use crate::config::SessionConfig;
use crate::error::EngineError;
use crate::room::{RoomSession, SessionDeps, SessionRequest};
use crate::transcript::Transcript;

/// Process-wide map of active rooms. At most one live session per room
/// key; create and destroy for the same key are serialized by the map's
/// shard lock.
pub struct RoomRegistry {
    rooms: DashMap<RoomId, Arc<RoomSession>>,
    config: SessionConfig,
    deps: SessionDeps,
}

impl RoomRegistry {
    pub fn new(config: SessionConfig, deps: SessionDeps) -> Self {
        Self {
            rooms: DashMap::new(),
            config,
            deps,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Register a new session for `room_id` without starting it. A stopped
    /// session left in the map is replaced.
    pub fn open(
        &self,
        room_id: RoomId,
        session_id: SessionId,
        request: SessionRequest,
    ) -> Result<Arc<RoomSession>, EngineError> {
        match self.rooms.entry(room_id.clone()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_stopped() {
                    return Err(EngineError::SessionAlreadyActive(room_id));
                }
                let session = self.build(room_id, session_id, request);
                occupied.insert(session.clone());
                Ok(session)
            }
            Entry::Vacant(vacant) => {
                let session = self.build(room_id, session_id, request);
                vacant.insert(session.clone());
                Ok(session)
            }
        }
    }

    /// Open and start a session, returning the moderator's opening replies.
    pub async fn start_session(
        &self,
        room_id: RoomId,
        session_id: SessionId,
        request: SessionRequest,
    ) -> Result<(Arc<RoomSession>, Vec<Reply>), EngineError> {
        let session = self.open(room_id.clone(), session_id, request)?;
        match session.start_session().await {
            Ok(replies) => Ok((session, replies)),
            Err(e) => {
                warn!(room = %room_id, error = %e, "session failed to start");
                self.rooms.remove_if(&room_id, |_, s| Arc::ptr_eq(s, &session));
                Err(e)
            }
        }
    }

    pub fn get(&self, room_id: &RoomId) -> Option<Arc<RoomSession>> {
        self.rooms.get(room_id).map(|s| s.value().clone())
    }

    /// Stop and remove the room's session.
    pub async fn close(&self, room_id: &RoomId) -> Result<Transcript, EngineError> {
        let (_, session) = self
            .rooms
            .remove(room_id)
            .ok_or_else(|| EngineError::SessionNotFound(room_id.clone()))?;
        session.stop_session().await
    }

    /// Stop every room. Rooms that fail to stop cleanly are logged and
    /// skipped.
    pub async fn close_all(&self) -> Vec<(RoomId, Transcript)> {
        let mut closed = Vec::new();
        for room_id in self.active_rooms() {
            match self.close(&room_id).await {
                Ok(transcript) => closed.push((room_id, transcript)),
                Err(e) => warn!(room = %room_id, error = %e, "failed to close room"),
            }
        }
        info!(rooms = closed.len(), "all rooms closed");
        closed
    }

    /// Keys of the registered rooms, sorted.
    pub fn active_rooms(&self) -> Vec<RoomId> {
        let mut rooms: Vec<RoomId> = self.rooms.iter().map(|e| e.key().clone()).collect();
        rooms.sort();
        rooms
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    fn build(
        &self,
        room_id: RoomId,
        session_id: SessionId,
        request: SessionRequest,
    ) -> Arc<RoomSession> {
        let config = self.config.clone();
        Arc::new(RoomSession::open(room_id, session_id, request, config, &self.deps))
    }
}
