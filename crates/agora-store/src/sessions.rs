use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use agora_core::ids::{RoomId, SessionId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomSessionStatus {
    Active,
    Closed,
}

impl std::fmt::Display for RoomSessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

impl std::str::FromStr for RoomSessionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "closed" => Ok(Self::Closed),
            other => Err(format!("unknown room session status: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSessionRow {
    pub id: SessionId,
    pub room_id: RoomId,
    pub topic: String,
    pub pipeline: String,
    pub status: RoomSessionStatus,
    pub created_at: String,
    pub closed_at: Option<String>,
}

/// Session bookkeeping: at most one active session per room.
pub struct RoomSessionRepo {
    db: Database,
}

impl RoomSessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Return the active session for a room, creating one if there is none.
    /// The flag is true when a new row was created.
    #[instrument(skip(self), fields(room_id = %room_id))]
    pub fn get_or_create_active(
        &self,
        room_id: &RoomId,
        topic: &str,
        pipeline: &str,
    ) -> Result<(RoomSessionRow, bool), StoreError> {
        self.db.with_tx(|conn| {
            if let Some(row) = query_active(conn, room_id)? {
                return Ok((row, false));
            }

            let id = SessionId::new();
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO room_sessions (id, room_id, topic, pipeline, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, 'active', ?5)",
                rusqlite::params![id.as_str(), room_id.as_str(), topic, pipeline, now],
            )?;

            Ok((
                RoomSessionRow {
                    id,
                    room_id: room_id.clone(),
                    topic: topic.to_string(),
                    pipeline: pipeline.to_string(),
                    status: RoomSessionStatus::Active,
                    created_at: now,
                    closed_at: None,
                },
                true,
            ))
        })
    }

    /// The active session for a room, if any.
    #[instrument(skip(self), fields(room_id = %room_id))]
    pub fn active_for_room(&self, room_id: &RoomId) -> Result<Option<RoomSessionRow>, StoreError> {
        self.db.with_conn(|conn| query_active(conn, room_id))
    }

    /// Close the active session for a room. Returns the closed session id.
    #[instrument(skip(self), fields(room_id = %room_id))]
    pub fn close_active(&self, room_id: &RoomId) -> Result<Option<SessionId>, StoreError> {
        self.db.with_tx(|conn| {
            let Some(row) = query_active(conn, room_id)? else {
                return Ok(None);
            };
            conn.execute(
                "UPDATE room_sessions SET status = 'closed', closed_at = ?1 WHERE id = ?2",
                rusqlite::params![Utc::now().to_rfc3339(), row.id.as_str()],
            )?;
            Ok(Some(row.id))
        })
    }

    #[instrument(skip(self), fields(session_id = %id))]
    pub fn get(&self, id: &SessionId) -> Result<RoomSessionRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_SESSION} WHERE id = ?1"))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_session(row),
                None => Err(StoreError::NotFound(format!("room session {id}"))),
            }
        })
    }
}

const SELECT_SESSION: &str =
    "SELECT id, room_id, topic, pipeline, status, created_at, closed_at FROM room_sessions";

fn query_active(
    conn: &rusqlite::Connection,
    room_id: &RoomId,
) -> Result<Option<RoomSessionRow>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_SESSION} WHERE room_id = ?1 AND status = 'active' LIMIT 1"
    ))?;
    let mut rows = stmt.query([room_id.as_str()])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_session(row)?)),
        None => Ok(None),
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<RoomSessionRow, StoreError> {
    const T: &str = "room_sessions";
    let status: String = row_helpers::get(row, 4, T, "status")?;
    Ok(RoomSessionRow {
        id: SessionId::from_raw(row_helpers::get::<String>(row, 0, T, "id")?),
        room_id: RoomId::from_raw(row_helpers::get::<String>(row, 1, T, "room_id")?),
        topic: row_helpers::get(row, 2, T, "topic")?,
        pipeline: row_helpers::get(row, 3, T, "pipeline")?,
        status: row_helpers::parse_enum(&status, T, "status")?,
        created_at: row_helpers::get(row, 5, T, "created_at")?,
        closed_at: row_helpers::get(row, 6, T, "closed_at")?,
    })
}
