use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use agora_core::errors::PersistenceError;
use agora_core::ids::{MessageId, SessionId};
use agora_core::messages::MessageRole;
use agora_core::persistence::{MessageRecord, MessageSink};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// A message row as read back from storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: MessageId,
    pub room_session_id: SessionId,
    pub author: String,
    pub role: MessageRole,
    pub content: String,
    pub parent_id: Option<MessageId>,
    pub used_ids: Vec<MessageId>,
    pub created_at: String,
}

#[derive(Clone)]
pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a user or role message and return its id.
    #[instrument(
        skip(self, record),
        fields(session_id = %record.room_session_id, author = %record.author)
    )]
    pub fn insert(&self, record: &MessageRecord) -> Result<MessageId, StoreError> {
        let id = MessageId::new();
        let used_ids = serde_json::to_string(&record.used_ids)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages
                 (id, room_session_id, author, role, content, parent_id, used_ids, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    id.as_str(),
                    record.room_session_id.as_str(),
                    record.author,
                    record.role.as_str(),
                    record.content,
                    record.parent_id.as_ref().map(MessageId::as_str),
                    used_ids,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(id)
        })
    }

    /// All messages of a session in insertion order.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn list_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, room_session_id, author, role, content, parent_id, used_ids, created_at
                 FROM messages WHERE room_session_id = ?1 ORDER BY rowid",
            )?;
            let mut rows = stmt.query([session_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?);
            }
            Ok(results)
        })
    }
}

impl MessageSink for MessageRepo {
    fn insert_message(&self, record: &MessageRecord) -> Result<MessageId, PersistenceError> {
        self.insert(record).map_err(PersistenceError::from)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<StoredMessage, StoreError> {
    const T: &str = "messages";
    let role: String = row_helpers::get(row, 3, T, "role")?;
    let session_id: String = row_helpers::get(row, 1, T, "room_session_id")?;
    let parent_id: Option<String> = row_helpers::get(row, 5, T, "parent_id")?;
    let used_ids: String = row_helpers::get(row, 6, T, "used_ids")?;
    Ok(StoredMessage {
        id: MessageId::from_raw(row_helpers::get::<String>(row, 0, T, "id")?),
        room_session_id: SessionId::from_raw(session_id),
        author: row_helpers::get(row, 2, T, "author")?,
        role: row_helpers::parse_enum(&role, T, "role")?,
        content: row_helpers::get(row, 4, T, "content")?,
        parent_id: parent_id.map(MessageId::from_raw),
        used_ids: row_helpers::parse_string_list(&used_ids, T, "used_ids")?
            .into_iter()
            .map(MessageId::from_raw)
            .collect(),
        created_at: row_helpers::get(row, 7, T, "created_at")?,
    })
}
