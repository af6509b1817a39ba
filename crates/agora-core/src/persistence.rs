use serde::{Deserialize, Serialize};

use crate::errors::PersistenceError;
use crate::ids::{MessageId, SessionId};
use crate::messages::{MessageRole, Provenance, Reply};

/// One row handed to storage for every delivered reply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub room_session_id: SessionId,
    pub author: String,
    pub role: MessageRole,
    pub content: String,
    pub parent_id: Option<MessageId>,
    pub used_ids: Vec<MessageId>,
}

impl MessageRecord {
    /// Build the record for a role reply, linking it to its source messages.
    pub fn for_reply(room_session_id: &SessionId, reply: &Reply, provenance: &Provenance) -> Self {
        Self {
            room_session_id: room_session_id.clone(),
            author: reply.role_name.clone(),
            role: MessageRole::Agent,
            content: reply.text.clone(),
            parent_id: provenance.parent_id().cloned(),
            used_ids: provenance.used_ids().to_vec(),
        }
    }
}

/// Storage collaborator. Called once per delivered reply; failures are
/// logged by the caller and never block delivery.
pub trait MessageSink: Send + Sync {
    fn insert_message(&self, record: &MessageRecord) -> Result<MessageId, PersistenceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_for_single_message_reply() {
        let session = SessionId::from_raw("sess_1");
        let reply = Reply::new("Validator", "claim lacks evidence");
        let provenance = Provenance::Message {
            parent_id: MessageId::from_raw("m1"),
        };
        let record = MessageRecord::for_reply(&session, &reply, &provenance);
        assert_eq!(record.author, "Validator");
        assert_eq!(record.role, MessageRole::Agent);
        assert_eq!(record.parent_id, Some(MessageId::from_raw("m1")));
        assert!(record.used_ids.is_empty());
    }

    #[test]
    fn record_for_window_reply() {
        let session = SessionId::from_raw("sess_1");
        let reply = Reply::new("Curator", "summary");
        let provenance = Provenance::Window {
            used_ids: vec![MessageId::from_raw("a"), MessageId::from_raw("b")],
        };
        let record = MessageRecord::for_reply(&session, &reply, &provenance);
        assert_eq!(record.parent_id, None);
        assert_eq!(record.used_ids, vec![MessageId::from_raw("a"), MessageId::from_raw("b")]);
    }
}
