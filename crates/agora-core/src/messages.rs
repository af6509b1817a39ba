use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::MessageId;

/// Who produced a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    System,
    Agent,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::System => "system",
            Self::Agent => "agent",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "system" => Ok(Self::System),
            "agent" => Ok(Self::Agent),
            other => Err(format!("unknown message role: {other}")),
        }
    }
}

/// A single immutable entry in a room conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub author: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(author: impl Into<String>, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(author, MessageRole::User, content)
    }

    pub fn system(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(author, MessageRole::System, content)
    }

    pub fn agent(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(author, MessageRole::Agent, content)
    }
}

/// Text produced by one moderator role for one turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub role_name: String,
    pub text: String,
}

impl Reply {
    pub fn new(role_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role_name: role_name.into(),
            text: text.into(),
        }
    }

    pub fn from_message(message: &Message) -> Self {
        Self::new(message.author.clone(), message.content.clone())
    }
}

/// What a batch of replies was produced from. Persistence links replies back
/// to their source messages through this.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Provenance {
    /// A reply to one user message.
    Message { parent_id: MessageId },
    /// A reply to an accumulated window of user messages.
    Window { used_ids: Vec<MessageId> },
    /// A reply to a session event (start, mention, milestone, inactivity).
    Event,
}

impl Provenance {
    pub fn parent_id(&self) -> Option<&MessageId> {
        match self {
            Self::Message { parent_id } => Some(parent_id),
            _ => None,
        }
    }

    pub fn used_ids(&self) -> &[MessageId] {
        match self {
            Self::Window { used_ids } => used_ids,
            _ => &[],
        }
    }
}

/// Replies produced together by one pipeline operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyBatch {
    pub replies: Vec<Reply>,
    pub provenance: Provenance,
}

impl ReplyBatch {
    pub fn new(replies: Vec<Reply>, provenance: Provenance) -> Self {
        Self {
            replies,
            provenance,
        }
    }

    pub fn event(replies: Vec<Reply>) -> Self {
        Self::new(replies, Provenance::Event)
    }

    pub fn is_empty(&self) -> bool {
        self.replies.is_empty()
    }
}
