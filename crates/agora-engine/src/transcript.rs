//! Conversation export: channel history merged with role memory.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agora_core::messages::Message;

const SLUG_MAX_CHARS: usize = 50;
const MEMORY_ROLE: &str = "agent_memory";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    ChannelMessage,
    RoleMemory,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub timestamp: Option<DateTime<Utc>>,
    pub author: String,
    pub role: String,
    pub content: String,
    pub source: EntrySource,
    /// 1-based position within the owning role's memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_index: Option<usize>,
}

impl TranscriptEntry {
    fn from_channel(message: &Message) -> Self {
        Self {
            timestamp: Some(message.timestamp),
            author: message.author.clone(),
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
            source: EntrySource::ChannelMessage,
            memory_index: None,
        }
    }

    fn from_memory(role_name: &str, index: usize, message: &Message) -> Self {
        let content = format!(
            "--- Message {index} ---\nTimestamp: {}\nRole: {}\nAuthor: {}\nContent:\n{}\n",
            message.timestamp.to_rfc3339(),
            message.role,
            message.author,
            message.content,
        );
        Self {
            timestamp: None,
            author: role_name.to_string(),
            role: MEMORY_ROLE.to_string(),
            content,
            source: EntrySource::RoleMemory,
            memory_index: Some(index),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub topic: String,
    pub exported_at: DateTime<Utc>,
    pub entries: Vec<TranscriptEntry>,
}

impl Transcript {
    /// Merge the channel history with each role's memory. Entries are
    /// ordered by timestamp; memory entries carry none and come first, in
    /// role then memory order.
    pub fn collect(
        topic: &str,
        history: &[Message],
        memories: Vec<(String, Vec<Message>)>,
    ) -> Self {
        let mut entries: Vec<TranscriptEntry> =
            history.iter().map(TranscriptEntry::from_channel).collect();
        for (role_name, memory) in &memories {
            entries.extend(
                memory
                    .iter()
                    .enumerate()
                    .map(|(i, m)| TranscriptEntry::from_memory(role_name, i + 1, m)),
            );
        }
        entries.sort_by_key(|e| e.timestamp);

        Self {
            topic: topic.to_string(),
            exported_at: Utc::now(),
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `conversation_{topic-slug}_{YYYYmmdd_HHMMSS}.json`
    pub fn file_name(&self) -> String {
        format!(
            "conversation_{}_{}.json",
            topic_slug(&self.topic),
            self.exported_at.format("%Y%m%d_%H%M%S")
        )
    }

    /// Write pretty JSON into `dir`, creating it if needed.
    pub fn write_to(&self, dir: &Path) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }
}

fn topic_slug(topic: &str) -> String {
    let slug: String = topic
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .take(SLUG_MAX_CHARS)
        .collect();
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}
