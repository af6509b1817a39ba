use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::RoleError;
use crate::messages::Message;

/// An automated moderator participant.
///
/// The engine treats a role as an opaque, possibly slow and unreliable
/// capability. Implementations keep whatever memory they need; the engine
/// only reads it back through [`ModeratorRole::memory`] for transcripts.
#[async_trait]
pub trait ModeratorRole: Send + Sync {
    fn name(&self) -> &str;

    /// Produce a reply. `None` input means "continue from what you have seen".
    /// `Ok(None)` is a legitimate "nothing to say".
    async fn respond(&self, input: Option<&Message>) -> Result<Option<Message>, RoleError>;

    /// Take note of a message without replying.
    async fn observe(&self, message: &Message) -> Result<(), RoleError>;

    /// Messages the role has accumulated internally, oldest first.
    async fn memory(&self) -> Vec<Message> {
        Vec::new()
    }
}

/// Builds role instances for a session from a name and a system prompt.
pub trait RoleFactory: Send + Sync {
    fn create(&self, name: &str, system_prompt: &str) -> Arc<dyn ModeratorRole>;
}

/// A role bound to the prompt it was created with.
#[derive(Clone)]
pub struct RoleHandle {
    pub name: String,
    pub system_prompt: String,
    pub role: Arc<dyn ModeratorRole>,
}

impl RoleHandle {
    pub fn new(
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        role: Arc<dyn ModeratorRole>,
    ) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            role,
        }
    }

    pub fn create(factory: &dyn RoleFactory, name: &str, system_prompt: &str) -> Self {
        Self::new(name, system_prompt, factory.create(name, system_prompt))
    }
}

impl fmt::Debug for RoleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoleHandle")
            .field("name", &self.name)
            .field("system_prompt_len", &self.system_prompt.len())
            .finish()
    }
}
