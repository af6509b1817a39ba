use agora_core::ids::MessageId;
use agora_core::messages::{Message, Provenance, ReplyBatch};

use super::{prompts, PipelineCore, ORIENTADOR, VALIDATOR};

/// Runs the validator/moderator cascade on every message.
pub struct StandardPipeline {
    pub(crate) core: PipelineCore,
}

impl StandardPipeline {
    pub fn new(core: PipelineCore) -> Self {
        Self { core }
    }

    pub async fn handle_message(
        &mut self,
        author: &str,
        text: &str,
        message_id: MessageId,
    ) -> Vec<ReplyBatch> {
        let message = Message::user(prompts::sanitize_author(author), text);
        let replies = self.core.cascade(&message, VALIDATOR, ORIENTADOR).await;
        if replies.is_empty() {
            return Vec::new();
        }
        vec![ReplyBatch::new(
            replies,
            Provenance::Message {
                parent_id: message_id,
            },
        )]
    }
}
