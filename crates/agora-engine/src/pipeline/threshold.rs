use tracing::info;

use agora_core::ids::MessageId;
use agora_core::messages::{Message, Provenance, Reply, ReplyBatch};

use super::window::ThresholdCounter;
use super::{prompts, PipelineCore, CURATOR, ORIENTADOR, VALIDATOR};

/// Validator feedback on every message plus a curator review every
/// `window_size` messages.
pub struct ThresholdPipeline {
    pub(crate) core: PipelineCore,
    counter: ThresholdCounter,
}

impl ThresholdPipeline {
    pub fn new(core: PipelineCore, window_size: usize) -> Self {
        Self {
            core,
            counter: ThresholdCounter::new(window_size),
        }
    }

    pub fn pending_ids(&self) -> &[MessageId] {
        self.counter.ids()
    }

    pub async fn handle_message(
        &mut self,
        author: &str,
        text: &str,
        message_id: MessageId,
    ) -> Vec<ReplyBatch> {
        let message = Message::user(prompts::sanitize_author(author), text);
        // Curator and moderator follow the conversation; the validator
        // only sees what it is asked about.
        self.core.invoker().broadcast(&message).await;

        let mut batches = Vec::new();
        if let Some(validator) = self.core.role(VALIDATOR) {
            if let Some(reply) = self.core.invoker().call(validator, Some(&message)).await {
                batches.push(ReplyBatch::new(
                    vec![Reply::from_message(&reply)],
                    Provenance::Message {
                        parent_id: message_id.clone(),
                    },
                ));
            }
        }

        if let Some(used_ids) = self.counter.record(message_id) {
            info!(messages = used_ids.len(), "threshold review fired");
            let review = Message::system(prompts::HOST, prompts::threshold_review(&used_ids));
            let replies = self.core.cascade(&review, CURATOR, ORIENTADOR).await;
            if !replies.is_empty() {
                batches.push(ReplyBatch::new(replies, Provenance::Window { used_ids }));
            }
        }
        batches
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{Pipeline, PipelineKind};
    use super::*;
    use crate::mock::{MockReply, MockRoleFactory};

    fn pending(pipeline: &Pipeline) -> usize {
        match pipeline {
            Pipeline::Threshold(p) => p.pending_ids().len(),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn validator_replies_immediately() {
        let factory = MockRoleFactory::new().repeat(VALIDATOR, MockReply::text("warrant missing"));
        let mut pipeline = started(PipelineKind::Threshold, 3, &factory).await;

        let batches = pipeline.handle_message("ana", "claim", MessageId::from_raw("m1")).await;
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].replies, vec![Reply::new(VALIDATOR, "warrant missing")]);
        assert_eq!(batches[0].provenance.parent_id(), Some(&MessageId::from_raw("m1")));
        assert_eq!(pending(&pipeline), 1);
    }

    #[tokio::test]
    async fn review_fires_at_threshold_with_accumulated_ids() {
        let factory = MockRoleFactory::new();
        let mut pipeline = started(PipelineKind::Threshold, 3, &factory).await;

        for i in 1..=2 {
            let batches = pipeline
                .handle_message("ana", "x", MessageId::from_raw(format!("m{i}")))
                .await;
            assert_eq!(batches.len(), 1);
        }
        let batches = pipeline.handle_message("ana", "x", MessageId::from_raw("m3")).await;
        assert_eq!(batches.len(), 2);
        assert_eq!(
            batches[1].replies,
            vec![Reply::new(CURATOR, "Curator reply"), Reply::new(ORIENTADOR, "Orientador reply")]
        );
        assert_eq!(
            batches[1].provenance.used_ids(),
            &[MessageId::from_raw("m1"), MessageId::from_raw("m2"), MessageId::from_raw("m3")]
        );
        assert_eq!(pending(&pipeline), 0);

        let curator = factory.role(CURATOR).unwrap();
        let review = curator.inputs()[0].clone().unwrap();
        assert!(review.content.contains("(m1, m2, m3)"));
    }

    #[tokio::test]
    async fn validator_does_not_observe_the_room() {
        let factory = MockRoleFactory::new();
        let mut pipeline = started(PipelineKind::Threshold, 5, &factory).await;
        pipeline.handle_message("ana", "x", MessageId::new()).await;

        assert!(factory.role(VALIDATOR).unwrap().observed().is_empty());
        assert!(factory
            .role(CURATOR)
            .unwrap()
            .observed()
            .iter()
            .any(|m| m.content == "x"));
    }

    #[tokio::test]
    async fn silent_validator_still_counts() {
        let factory = MockRoleFactory::new().repeat(VALIDATOR, MockReply::Silent);
        let mut pipeline = started(PipelineKind::Threshold, 2, &factory).await;
        assert!(pipeline.handle_message("ana", "a", MessageId::new()).await.is_empty());
        let batches = pipeline.handle_message("ana", "b", MessageId::new()).await;
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].replies[0].role_name, CURATOR);
    }
}
