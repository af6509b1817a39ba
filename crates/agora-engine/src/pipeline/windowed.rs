use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use agora_core::ids::MessageId;
use agora_core::messages::{Message, Provenance, ReplyBatch};

use super::window::SlidingWindowBuffer;
use super::{prompts, PipelineCore, ORIENTADOR, VALIDATOR};

/// Receives the replies of a window cascade, which happen after the
/// triggering `handle_message` has nothing to return inline.
#[async_trait]
pub trait WindowListener: Send + Sync {
    async fn window_fired(&self, batch: ReplyBatch);
}

/// Accumulates messages and runs one cascade per full window.
pub struct WindowedPipeline {
    pub(crate) core: PipelineCore,
    buffer: SlidingWindowBuffer<(MessageId, Message)>,
    listener: Option<Arc<dyn WindowListener>>,
}

impl WindowedPipeline {
    pub fn new(core: PipelineCore, window_size: usize) -> Self {
        Self {
            core,
            buffer: SlidingWindowBuffer::new(window_size),
            listener: None,
        }
    }

    pub fn set_listener(&mut self, listener: Arc<dyn WindowListener>) {
        self.listener = Some(listener);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Buffer the message. Never replies inline; when the window becomes
    /// full its cascade result goes to the listener and the buffer is
    /// emptied.
    pub async fn handle_message(
        &mut self,
        author: &str,
        text: &str,
        message_id: MessageId,
    ) -> Vec<ReplyBatch> {
        let message = Message::user(prompts::sanitize_author(author), text);
        if !self.buffer.push((message_id, message)) {
            return Vec::new();
        }

        let (used_ids, messages): (Vec<MessageId>, Vec<Message>) =
            self.buffer.drain().into_iter().unzip();
        info!(window = used_ids.len(), "window fired");
        let summary = Message::system(prompts::HOST, prompts::window_summary(&messages));
        let replies = self.core.cascade(&summary, VALIDATOR, ORIENTADOR).await;
        let batch = ReplyBatch::new(replies, Provenance::Window { used_ids });

        match &self.listener {
            Some(listener) => listener.window_fired(batch).await,
            None => warn!(
                replies = batch.replies.len(),
                "window fired without a listener, dropping replies"
            ),
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use agora_core::messages::Reply;
    use parking_lot::Mutex;

    use super::super::test_support::*;
    use super::super::{Pipeline, PipelineKind};
    use super::*;
    use crate::mock::MockRoleFactory;

    #[derive(Default)]
    struct Collect(Mutex<Vec<ReplyBatch>>);

    #[async_trait]
    impl WindowListener for Collect {
        async fn window_fired(&self, batch: ReplyBatch) {
            self.0.lock().push(batch);
        }
    }

    async fn windowed(size: usize, factory: &MockRoleFactory) -> (Pipeline, Arc<Collect>) {
        let mut pipeline = started(PipelineKind::Windowed, size, factory).await;
        let collect = Arc::new(Collect::default());
        pipeline.set_window_listener(collect.clone());
        (pipeline, collect)
    }

    fn buffered(pipeline: &Pipeline) -> usize {
        match pipeline {
            Pipeline::Windowed(p) => p.buffered(),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn third_message_of_three_fires_cascade() {
        let factory = MockRoleFactory::new();
        let (mut pipeline, collect) = windowed(3, &factory).await;

        let messages = [("ana", "A"), ("luis", "B"), ("eva", "C")];
        for (i, (author, text)) in messages.into_iter().enumerate() {
            let inline = pipeline
                .handle_message(author, text, MessageId::from_raw(i.to_string()))
                .await;
            assert!(inline.is_empty());
            if i < 2 {
                assert!(collect.0.lock().is_empty());
            }
        }

        let fired = collect.0.lock().clone();
        assert_eq!(fired.len(), 1);
        assert_eq!(
            fired[0].replies,
            vec![
                Reply::new(VALIDATOR, "Validator reply"),
                Reply::new(ORIENTADOR, "Orientador reply")
            ]
        );
        assert_eq!(fired[0].provenance.used_ids().len(), 3);
        assert_eq!(buffered(&pipeline), 0);
    }

    #[tokio::test]
    async fn summary_lists_window_messages() {
        let factory = MockRoleFactory::new();
        let (mut pipeline, _collect) = windowed(2, &factory).await;
        pipeline.handle_message("ana", "solar is cheap", MessageId::new()).await;
        pipeline.handle_message("luis", "storage is not", MessageId::new()).await;

        let validator = factory.role(VALIDATOR).unwrap();
        let summary = validator.inputs()[0].clone().unwrap();
        assert!(summary.content.contains("- ana: solar is cheap"));
        assert!(summary.content.contains("- luis: storage is not"));
    }

    #[tokio::test]
    async fn sixth_message_starts_a_fresh_window() {
        let factory = MockRoleFactory::new();
        let (mut pipeline, collect) = windowed(5, &factory).await;

        for i in 0..7 {
            let id = MessageId::from_raw(format!("m{i}"));
            pipeline.handle_message("ana", &format!("m{i}"), id).await;
        }
        // window_size + 1 and + 2 do not fire again
        assert_eq!(collect.0.lock().len(), 1);
        assert_eq!(buffered(&pipeline), 2);

        for i in 7..10 {
            let id = MessageId::from_raw(format!("m{i}"));
            pipeline.handle_message("ana", &format!("m{i}"), id).await;
        }
        let fired = collect.0.lock().clone();
        assert_eq!(fired.len(), 2);
        let second: Vec<String> =
            fired[1].provenance.used_ids().iter().map(|id| id.to_string()).collect();
        assert_eq!(second, vec!["m5", "m6", "m7", "m8", "m9"]);
    }

    #[tokio::test]
    async fn no_listener_still_clears_window() {
        let factory = MockRoleFactory::new();
        let mut pipeline = started(PipelineKind::Windowed, 2, &factory).await;
        pipeline.handle_message("ana", "a", MessageId::new()).await;
        pipeline.handle_message("ana", "b", MessageId::new()).await;
        assert_eq!(buffered(&pipeline), 0);
        assert_eq!(factory.role(VALIDATOR).unwrap().call_count(), 1);
    }
}
