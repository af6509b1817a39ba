//! One moderated room: its pipeline, queue, clock and delivery path.
//!
//! Every event that can touch the pipeline (start, user message, mention,
//! timer tick) goes through the room's [`MessageQueue`]. The queue's
//! consumer, [`RoomWorker`], owns the [`Pipeline`] outright, so pipeline
//! state has exactly one writer and cascades from different events never
//! interleave.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use agora_core::ids::{MessageId, RoomId, SessionId};
use agora_core::messages::{Reply, ReplyBatch};
use agora_core::persistence::{MessageRecord, MessageSink};
use agora_core::role::{RoleFactory, RoleHandle};
use agora_core::transport::{RoomEvent, Transport};

use crate::channel::BroadcastChannel;
use crate::config::SessionConfig;
use crate::error::EngineError;
use crate::invoker::RoleInvoker;
use crate::pipeline::{prompts, ContinuationPredicate, Pipeline, PipelineKind, WindowListener};
use crate::queue::{MessageQueue, QueueDispatcher};
use crate::timer::{ActivityFlag, SessionTimer, TickHandler, TimerSnapshot, TimerStatus, TimerTick};
use crate::transcript::Transcript;

/// External collaborators shared by every room.
#[derive(Clone)]
pub struct SessionDeps {
    pub factory: Arc<dyn RoleFactory>,
    pub predicate: Arc<dyn ContinuationPredicate>,
    pub persistence: Arc<dyn MessageSink>,
    pub transport: Arc<dyn Transport>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionRequest {
    pub topic: String,
    pub participants: Vec<String>,
    pub language: String,
}

impl SessionRequest {
    pub fn new(
        topic: impl Into<String>,
        participants: Vec<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            participants,
            language: language.into(),
        }
    }
}

pub(crate) enum RoomItem {
    Start {
        request: SessionRequest,
        reply: oneshot::Sender<Vec<Reply>>,
    },
    Message {
        author: String,
        text: String,
        message_id: MessageId,
    },
    Mention {
        author: String,
        text: String,
        reply: Option<oneshot::Sender<Vec<Reply>>>,
    },
    Tick(TimerTick),
}

/// Persists and emits replies. Once the room is stopped, late replies are
/// dropped.
struct Delivery {
    room_id: RoomId,
    session_id: SessionId,
    persistence: Arc<dyn MessageSink>,
    transport: Arc<dyn Transport>,
    stopped: CancellationToken,
}

impl Delivery {
    async fn deliver(&self, batch: ReplyBatch) -> Vec<Reply> {
        if batch.is_empty() {
            return Vec::new();
        }
        if self.stopped.is_cancelled() {
            debug!(
                room = %self.room_id,
                replies = batch.replies.len(),
                "session stopped, discarding late replies"
            );
            return Vec::new();
        }

        for reply in &batch.replies {
            let record = MessageRecord::for_reply(&self.session_id, reply, &batch.provenance);
            if let Err(e) = self.persistence.insert_message(&record) {
                let failure = EngineError::PersistenceFailure(e);
                error!(
                    room = %self.room_id,
                    role = %reply.role_name,
                    error = %failure,
                    "failed to persist reply"
                );
            }
        }
        let event = RoomEvent::Evaluation {
            replies: batch.replies.clone(),
        };
        if let Err(e) = self.transport.emit(&self.room_id, event).await {
            warn!(room = %self.room_id, error = %e, "failed to emit replies");
        }
        batch.replies
    }

    async fn emit_timer(&self, snapshot: TimerSnapshot) {
        if self.stopped.is_cancelled() {
            debug!(room = %self.room_id, "timer update after stop discarded");
            return;
        }
        let event = RoomEvent::TimerUpdate {
            elapsed: snapshot.elapsed,
            remaining: snapshot.remaining,
        };
        if let Err(e) = self.transport.emit(&self.room_id, event).await {
            debug!(room = %self.room_id, error = %e, "timer update not delivered");
        }
    }
}

#[async_trait]
impl WindowListener for Delivery {
    async fn window_fired(&self, batch: ReplyBatch) {
        self.deliver(batch).await;
    }
}

/// Queue consumer. Sole owner of the room's pipeline.
struct RoomWorker {
    pipeline: Pipeline,
    delivery: Arc<Delivery>,
}

impl RoomWorker {
    async fn on_tick(&mut self, tick: TimerTick) {
        for pct in &tick.milestones {
            let base = prompts::milestone_base_text(*pct);
            let replies = self
                .pipeline
                .handle_milestone(*pct, &base, tick.elapsed, tick.remaining)
                .await;
            self.delivery.deliver(ReplyBatch::event(replies)).await;
        }

        self.pipeline.announce_time(tick.elapsed, tick.remaining).await;

        if tick.inactive {
            let replies = self.pipeline.handle_inactivity().await;
            self.delivery.deliver(ReplyBatch::event(replies)).await;
        }
    }
}

#[async_trait]
impl QueueDispatcher<RoomItem> for RoomWorker {
    async fn dispatch(&mut self, item: RoomItem) -> Result<(), EngineError> {
        if self.delivery.stopped.is_cancelled() {
            debug!(room = %self.delivery.room_id, "session stopped, skipping queued item");
            return Ok(());
        }
        match item {
            RoomItem::Start { request, reply } => {
                let replies = self
                    .pipeline
                    .start(&request.topic, &request.participants, &request.language)
                    .await;
                let delivered = self.delivery.deliver(ReplyBatch::event(replies)).await;
                let _ = reply.send(delivered);
            }
            RoomItem::Message {
                author,
                text,
                message_id,
            } => {
                for batch in self.pipeline.handle_message(&author, &text, message_id).await {
                    self.delivery.deliver(batch).await;
                }
            }
            RoomItem::Mention { author, text, reply } => {
                let replies = self.pipeline.handle_mention(&author, &text).await;
                let delivered = self.delivery.deliver(ReplyBatch::event(replies)).await;
                if let Some(reply) = reply {
                    let _ = reply.send(delivered);
                }
            }
            RoomItem::Tick(tick) => self.on_tick(tick).await,
        }
        Ok(())
    }
}

/// Timer side: pushes `timer_update` straight to the transport and queues
/// the tick for the pipeline.
struct RoomClock {
    delivery: Arc<Delivery>,
    queue: Arc<MessageQueue<RoomItem>>,
}

#[async_trait]
impl TickHandler for RoomClock {
    async fn on_tick(&self, tick: TimerTick) {
        if self.delivery.stopped.is_cancelled() {
            return;
        }
        self.delivery
            .emit_timer(TimerSnapshot::new(tick.elapsed, tick.remaining))
            .await;
        if let Err(e) = self.queue.enqueue(RoomItem::Tick(tick)).await {
            debug!(room = %self.delivery.room_id, error = %e, "tick not queued");
        }
    }
}

/// A single active session in a room.
pub struct RoomSession {
    room_id: RoomId,
    session_id: SessionId,
    request: SessionRequest,
    kind: PipelineKind,
    config: SessionConfig,
    invoker: Arc<RoleInvoker>,
    roles: Vec<RoleHandle>,
    queue: Arc<MessageQueue<RoomItem>>,
    timer: SessionTimer,
    activity: ActivityFlag,
    delivery: Arc<Delivery>,
    started: AtomicBool,
    closed_channel: Mutex<Option<Arc<BroadcastChannel>>>,
}

impl RoomSession {
    /// Build the pipeline and spawn the room's queue consumer. Must run
    /// inside a tokio runtime. Nothing is sent to the roles until
    /// [`start_session`](Self::start_session).
    pub fn open(
        room_id: RoomId,
        session_id: SessionId,
        request: SessionRequest,
        config: SessionConfig,
        deps: &SessionDeps,
    ) -> Self {
        let mut pipeline = Pipeline::build(
            &config,
            &request.topic,
            deps.factory.as_ref(),
            deps.predicate.clone(),
        );
        let kind = pipeline.kind();
        let invoker = pipeline.core().invoker().clone();
        let roles = pipeline.core().roles().to_vec();

        let delivery = Arc::new(Delivery {
            room_id: room_id.clone(),
            session_id: session_id.clone(),
            persistence: deps.persistence.clone(),
            transport: deps.transport.clone(),
            stopped: CancellationToken::new(),
        });
        pipeline.set_window_listener(delivery.clone());

        let worker = RoomWorker {
            pipeline,
            delivery: delivery.clone(),
        };
        let queue = Arc::new(MessageQueue::spawn(config.queue_capacity, worker, room_id.as_str()));
        info!(room = %room_id, session = %session_id, pipeline = %kind, "room opened");

        Self {
            room_id,
            session_id,
            request,
            kind,
            config,
            invoker,
            roles,
            queue,
            timer: SessionTimer::new(),
            activity: ActivityFlag::new(),
            delivery,
            started: AtomicBool::new(false),
            closed_channel: Mutex::new(None),
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn topic(&self) -> &str {
        &self.request.topic
    }

    pub fn pipeline_kind(&self) -> PipelineKind {
        self.kind
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_stopped(&self) -> bool {
        self.delivery.stopped.is_cancelled()
    }

    pub fn pending(&self) -> u64 {
        self.queue.pending()
    }

    /// Announce the session, collect the moderator's opening and start the
    /// clock. Returns the opening replies.
    pub async fn start_session(&self) -> Result<Vec<Reply>, EngineError> {
        if self.is_stopped() {
            return Err(EngineError::SessionStopped);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(EngineError::TimerAlreadyStarted);
        }

        let (tx, rx) = oneshot::channel();
        self.queue
            .enqueue(RoomItem::Start {
                request: self.request.clone(),
                reply: tx,
            })
            .await?;
        let replies = rx.await.map_err(|_| EngineError::SessionStopped)?;
        if self.is_stopped() {
            return Err(EngineError::SessionStopped);
        }

        self.delivery
            .emit_timer(TimerSnapshot::new(Duration::ZERO, self.config.duration))
            .await;
        let clock = Arc::new(RoomClock {
            delivery: self.delivery.clone(),
            queue: self.queue.clone(),
        });
        self.timer.start(
            self.config.duration,
            self.config.tick_interval,
            self.activity.clone(),
            clock,
        )?;
        info!(room = %self.room_id, topic = %self.request.topic, "session started");
        Ok(replies)
    }

    /// Queue a user message. Messages addressing the moderator take the
    /// mention path. Waits while the queue is full.
    pub async fn enqueue_message(
        &self,
        author: &str,
        text: &str,
        message_id: MessageId,
    ) -> Result<(), EngineError> {
        if self.is_stopped() {
            return Err(EngineError::SessionStopped);
        }
        self.activity.mark();
        let item = if prompts::is_mention(text) {
            RoomItem::Mention {
                author: author.to_string(),
                text: text.to_string(),
                reply: None,
            }
        } else {
            RoomItem::Message {
                author: author.to_string(),
                text: text.to_string(),
                message_id,
            }
        };
        self.queue.enqueue(item).await
    }

    /// Address the moderator directly and wait for its answer. The replies
    /// are also persisted and emitted like any other.
    pub async fn mention(&self, author: &str, text: &str) -> Result<Vec<Reply>, EngineError> {
        if self.is_stopped() {
            return Err(EngineError::SessionStopped);
        }
        self.activity.mark();
        let (tx, rx) = oneshot::channel();
        self.queue
            .enqueue(RoomItem::Mention {
                author: author.to_string(),
                text: text.to_string(),
                reply: Some(tx),
            })
            .await?;
        rx.await.map_err(|_| EngineError::SessionStopped)
    }

    pub fn get_timer_state(&self) -> TimerSnapshot {
        match self.timer.status() {
            TimerStatus::Idle => TimerSnapshot::new(Duration::ZERO, self.config.duration),
            _ => self.timer.snapshot(),
        }
    }

    /// Channel history plus every role's memory, oldest first.
    pub async fn export_transcript(&self) -> Transcript {
        let channel = self.invoker.channel().or_else(|| self.closed_channel.lock().clone());
        let history = channel.map(|c| c.history()).unwrap_or_default();
        let mut memories = Vec::with_capacity(self.roles.len());
        for role in &self.roles {
            match tokio::time::timeout(self.invoker.timeout(), role.role.memory()).await {
                Ok(memory) => memories.push((role.name.clone(), memory)),
                Err(_) => warn!(room = %self.room_id, role = %role.name, "role memory timed out"),
            }
        }
        Transcript::collect(&self.request.topic, &history, memories)
    }

    /// Stop the clock, export the transcript and detach the channel.
    /// Queued items are skipped; replies still in flight are discarded.
    pub async fn stop_session(&self) -> Result<Transcript, EngineError> {
        if self.is_stopped() {
            return Err(EngineError::SessionStopped);
        }
        self.delivery.stopped.cancel();
        self.timer.stop();

        let transcript = self.export_transcript().await;
        if let Some(dir) = &self.config.transcript_dir {
            match transcript.write_to(dir) {
                Ok(path) => info!(room = %self.room_id, path = %path.display(), "transcript saved"),
                Err(e) => error!(room = %self.room_id, error = %e, "failed to save transcript"),
            }
        }

        *self.closed_channel.lock() = self.invoker.detach();
        self.queue.shutdown();
        info!(room = %self.room_id, entries = transcript.len(), "session stopped");
        Ok(transcript)
    }

    /// Resolve once everything queued so far has been processed.
    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await;
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        self.delivery.stopped.cancel();
        self.timer.stop();
        self.queue.shutdown();
    }
}
