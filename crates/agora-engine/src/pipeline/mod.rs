//! Pipelines decide which roles run for each room event.
//!
//! Three variants share one surface ([`Pipeline`]): `Standard` runs a
//! validator/moderator cascade on every message, `Windowed` runs it once per
//! full window of messages, and `Threshold` answers every message with the
//! validator and periodically runs a curator/moderator review. Session
//! events (start, mention, milestone, inactivity) are handled the same way
//! by all of them through [`PipelineCore`].

mod cascade;
pub mod prompts;
mod standard;
mod threshold;
mod window;
mod windowed;

pub use cascade::{evaluate_cascade, ContinuationPredicate, RoleMentionPredicate};
pub use standard::StandardPipeline;
pub use threshold::ThresholdPipeline;
pub use window::{SlidingWindowBuffer, ThresholdCounter};
pub use windowed::{WindowListener, WindowedPipeline};

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use agora_core::ids::MessageId;
use agora_core::messages::{Message, Reply, ReplyBatch};
use agora_core::role::{RoleFactory, RoleHandle};

use crate::channel::BroadcastChannel;
use crate::config::SessionConfig;
use crate::invoker::RoleInvoker;
use prompts::{HOST, TIMER};

pub const VALIDATOR: &str = "Validator";
pub const CURATOR: &str = "Curator";
pub const ORIENTADOR: &str = "Orientador";

/// Registered pipeline variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    Standard,
    Windowed,
    Threshold,
}

const REGISTERED: &[(&str, PipelineKind)] = &[
    ("standard", PipelineKind::Standard),
    ("abogado del diablo", PipelineKind::Standard),
    ("devils-advocate", PipelineKind::Standard),
    ("windowed", PipelineKind::Windowed),
    ("threshold", PipelineKind::Threshold),
    ("toulmin", PipelineKind::Threshold),
];

impl PipelineKind {
    /// Resolve a configured pipeline name. Unknown names fall back to
    /// `Standard`.
    pub fn from_name(name: &str) -> Self {
        let wanted = name.trim().to_lowercase();
        match REGISTERED.iter().find(|(n, _)| *n == wanted) {
            Some((_, kind)) => *kind,
            None => {
                warn!(pipeline = %name, "unknown pipeline, using standard");
                Self::Standard
            }
        }
    }

    pub fn registered_names() -> Vec<&'static str> {
        REGISTERED.iter().map(|(n, _)| *n).collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Windowed => "windowed",
            Self::Threshold => "threshold",
        }
    }

    /// Roles created for this variant, in creation order.
    pub fn role_names(&self) -> &'static [&'static str] {
        match self {
            Self::Standard | Self::Windowed => &[VALIDATOR, ORIENTADOR],
            Self::Threshold => &[VALIDATOR, CURATOR, ORIENTADOR],
        }
    }

    /// Roles attached to the broadcast channel. The threshold validator
    /// answers privately.
    pub fn participant_names(&self) -> &'static [&'static str] {
        match self {
            Self::Standard | Self::Windowed => &[VALIDATOR, ORIENTADOR],
            Self::Threshold => &[CURATOR, ORIENTADOR],
        }
    }
}

impl std::fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State and behavior shared by every variant.
pub struct PipelineCore {
    invoker: Arc<RoleInvoker>,
    roles: Vec<RoleHandle>,
    participants: Vec<RoleHandle>,
    predicate: Arc<dyn ContinuationPredicate>,
    topic: String,
}

impl PipelineCore {
    pub fn new(
        invoker: Arc<RoleInvoker>,
        roles: Vec<RoleHandle>,
        participant_names: &[&str],
        predicate: Arc<dyn ContinuationPredicate>,
    ) -> Self {
        let participants = roles
            .iter()
            .filter(|r| participant_names.contains(&r.name.as_str()))
            .cloned()
            .collect();
        Self {
            invoker,
            roles,
            participants,
            predicate,
            topic: String::new(),
        }
    }

    pub fn invoker(&self) -> &Arc<RoleInvoker> {
        &self.invoker
    }

    pub fn roles(&self) -> &[RoleHandle] {
        &self.roles
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn role(&self, name: &str) -> Option<&RoleHandle> {
        self.roles.iter().find(|r| r.name == name)
    }

    /// Open the session: attach a fresh channel, announce the context and
    /// let the moderator open the discussion.
    pub async fn start(
        &mut self,
        topic: &str,
        participants: &[String],
        language: &str,
    ) -> Vec<Reply> {
        self.topic = topic.to_string();
        self.invoker
            .attach(Arc::new(BroadcastChannel::new(self.participants.clone())));

        let context = prompts::session_context(topic, participants, language);
        self.invoker.broadcast(&Message::system(HOST, context)).await;

        let Some(orientador) = self.role(ORIENTADOR) else {
            return Vec::new();
        };
        self.invoker
            .broadcast(&Message::system(HOST, prompts::OPENING_INSTRUCTION))
            .await;
        self.invoker
            .call(orientador, None)
            .await
            .map(|m| vec![Reply::from_message(&m)])
            .unwrap_or_default()
    }

    /// Address the moderator directly, bypassing any gating.
    pub async fn handle_mention(&self, author: &str, text: &str) -> Vec<Reply> {
        let message = Message::user(prompts::sanitize_author(author), text);
        self.invoker.broadcast(&message).await;

        let Some(orientador) = self.role(ORIENTADOR) else {
            return Vec::new();
        };
        self.invoker
            .call(orientador, Some(&message))
            .await
            .map(|m| vec![Reply::from_message(&m)])
            .unwrap_or_default()
    }

    pub async fn handle_milestone(
        &self,
        pct: u8,
        base_text: &str,
        elapsed: Duration,
        remaining: Duration,
    ) -> Vec<Reply> {
        info!(pct, "milestone reached");
        let instruction = prompts::milestone_instruction(pct, base_text, elapsed, remaining);
        self.instruct_moderator(instruction, base_text).await
    }

    pub async fn handle_inactivity(&self) -> Vec<Reply> {
        info!("inactivity detected");
        self.instruct_moderator(
            prompts::INACTIVITY_INSTRUCTION.to_string(),
            prompts::INACTIVITY_FALLBACK,
        )
        .await
    }

    /// Broadcast a time update to every participant.
    pub async fn announce_time(&self, elapsed: Duration, remaining: Duration) -> bool {
        self.invoker
            .broadcast(&Message::system(TIMER, prompts::time_update(elapsed, remaining)))
            .await
    }

    /// Detach the channel; returns it for final export.
    pub fn close(&self) -> Option<Arc<BroadcastChannel>> {
        self.invoker.detach()
    }

    pub(crate) async fn cascade(&self, message: &Message, first: &str, second: &str) -> Vec<Reply> {
        let (Some(first), Some(second)) = (self.role(first), self.role(second)) else {
            warn!(first, second, "cascade role missing");
            return Vec::new();
        };
        evaluate_cascade(&self.invoker, self.predicate.as_ref(), message, first, second).await
    }

    async fn instruct_moderator(&self, instruction: String, fallback: &str) -> Vec<Reply> {
        self.invoker.broadcast(&Message::system(HOST, instruction)).await;
        let reply = match self.role(ORIENTADOR) {
            Some(orientador) => self.invoker.call(orientador, None).await,
            None => None,
        };
        let text = reply.map(|m| m.content).unwrap_or_else(|| fallback.to_string());
        vec![Reply::new(ORIENTADOR, text)]
    }
}

/// A room pipeline, selected by configuration when the session is created.
pub enum Pipeline {
    Standard(StandardPipeline),
    Windowed(WindowedPipeline),
    Threshold(ThresholdPipeline),
}

impl Pipeline {
    pub fn build(
        config: &SessionConfig,
        topic: &str,
        factory: &dyn RoleFactory,
        predicate: Arc<dyn ContinuationPredicate>,
    ) -> Self {
        let kind = config.pipeline;
        let invoker = Arc::new(RoleInvoker::new(config.role_timeout));
        let roles = kind
            .role_names()
            .iter()
            .map(|name| RoleHandle::create(factory, name, &config.prompt_for(name, topic)))
            .collect();
        let core = PipelineCore::new(invoker, roles, kind.participant_names(), predicate);

        match kind {
            PipelineKind::Standard => Self::Standard(StandardPipeline::new(core)),
            PipelineKind::Windowed => {
                Self::Windowed(WindowedPipeline::new(core, config.window_size))
            }
            PipelineKind::Threshold => {
                Self::Threshold(ThresholdPipeline::new(core, config.window_size))
            }
        }
    }

    pub fn kind(&self) -> PipelineKind {
        match self {
            Self::Standard(_) => PipelineKind::Standard,
            Self::Windowed(_) => PipelineKind::Windowed,
            Self::Threshold(_) => PipelineKind::Threshold,
        }
    }

    pub fn core(&self) -> &PipelineCore {
        match self {
            Self::Standard(p) => &p.core,
            Self::Windowed(p) => &p.core,
            Self::Threshold(p) => &p.core,
        }
    }

    fn core_mut(&mut self) -> &mut PipelineCore {
        match self {
            Self::Standard(p) => &mut p.core,
            Self::Windowed(p) => &mut p.core,
            Self::Threshold(p) => &mut p.core,
        }
    }

    /// Register where windowed results go. Other variants reply inline and
    /// ignore it.
    pub fn set_window_listener(&mut self, listener: Arc<dyn WindowListener>) {
        if let Self::Windowed(p) = self {
            p.set_listener(listener);
        }
    }

    pub async fn start(
        &mut self,
        topic: &str,
        participants: &[String],
        language: &str,
    ) -> Vec<Reply> {
        self.core_mut().start(topic, participants, language).await
    }

    /// Process one user message. Returns the batches to deliver now; a
    /// windowed pipeline returns none and reports through its listener.
    pub async fn handle_message(
        &mut self,
        author: &str,
        text: &str,
        message_id: MessageId,
    ) -> Vec<ReplyBatch> {
        match self {
            Self::Standard(p) => p.handle_message(author, text, message_id).await,
            Self::Windowed(p) => p.handle_message(author, text, message_id).await,
            Self::Threshold(p) => p.handle_message(author, text, message_id).await,
        }
    }

    pub async fn handle_mention(&self, author: &str, text: &str) -> Vec<Reply> {
        self.core().handle_mention(author, text).await
    }

    pub async fn handle_milestone(
        &self,
        pct: u8,
        base_text: &str,
        elapsed: Duration,
        remaining: Duration,
    ) -> Vec<Reply> {
        self.core().handle_milestone(pct, base_text, elapsed, remaining).await
    }

    pub async fn handle_inactivity(&self) -> Vec<Reply> {
        self.core().handle_inactivity().await
    }

    pub async fn announce_time(&self, elapsed: Duration, remaining: Duration) -> bool {
        self.core().announce_time(elapsed, remaining).await
    }
}
