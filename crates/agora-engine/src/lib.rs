pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod invoker;
pub mod pipeline;
pub mod queue;
pub mod registry;
pub mod room;
pub mod timer;
pub mod transcript;

pub mod mock;

pub use config::SessionConfig;
pub use error::EngineError;
pub use events::{ChannelTransport, RoomEnvelope};
pub use pipeline::{ContinuationPredicate, Pipeline, PipelineKind, RoleMentionPredicate};
pub use registry::RoomRegistry;
pub use room::{RoomSession, SessionDeps, SessionRequest};
pub use timer::TimerSnapshot;
pub use transcript::Transcript;
