use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use agora_core::errors::RoleError;
use agora_core::messages::Message;
use agora_core::role::RoleHandle;

use crate::channel::BroadcastChannel;
use crate::error::EngineError;

pub const DEFAULT_ROLE_TIMEOUT: Duration = Duration::from_secs(15);

/// Serializes and time-bounds every interaction with the roles of one
/// pipeline.
///
/// Each operation kind has its own lock: at most one `call`, one `observe`
/// and one `broadcast` are in flight at a time, but different kinds may
/// overlap. Failures never escape; they are logged and reported as
/// `None`/`false`.
pub struct RoleInvoker {
    timeout: Duration,
    call_lock: Mutex<()>,
    observe_lock: Mutex<()>,
    broadcast_lock: Mutex<()>,
    channel: RwLock<Option<Arc<BroadcastChannel>>>,
}

impl RoleInvoker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            call_lock: Mutex::new(()),
            observe_lock: Mutex::new(()),
            broadcast_lock: Mutex::new(()),
            channel: RwLock::new(None),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Attach a channel, replacing any previous one.
    pub fn attach(&self, channel: Arc<BroadcastChannel>) {
        *self.channel.write() = Some(channel);
    }

    /// Detach the current channel. Later broadcasts become no-ops.
    pub fn detach(&self) -> Option<Arc<BroadcastChannel>> {
        self.channel.write().take()
    }

    pub fn channel(&self) -> Option<Arc<BroadcastChannel>> {
        self.channel.read().clone()
    }

    /// Ask a role for a reply. `None` means timeout, failure or silence.
    pub async fn call(&self, role: &RoleHandle, input: Option<&Message>) -> Option<Message> {
        match self.try_call(role, input).await {
            Ok(reply) => reply,
            Err(e) => {
                log_failure("call", &e);
                None
            }
        }
    }

    /// Like [`call`](Self::call) but reports why no reply was produced.
    ///
    /// A reply is shared with the other participants of the attached
    /// channel once the call lock is released.
    pub async fn try_call(
        &self,
        role: &RoleHandle,
        input: Option<&Message>,
    ) -> Result<Option<Message>, EngineError> {
        let reply = {
            let _guard = self.call_lock.lock().await;
            bounded(self.timeout, role.role.respond(input))
                .await
                .map_err(|e| EngineError::from_role(&role.name, e))?
        };

        if let Some(ref message) = reply {
            if let Err(e) = self.fan_out(message, Some(&role.name)).await {
                log_failure("share", &e);
            }
        }
        Ok(reply)
    }

    /// Deliver a message to one role without asking for a reply.
    pub async fn observe(&self, role: &RoleHandle, message: &Message) -> bool {
        let result = {
            let _guard = self.observe_lock.lock().await;
            bounded(self.timeout, role.role.observe(message)).await
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                log_failure("observe", &EngineError::from_role(&role.name, e));
                false
            }
        }
    }

    /// Append a message to the attached channel and let every participant
    /// observe it. Returns false if no channel is attached.
    pub async fn broadcast(&self, message: &Message) -> bool {
        match self.fan_out(message, None).await {
            Ok(()) => true,
            Err(e) => {
                log_failure("broadcast", &e);
                false
            }
        }
    }

    async fn fan_out(&self, message: &Message, skip: Option<&str>) -> Result<(), EngineError> {
        let channel = self.channel().ok_or(EngineError::ChannelUnavailable)?;
        let _guard = self.broadcast_lock.lock().await;
        channel.append(message.clone());

        let deliver = async {
            for participant in channel.participants() {
                if skip == Some(participant.name.as_str()) {
                    continue;
                }
                self.observe(participant, message).await;
            }
        };
        tokio::time::timeout(self.timeout, deliver)
            .await
            .map_err(|_| EngineError::RoleTimeout {
                role: "broadcast".to_string(),
                timeout: self.timeout,
            })
    }
}

/// Run a role future under the timeout, converting panics into failures.
async fn bounded<T, F>(timeout: Duration, fut: F) -> Result<T, RoleError>
where
    F: Future<Output = Result<T, RoleError>>,
{
    match tokio::time::timeout(timeout, AssertUnwindSafe(fut).catch_unwind()).await {
        Ok(Ok(result)) => result,
        Ok(Err(_panic)) => Err(RoleError::Panicked),
        Err(_elapsed) => Err(RoleError::Timeout(timeout)),
    }
}

fn log_failure(op: &'static str, err: &EngineError) {
    match err {
        EngineError::RoleTimeout { role, timeout } => {
            warn!(op, role = %role, timeout_secs = timeout.as_secs(), "role operation timed out");
        }
        EngineError::ChannelUnavailable => {
            debug!(op, "no broadcast channel attached, skipping");
        }
        other => {
            error!(op, error = %other, kind = other.category(), "role operation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use agora_core::role::ModeratorRole;

    use super::*;
    use crate::mock::{MockReply, MockRole};

    fn handle(role: MockRole) -> (RoleHandle, Arc<MockRole>) {
        let role = Arc::new(role);
        let name = role.name().to_string();
        (RoleHandle::new(name, "", role.clone()), role)
    }

    #[tokio::test]
    async fn call_returns_reply() {
        let invoker = RoleInvoker::new(DEFAULT_ROLE_TIMEOUT);
        let (validator, _) = handle(MockRole::new("Validator", vec![MockReply::text("sound")]));
        let reply = invoker.call(&validator, Some(&Message::user("ana", "claim"))).await;
        assert_eq!(reply.map(|m| m.content).as_deref(), Some("sound"));
    }

    #[tokio::test(start_paused = true)]
    async fn call_times_out_to_none() {
        let invoker = RoleInvoker::new(Duration::from_secs(15));
        let (slow, _) = handle(MockRole::new("Validator", vec![MockReply::hang()]));

        let start = tokio::time::Instant::now();
        assert!(invoker.call(&slow, None).await.is_none());
        assert!(start.elapsed() >= Duration::from_secs(15));
        assert!(start.elapsed() < Duration::from_secs(16));
    }

    #[tokio::test(start_paused = true)]
    async fn try_call_reports_timeout_variant() {
        let invoker = RoleInvoker::new(Duration::from_secs(1));
        let (slow, _) = handle(MockRole::new("Curator", vec![MockReply::hang()]));
        let err = invoker.try_call(&slow, None).await.unwrap_err();
        assert!(matches!(err, EngineError::RoleTimeout { ref role, .. } if role == "Curator"));
    }

    #[tokio::test]
    async fn errors_and_panics_become_none() {
        let invoker = RoleInvoker::new(DEFAULT_ROLE_TIMEOUT);
        let (role, _) = handle(MockRole::new(
            "Validator",
            vec![MockReply::Error("gateway".into()), MockReply::Panic, MockReply::text("back")],
        ));
        assert!(invoker.call(&role, None).await.is_none());
        assert!(invoker.call(&role, None).await.is_none());
        assert_eq!(invoker.call(&role, None).await.map(|m| m.content).as_deref(), Some("back"));
    }

    #[tokio::test(start_paused = true)]
    async fn lock_released_after_timeout() {
        let invoker = RoleInvoker::new(Duration::from_secs(2));
        let script = vec![MockReply::hang(), MockReply::text("next")];
        let (role, _) = handle(MockRole::new("Validator", script));
        assert!(invoker.call(&role, None).await.is_none());
        assert!(invoker.call(&role, None).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn calls_do_not_overlap() {
        let invoker = Arc::new(RoleInvoker::new(DEFAULT_ROLE_TIMEOUT));
        let (role, _) = handle(MockRole::repeating(
            "Validator",
            MockReply::delayed(Duration::from_secs(3), MockReply::text("done")),
        ));

        let start = tokio::time::Instant::now();
        let a = {
            let invoker = invoker.clone();
            let role = role.clone();
            tokio::spawn(async move { invoker.call(&role, None).await })
        };
        let b = {
            let invoker = invoker.clone();
            let role = role.clone();
            tokio::spawn(async move { invoker.call(&role, None).await })
        };
        assert!(a.await.unwrap().is_some());
        assert!(b.await.unwrap().is_some());
        assert!(start.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn observe_and_call_may_overlap() {
        let invoker = Arc::new(RoleInvoker::new(DEFAULT_ROLE_TIMEOUT));
        let (caller, _) = handle(MockRole::repeating(
            "Validator",
            MockReply::delayed(Duration::from_secs(5), MockReply::text("done")),
        ));
        let (watcher, watcher_role) = handle(MockRole::new("Orientador", vec![]));

        let start = tokio::time::Instant::now();
        let call = {
            let invoker = invoker.clone();
            tokio::spawn(async move { invoker.call(&caller, None).await })
        };
        tokio::task::yield_now().await;
        assert!(invoker.observe(&watcher, &Message::user("ana", "hi")).await);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(watcher_role.observed().len(), 1);
        assert!(call.await.unwrap().is_some());
    }

    #[tokio::test]
    async fn observe_failure_is_false() {
        let invoker = RoleInvoker::new(DEFAULT_ROLE_TIMEOUT);
        let (role, mock) = handle(MockRole::new("Validator", vec![]));
        mock.fail_observe(true);
        assert!(!invoker.observe(&role, &Message::user("ana", "x")).await);
    }

    #[tokio::test]
    async fn broadcast_without_channel_is_noop() {
        let invoker = RoleInvoker::new(DEFAULT_ROLE_TIMEOUT);
        assert!(!invoker.broadcast(&Message::user("ana", "hello")).await);
    }

    #[tokio::test]
    async fn broadcast_appends_and_fans_out() {
        let invoker = RoleInvoker::new(DEFAULT_ROLE_TIMEOUT);
        let (validator, validator_role) = handle(MockRole::new("Validator", vec![]));
        let (orientador, orientador_role) = handle(MockRole::new("Orientador", vec![]));
        let channel = Arc::new(BroadcastChannel::new(vec![validator, orientador]));
        invoker.attach(channel.clone());

        assert!(invoker.broadcast(&Message::user("ana", "hello")).await);
        assert_eq!(channel.len(), 1);
        assert_eq!(validator_role.observed().len(), 1);
        assert_eq!(orientador_role.observed().len(), 1);

        invoker.detach();
        assert!(!invoker.broadcast(&Message::user("ana", "again")).await);
        assert_eq!(channel.len(), 1);
    }

    #[tokio::test]
    async fn replies_are_shared_with_other_participants() {
        let invoker = RoleInvoker::new(DEFAULT_ROLE_TIMEOUT);
        let (validator, validator_role) =
            handle(MockRole::new("Validator", vec![MockReply::text("verdict")]));
        let (orientador, orientador_role) = handle(MockRole::new("Orientador", vec![]));
        let channel = Arc::new(BroadcastChannel::new(vec![validator.clone(), orientador]));
        invoker.attach(channel.clone());

        invoker.call(&validator, None).await;
        assert_eq!(channel.history()[0].content, "verdict");
        assert_eq!(orientador_role.observed()[0].content, "verdict");
        assert!(validator_role.observed().is_empty());
    }
}
