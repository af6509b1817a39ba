//! Scripted stand-ins for the external collaborators, for deterministic
//! testing without a model backend or a database.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use agora_core::errors::{PersistenceError, RoleError};
use agora_core::ids::MessageId;
use agora_core::messages::Message;
use agora_core::persistence::{MessageRecord, MessageSink};
use agora_core::role::{ModeratorRole, RoleFactory};

/// Pre-programmed outcome of one `respond` call.
#[derive(Clone, Debug)]
pub enum MockReply {
    /// Reply with this text.
    Text(String),
    /// Reply with nothing.
    Silent,
    /// Fail with a role error.
    Error(String),
    /// Panic inside the role future.
    Panic,
    /// Wait a duration, then resolve the inner reply.
    Delay(Duration, Box<MockReply>),
}

impl MockReply {
    pub fn text(text: &str) -> Self {
        Self::Text(text.to_string())
    }

    pub fn delayed(delay: Duration, inner: MockReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }

    /// A reply that never arrives within any sane timeout.
    pub fn hang() -> Self {
        Self::delayed(Duration::from_secs(24 * 3600), Self::Silent)
    }
}

/// Role that answers from a script, then from an optional repeating reply.
pub struct MockRole {
    name: String,
    script: Mutex<VecDeque<MockReply>>,
    repeat: Option<MockReply>,
    fail_observe: AtomicBool,
    stall_memory: AtomicBool,
    call_count: AtomicUsize,
    inputs: Mutex<Vec<Option<Message>>>,
    observed: Mutex<Vec<Message>>,
    memory: Mutex<Vec<Message>>,
}

impl MockRole {
    pub fn new(name: &str, script: Vec<MockReply>) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(script.into()),
            repeat: None,
            fail_observe: AtomicBool::new(false),
            stall_memory: AtomicBool::new(false),
            call_count: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
            observed: Mutex::new(Vec::new()),
            memory: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call with the same reply.
    pub fn repeating(name: &str, reply: MockReply) -> Self {
        Self {
            repeat: Some(reply),
            ..Self::new(name, Vec::new())
        }
    }

    pub fn fail_observe(&self, fail: bool) {
        self.fail_observe.store(fail, Ordering::Relaxed);
    }

    /// Make `memory` never resolve.
    pub fn stall_memory(&self, stall: bool) {
        self.stall_memory.store(stall, Ordering::Relaxed);
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Inputs received by `respond`, in call order.
    pub fn inputs(&self) -> Vec<Option<Message>> {
        self.inputs.lock().clone()
    }

    /// Messages received by `observe`, in order.
    pub fn observed(&self) -> Vec<Message> {
        self.observed.lock().clone()
    }

    fn next_reply(&self) -> Option<MockReply> {
        self.script.lock().pop_front().or_else(|| self.repeat.clone())
    }
}

#[async_trait]
impl ModeratorRole for MockRole {
    fn name(&self) -> &str {
        &self.name
    }

    async fn respond(&self, input: Option<&Message>) -> Result<Option<Message>, RoleError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.inputs.lock().push(input.cloned());
        if let Some(msg) = input {
            self.memory.lock().push(msg.clone());
        }

        let mut current = self.next_reply().ok_or_else(|| {
            RoleError::Failure(format!(
                "MockRole {}: no reply configured for call {idx}",
                self.name
            ))
        })?;
        loop {
            match current {
                MockReply::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    current = *inner;
                }
                MockReply::Text(text) => {
                    let reply = Message::agent(self.name.clone(), text);
                    self.memory.lock().push(reply.clone());
                    return Ok(Some(reply));
                }
                MockReply::Silent => return Ok(None),
                MockReply::Error(cause) => return Err(RoleError::Failure(cause)),
                MockReply::Panic => panic!("MockRole {}: scripted panic", self.name),
            }
        }
    }

    async fn observe(&self, message: &Message) -> Result<(), RoleError> {
        if self.fail_observe.load(Ordering::Relaxed) {
            return Err(RoleError::Failure("observe rejected".into()));
        }
        self.observed.lock().push(message.clone());
        self.memory.lock().push(message.clone());
        Ok(())
    }

    async fn memory(&self) -> Vec<Message> {
        if self.stall_memory.load(Ordering::Relaxed) {
            std::future::pending::<()>().await;
        }
        self.memory.lock().clone()
    }
}

/// Factory handing out [`MockRole`]s. Roles without a script answer
/// `"<name> reply"` forever.
#[derive(Default)]
pub struct MockRoleFactory {
    scripts: Mutex<HashMap<String, Vec<MockReply>>>,
    repeats: Mutex<HashMap<String, MockReply>>,
    created: Mutex<HashMap<String, Arc<MockRole>>>,
    prompts: Mutex<HashMap<String, String>>,
}

impl MockRoleFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the first replies of a role; it fails once the script runs out.
    pub fn script(self, name: &str, replies: Vec<MockReply>) -> Self {
        self.scripts.lock().insert(name.to_string(), replies);
        self
    }

    /// Answer every call of a role with the same reply.
    pub fn repeat(self, name: &str, reply: MockReply) -> Self {
        self.repeats.lock().insert(name.to_string(), reply);
        self
    }

    /// The most recently created role with this name.
    pub fn role(&self, name: &str) -> Option<Arc<MockRole>> {
        self.created.lock().get(name).cloned()
    }

    /// The system prompt a role was created with.
    pub fn prompt_of(&self, name: &str) -> Option<String> {
        self.prompts.lock().get(name).cloned()
    }
}

impl RoleFactory for MockRoleFactory {
    fn create(&self, name: &str, system_prompt: &str) -> Arc<dyn ModeratorRole> {
        let role = match self.scripts.lock().remove(name) {
            Some(script) => MockRole::new(name, script),
            None => {
                let reply = self
                    .repeats
                    .lock()
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| MockReply::Text(format!("{name} reply")));
                MockRole::repeating(name, reply)
            }
        };
        let role = Arc::new(role);
        self.created.lock().insert(name.to_string(), Arc::clone(&role));
        self.prompts
            .lock()
            .insert(name.to_string(), system_prompt.to_string());
        role
    }
}

/// In-memory [`MessageSink`] that records every write.
#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<MessageRecord>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn records(&self) -> Vec<MessageRecord> {
        self.records.lock().clone()
    }
}

impl MessageSink for RecordingSink {
    fn insert_message(&self, record: &MessageRecord) -> Result<MessageId, PersistenceError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(PersistenceError::Unavailable("recording sink set to fail".into()));
        }
        self.records.lock().push(record.clone());
        Ok(MessageId::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn script_then_exhausted() {
        let role = MockRole::new("Validator", vec![MockReply::text("ok"), MockReply::Silent]);
        let first = role.respond(None).await.unwrap().unwrap();
        assert_eq!(first.content, "ok");
        assert_eq!(first.author, "Validator");
        assert!(role.respond(None).await.unwrap().is_none());
        assert!(role.respond(None).await.is_err());
        assert_eq!(role.call_count(), 3);
    }

    #[tokio::test]
    async fn repeating_never_runs_out() {
        let role = MockRole::repeating("Orientador", MockReply::text("go on"));
        for _ in 0..5 {
            assert_eq!(role.respond(None).await.unwrap().unwrap().content, "go on");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delay_resolves_inner_reply() {
        let role = MockRole::new(
            "Curator",
            vec![MockReply::delayed(Duration::from_secs(5), MockReply::text("late"))],
        );
        let start = tokio::time::Instant::now();
        let reply = role.respond(None).await.unwrap().unwrap();
        assert_eq!(reply.content, "late");
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn records_inputs_observations_and_memory() {
        let role = MockRole::repeating("Validator", MockReply::text("noted"));
        role.observe(&Message::system("Timer", "tick")).await.unwrap();
        role.respond(Some(&Message::user("ana", "claim"))).await.unwrap();

        assert_eq!(role.observed().len(), 1);
        assert_eq!(role.inputs()[0].as_ref().map(|m| m.content.as_str()), Some("claim"));
        let memory: Vec<_> = role.memory().await.into_iter().map(|m| m.content).collect();
        assert_eq!(memory, vec!["tick", "claim", "noted"]);
    }

    #[tokio::test]
    async fn observe_can_fail() {
        let role = MockRole::new("Validator", vec![]);
        role.fail_observe(true);
        assert!(role.observe(&Message::user("ana", "x")).await.is_err());
    }

    #[tokio::test]
    async fn factory_defaults_and_inspection() {
        let factory = MockRoleFactory::new().script("Validator", vec![MockReply::text("scripted")]);
        let validator = factory.create("Validator", "check");
        let orientador = factory.create("Orientador", "guide");

        assert_eq!(validator.respond(None).await.unwrap().unwrap().content, "scripted");
        assert_eq!(
            orientador.respond(None).await.unwrap().unwrap().content,
            "Orientador reply"
        );
        assert_eq!(factory.role("Validator").unwrap().call_count(), 1);
        assert_eq!(factory.prompt_of("Orientador").as_deref(), Some("guide"));
    }

    #[test]
    fn recording_sink_can_fail() {
        let sink = RecordingSink::new();
        let record = MessageRecord {
            room_session_id: agora_core::ids::SessionId::new(),
            author: "Validator".into(),
            role: agora_core::messages::MessageRole::Agent,
            content: "x".into(),
            parent_id: None,
            used_ids: vec![],
        };
        sink.insert_message(&record).unwrap();
        sink.set_failing(true);
        assert!(sink.insert_message(&record).is_err());
        assert_eq!(sink.records().len(), 1);
    }
}
