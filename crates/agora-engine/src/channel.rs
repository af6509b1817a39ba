use parking_lot::RwLock;

use agora_core::messages::Message;
use agora_core::role::RoleHandle;

/// Shared, append-only conversation history of one room session, together
/// with the roles that observe everything appended to it.
pub struct BroadcastChannel {
    participants: Vec<RoleHandle>,
    history: RwLock<Vec<Message>>,
}

impl BroadcastChannel {
    pub fn new(participants: Vec<RoleHandle>) -> Self {
        Self {
            participants,
            history: RwLock::new(Vec::new()),
        }
    }

    pub fn participants(&self) -> &[RoleHandle] {
        &self.participants
    }

    pub fn participant_names(&self) -> Vec<String> {
        self.participants.iter().map(|p| p.name.clone()).collect()
    }

    pub fn append(&self, message: Message) {
        self.history.write().push(message);
    }

    /// Snapshot of the history in append order.
    pub fn history(&self) -> Vec<Message> {
        self.history.read().clone()
    }

    pub fn len(&self) -> usize {
        self.history.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::mock::MockRole;

    #[test]
    fn preserves_append_order() {
        let channel = BroadcastChannel::new(Vec::new());
        assert!(channel.is_empty());
        channel.append(Message::user("ana", "first"));
        channel.append(Message::system("Timer", "second"));
        channel.append(Message::agent("Validator", "third"));

        let contents: Vec<_> = channel.history().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
        assert_eq!(channel.len(), 3);
    }

    #[test]
    fn history_is_a_snapshot() {
        let channel = BroadcastChannel::new(Vec::new());
        channel.append(Message::user("ana", "one"));
        let snapshot = channel.history();
        channel.append(Message::user("ana", "two"));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(channel.len(), 2);
    }

    #[test]
    fn lists_participant_names() {
        let channel = BroadcastChannel::new(vec![
            RoleHandle::new("Validator", "", Arc::new(MockRole::new("Validator", vec![]))),
            RoleHandle::new("Orientador", "", Arc::new(MockRole::new("Orientador", vec![]))),
        ]);
        assert_eq!(channel.participant_names(), vec!["Validator", "Orientador"]);
    }
}
