use std::collections::HashMap;

use parking_lot::Mutex;
use regex::{escape, Regex, RegexBuilder};
use tracing::debug;

use agora_core::messages::{Message, Reply};
use agora_core::role::RoleHandle;

use crate::invoker::RoleInvoker;

/// Decides whether a cascade proceeds from its first role to the second.
///
/// `roles` lists the cascade's role names in invocation order; the first
/// entry produced `reply`.
pub trait ContinuationPredicate: Send + Sync {
    fn should_continue(&self, reply: &str, roles: &[String]) -> bool;
}

impl<F> ContinuationPredicate for F
where
    F: Fn(&str, &[String]) -> bool + Send + Sync,
{
    fn should_continue(&self, reply: &str, roles: &[String]) -> bool {
        self(reply, roles)
    }
}

/// Proceeds when the reply names one of the later roles as a whole word,
/// case-insensitively (e.g. a Validator reply that hands over to the
/// "Orientador"). Patterns are compiled once per role name.
#[derive(Debug, Default)]
pub struct RoleMentionPredicate {
    patterns: Mutex<HashMap<String, Option<Regex>>>,
}

impl RoleMentionPredicate {
    pub fn new() -> Self {
        Self::default()
    }

    fn names(&self, name: &str, reply: &str) -> bool {
        let mut patterns = self.patterns.lock();
        let pattern = patterns.entry(name.to_string()).or_insert_with(|| {
            RegexBuilder::new(&format!(r"\b{}\b", escape(name)))
                .case_insensitive(true)
                .build()
                .ok()
        });
        match pattern {
            Some(re) => re.is_match(reply),
            None => reply.to_lowercase().contains(&name.to_lowercase()),
        }
    }
}

impl ContinuationPredicate for RoleMentionPredicate {
    fn should_continue(&self, reply: &str, roles: &[String]) -> bool {
        roles.iter().skip(1).any(|name| self.names(name, reply))
    }
}

/// Broadcast `message`, ask `first` about it, and hand over to `second`
/// when the predicate agrees. Returns the replies in invocation order.
///
/// A silent or failed first role ends the cascade with no replies.
pub async fn evaluate_cascade(
    invoker: &RoleInvoker,
    predicate: &dyn ContinuationPredicate,
    message: &Message,
    first: &RoleHandle,
    second: &RoleHandle,
) -> Vec<Reply> {
    invoker.broadcast(message).await;

    let Some(first_reply) = invoker.call(first, Some(message)).await else {
        debug!(role = %first.name, "first cascade role produced no reply");
        return Vec::new();
    };
    let mut replies = vec![Reply::from_message(&first_reply)];

    let roles = [first.name.clone(), second.name.clone()];
    if !predicate.should_continue(&first_reply.content, &roles) {
        return replies;
    }

    if let Some(second_reply) = invoker.call(second, None).await {
        replies.push(Reply::from_message(&second_reply));
    }
    replies
}
