use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvocationId(pub String);

impl InvocationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Channel or conversation identifier on the chat platform.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationScope(pub String);

impl ConversationScope {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One mediation request. Lives for a single run of the engine and is never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub id: InvocationId,
    pub conversation: ConversationScope,
    pub triggering_actor: String,
    pub explicit_scope: Option<ConversationScope>,
    pub request_text: String,
    pub history_limit: Option<u32>,
    pub received_at: DateTime<Utc>,
}

impl Invocation {
    pub fn new(conversation: ConversationScope, triggering_actor: impl Into<String>) -> Self {
        Self {
            id: InvocationId::generate(),
            conversation,
            triggering_actor: triggering_actor.into(),
            explicit_scope: None,
            request_text: String::new(),
            history_limit: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_explicit_scope(mut self, scope: ConversationScope) -> Self {
        self.explicit_scope = Some(scope);
        self
    }

    pub fn with_request_text(mut self, text: impl Into<String>) -> Self {
        self.request_text = text.into();
        self
    }

    pub fn with_history_limit(mut self, limit: u32) -> Self {
        self.history_limit = Some(limit);
        self
    }

    /// The conversation the mediation is about: the explicit scope when one was named,
    /// otherwise the conversation the request came from.
    pub fn target_scope(&self) -> &ConversationScope {
        self.explicit_scope.as_ref().unwrap_or(&self.conversation)
    }
}

#[cfg(test)]
mod tests {
    use super::{ConversationScope, Invocation};

    #[test]
    fn explicit_scope_takes_precedence_over_origin() {
        let invocation = Invocation::new(ConversationScope("C-ORIGIN".to_owned()), "U1")
            .with_explicit_scope(ConversationScope("C-TARGET".to_owned()));
        assert_eq!(invocation.target_scope().as_str(), "C-TARGET");
    }

    #[test]
    fn origin_is_target_without_explicit_scope() {
        let invocation = Invocation::new(ConversationScope("C-ORIGIN".to_owned()), "U1");
        assert_eq!(invocation.target_scope().as_str(), "C-ORIGIN");
        assert_ne!(invocation.id.0, "");
    }
}
