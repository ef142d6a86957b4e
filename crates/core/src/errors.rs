use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What kind of resource a `NotFound` tool failure refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Conversation,
    User,
    Other,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::User => "user",
            Self::Other => "resource",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    Argument,
    Upstream,
    NotFound,
}

/// Failure of a single tool invocation. Recorded into evidence, never raised past the loop
/// except for a missing target conversation.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolError {
    #[error("invalid tool call: {message}")]
    Argument { message: String },
    #[error("upstream failure: {message}")]
    Upstream { message: String },
    #[error("{} `{id}` was not found", resource.as_str())]
    NotFound { resource: ResourceKind, id: String },
}

impl ToolError {
    pub fn argument(message: impl Into<String>) -> Self {
        Self::Argument { message: message.into() }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream { message: message.into() }
    }

    pub fn not_found(resource: ResourceKind, id: impl Into<String>) -> Self {
        Self::NotFound { resource, id: id.into() }
    }

    pub fn kind(&self) -> ToolErrorKind {
        match self {
            Self::Argument { .. } => ToolErrorKind::Argument,
            Self::Upstream { .. } => ToolErrorKind::Upstream,
            Self::NotFound { .. } => ToolErrorKind::NotFound,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upstream { .. })
    }
}

/// Terminal failure of a whole mediation invocation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MediationError {
    #[error("{} `{id}` was not found", resource.as_str())]
    NotFound { resource: ResourceKind, id: String },
    #[error("{strategy} strategy could not populate the `{section}` section")]
    SynthesisIncomplete { strategy: String, section: &'static str },
    #[error("mediation was cancelled before completion")]
    Cancelled,
}

impl MediationError {
    pub fn synthesis_incomplete(strategy: impl Into<String>, section: &'static str) -> Self {
        Self::SynthesisIncomplete { strategy: strategy.into(), section }
    }

    pub fn error_class(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::SynthesisIncomplete { .. } => "synthesis_incomplete",
            Self::Cancelled => "cancelled",
        }
    }

    /// Text safe to post back into the conversation. `None` means nothing should be posted.
    pub fn user_message(&self) -> Option<String> {
        match self {
            Self::NotFound { resource: ResourceKind::Conversation, id } => Some(format!(
                "I couldn't find the conversation `{id}`. Check that the channel exists and that I've been invited to it."
            )),
            Self::NotFound { resource, id } => Some(format!(
                "I couldn't find the {} `{id}` needed for this analysis.",
                resource.as_str()
            )),
            Self::SynthesisIncomplete { .. } => Some(
                "I wasn't able to put together a complete analysis of this conversation. Please try again in a moment."
                    .to_owned(),
            ),
            Self::Cancelled => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{MediationError, ResourceKind, ToolError, ToolErrorKind};

    #[test]
    fn only_upstream_failures_are_retryable() {
        assert!(ToolError::upstream("timed out").is_retryable());
        assert!(!ToolError::argument("unknown tool `x`").is_retryable());
        assert!(!ToolError::not_found(ResourceKind::Conversation, "C1").is_retryable());
    }

    #[test]
    fn tool_error_serializes_with_kind_tag() {
        let value = serde_json::to_value(ToolError::upstream("timed out")).expect("serialize");
        assert_eq!(value["kind"], "upstream");
        assert_eq!(value["message"], "timed out");
        assert_eq!(ToolError::upstream("x").kind(), ToolErrorKind::Upstream);
    }

    #[test]
    fn missing_conversation_has_user_visible_message() {
        let error =
            MediationError::NotFound { resource: ResourceKind::Conversation, id: "C404".to_owned() };
        let message = error.user_message().expect("not found should be user visible");
        assert!(message.contains("C404"));
        assert_eq!(error.error_class(), "not_found");
    }

    #[test]
    fn cancelled_mediation_posts_nothing() {
        assert_eq!(MediationError::Cancelled.user_message(), None);
    }

    #[test]
    fn synthesis_incomplete_names_strategy_and_section() {
        let error = MediationError::synthesis_incomplete("relational", "common_ground");
        assert_eq!(
            error.to_string(),
            "relational strategy could not populate the `common_ground` section"
        );
        assert!(error.user_message().is_some());
    }
}
