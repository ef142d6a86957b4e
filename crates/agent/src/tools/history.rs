use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use betweenus_core::domain::conversation::Message;
use betweenus_core::domain::invocation::ConversationScope;
use betweenus_core::errors::{ToolError, ToolErrorKind};
use betweenus_core::sources::ConversationSource;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{HistoryLimits, Tool};

const DIGEST_RECENT_MESSAGES: usize = 5;

const HISTORY_FAILURES: &[ToolErrorKind] =
    &[ToolErrorKind::Argument, ToolErrorKind::Upstream, ToolErrorKind::NotFound];

#[derive(Debug, Deserialize)]
struct HistoryArgs {
    channel_id: String,
    limit: Option<u32>,
}

fn history_argument_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "channel_id": { "type": "string", "minLength": 1 },
            "limit": { "type": "integer", "minimum": 1 }
        },
        "required": ["channel_id"],
        "additionalProperties": false
    })
}

fn message_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "author": { "type": "string" },
            "text": { "type": "string" },
            "timestamp": { "type": "string" }
        },
        "required": ["author", "text", "timestamp"]
    })
}

fn parse_args(input: Value) -> Result<HistoryArgs, ToolError> {
    serde_json::from_value(input).map_err(|error| ToolError::argument(error.to_string()))
}

/// Recent messages of a channel, oldest first.
pub struct FetchHistoryTool {
    source: Arc<dyn ConversationSource>,
    limits: HistoryLimits,
}

impl FetchHistoryTool {
    pub fn new(source: Arc<dyn ConversationSource>, limits: HistoryLimits) -> Self {
        Self { source, limits }
    }
}

#[async_trait]
impl Tool for FetchHistoryTool {
    fn name(&self) -> &'static str {
        "fetch_history"
    }

    fn description(&self) -> &'static str {
        "Fetch the most recent messages of a channel, oldest first. Use this first to see what was said."
    }

    fn argument_schema(&self) -> Value {
        history_argument_schema()
    }

    fn result_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "channel_id": { "type": "string" },
                "messages": { "type": "array", "items": message_schema() }
            },
            "required": ["channel_id", "messages"]
        })
    }

    fn failure_modes(&self) -> &'static [ToolErrorKind] {
        HISTORY_FAILURES
    }

    async fn execute(&self, input: Value) -> Result<Value, ToolError> {
        let args = parse_args(input)?;
        let limit = self.limits.resolve(args.limit);
        let scope = ConversationScope(args.channel_id);
        let messages = self.source.fetch_history(&scope, limit).await?;

        Ok(json!({ "channel_id": scope.0, "messages": messages }))
    }
}

/// Per-author activity and the latest messages of a channel.
pub struct ChannelDigestTool {
    source: Arc<dyn ConversationSource>,
    limits: HistoryLimits,
}

impl ChannelDigestTool {
    pub fn new(source: Arc<dyn ConversationSource>, limits: HistoryLimits) -> Self {
        Self { source, limits }
    }
}

#[async_trait]
impl Tool for ChannelDigestTool {
    fn name(&self) -> &'static str {
        "channel_digest"
    }

    fn description(&self) -> &'static str {
        "Summarize channel activity: message counts per author, the time span covered and the latest few messages."
    }

    fn argument_schema(&self) -> Value {
        history_argument_schema()
    }

    fn result_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "channel_id": { "type": "string" },
                "message_count": { "type": "integer" },
                "authors": { "type": "array" },
                "recent": { "type": "array", "items": message_schema() }
            },
            "required": ["channel_id", "message_count", "authors", "recent"]
        })
    }

    fn failure_modes(&self) -> &'static [ToolErrorKind] {
        HISTORY_FAILURES
    }

    async fn execute(&self, input: Value) -> Result<Value, ToolError> {
        let args = parse_args(input)?;
        let limit = self.limits.resolve(args.limit);
        let scope = ConversationScope(args.channel_id);
        let messages = self.source.fetch_history(&scope, limit).await?;

        Ok(digest(&scope, &messages))
    }
}

fn digest(scope: &ConversationScope, messages: &[Message]) -> Value {
    let mut per_author = BTreeMap::<&str, u32>::new();
    for message in messages {
        *per_author.entry(message.author.as_str()).or_default() += 1;
    }
    let mut authors = per_author
        .into_iter()
        .map(|(author, count)| (author.to_owned(), count))
        .collect::<Vec<_>>();
    authors.sort_by(|left, right| right.1.cmp(&left.1).then_with(|| left.0.cmp(&right.0)));

    let recent_start = messages.len().saturating_sub(DIGEST_RECENT_MESSAGES);

    json!({
        "channel_id": scope.as_str(),
        "message_count": messages.len(),
        "authors": authors
            .into_iter()
            .map(|(author, count)| json!({ "author": author, "messages": count }))
            .collect::<Vec<_>>(),
        "first_timestamp": messages.first().map(|message| message.timestamp.to_rfc3339()),
        "last_timestamp": messages.last().map(|message| message.timestamp.to_rfc3339()),
        "recent": &messages[recent_start..],
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use betweenus_core::errors::{ResourceKind, ToolError};
    use serde_json::json;

    use crate::tools::fakes::InMemorySource;
    use crate::tools::{register_builtins, HistoryLimits, RegistryConfig, ToolRegistry};

    fn registry(source: InMemorySource) -> ToolRegistry {
        let mut registry = ToolRegistry::new(RegistryConfig {
            history: HistoryLimits { default_limit: 3, max_limit: 4 },
            ..RegistryConfig::default()
        });
        register_builtins(&mut registry, Arc::new(source), None).expect("builtins");
        registry
    }

    fn busy_channel() -> InMemorySource {
        InMemorySource::default().with_channel(
            "C1",
            &[
                ("U1", "one"),
                ("U2", "two"),
                ("U1", "three"),
                ("U1", "four"),
                ("U2", "five"),
                ("U3", "six"),
            ],
        )
    }

    #[tokio::test]
    async fn history_uses_default_limit_and_caps_requests() {
        let registry = registry(busy_channel());

        let value = registry
            .invoke("fetch_history", &json!({ "channel_id": "C1" }))
            .await
            .expect("default limit");
        let texts = value["messages"]
            .as_array()
            .expect("messages")
            .iter()
            .map(|message| message["text"].as_str().unwrap_or_default().to_owned())
            .collect::<Vec<_>>();
        assert_eq!(texts, vec!["four", "five", "six"]);

        let capped = registry
            .invoke("fetch_history", &json!({ "channel_id": "C1", "limit": 50 }))
            .await
            .expect("capped limit");
        assert_eq!(capped["messages"].as_array().map(Vec::len), Some(4));
    }

    #[tokio::test]
    async fn missing_channel_is_not_found() {
        let registry = registry(busy_channel());
        let error = registry
            .invoke("fetch_history", &json!({ "channel_id": "C404" }))
            .await
            .expect_err("missing channel");
        assert_eq!(error, ToolError::not_found(ResourceKind::Conversation, "C404"));
    }

    #[tokio::test]
    async fn digest_counts_authors_and_keeps_recent_messages() {
        let registry = registry(busy_channel());
        let value = registry
            .invoke("channel_digest", &json!({ "channel_id": "C1", "limit": 4 }))
            .await
            .expect("digest");

        assert_eq!(value["message_count"], 4);
        assert_eq!(value["authors"][0], json!({ "author": "U1", "messages": 2 }));
        assert_eq!(value["recent"].as_array().map(Vec::len), Some(4));
        assert!(value["first_timestamp"].is_string());
    }
}
