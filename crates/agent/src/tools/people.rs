use std::sync::Arc;

use async_trait::async_trait;
use betweenus_core::domain::invocation::ConversationScope;
use betweenus_core::errors::{ToolError, ToolErrorKind};
use betweenus_core::sources::ConversationSource;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::Tool;

fn profile_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "string" },
            "name": { "type": "string" }
        },
        "required": ["id", "name"]
    })
}

fn decode<T>(input: Value) -> Result<T, ToolError>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_value(input).map_err(|error| ToolError::argument(error.to_string()))
}

pub struct UserInfoTool {
    source: Arc<dyn ConversationSource>,
}

impl UserInfoTool {
    pub fn new(source: Arc<dyn ConversationSource>) -> Self {
        Self { source }
    }
}

#[derive(Deserialize)]
struct UserInfoArgs {
    user_id: String,
}

#[async_trait]
impl Tool for UserInfoTool {
    fn name(&self) -> &'static str {
        "user_info"
    }

    fn description(&self) -> &'static str {
        "Look up a user's display and real name by user id (e.g. U0123ABC)."
    }

    fn argument_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "user_id": { "type": "string", "minLength": 1 } },
            "required": ["user_id"],
            "additionalProperties": false
        })
    }

    fn result_schema(&self) -> Value {
        profile_schema()
    }

    fn failure_modes(&self) -> &'static [ToolErrorKind] {
        &[ToolErrorKind::Argument, ToolErrorKind::Upstream, ToolErrorKind::NotFound]
    }

    async fn execute(&self, input: Value) -> Result<Value, ToolError> {
        let args: UserInfoArgs = decode(input)?;
        let profile = self.source.user_info(&args.user_id).await?;
        Ok(json!({
            "id": profile.id,
            "name": profile.preferred_name(),
            "real_name": profile.real_name,
            "display_name": profile.display_name,
        }))
    }
}

pub struct ListChannelMembersTool {
    source: Arc<dyn ConversationSource>,
}

impl ListChannelMembersTool {
    pub fn new(source: Arc<dyn ConversationSource>) -> Self {
        Self { source }
    }
}

#[derive(Deserialize)]
struct ChannelArgs {
    channel_id: String,
}

#[async_trait]
impl Tool for ListChannelMembersTool {
    fn name(&self) -> &'static str {
        "list_channel_members"
    }

    fn description(&self) -> &'static str {
        "List the members of a channel with their resolved names."
    }

    fn argument_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "channel_id": { "type": "string", "minLength": 1 } },
            "required": ["channel_id"],
            "additionalProperties": false
        })
    }

    fn result_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "channel_id": { "type": "string" },
                "members": { "type": "array", "items": profile_schema() }
            },
            "required": ["channel_id", "members"]
        })
    }

    fn failure_modes(&self) -> &'static [ToolErrorKind] {
        &[ToolErrorKind::Argument, ToolErrorKind::Upstream, ToolErrorKind::NotFound]
    }

    async fn execute(&self, input: Value) -> Result<Value, ToolError> {
        let args: ChannelArgs = decode(input)?;
        let scope = ConversationScope(args.channel_id);
        let member_ids = self.source.channel_members(&scope).await?;

        let mut members = Vec::with_capacity(member_ids.len());
        for id in member_ids {
            // An unresolvable member still belongs in the list, under its id.
            let name = match self.source.user_info(&id).await {
                Ok(profile) => profile.preferred_name().to_owned(),
                Err(error) => {
                    debug!(user_id = %id, error = %error, "member name lookup failed");
                    id.clone()
                }
            };
            members.push(json!({ "id": id, "name": name }));
        }

        Ok(json!({ "channel_id": scope.0, "members": members }))
    }
}

pub struct FindUserByNameTool {
    source: Arc<dyn ConversationSource>,
}

impl FindUserByNameTool {
    pub fn new(source: Arc<dyn ConversationSource>) -> Self {
        Self { source }
    }
}

#[derive(Deserialize)]
struct FindUserArgs {
    name: String,
}

#[async_trait]
impl Tool for FindUserByNameTool {
    fn name(&self) -> &'static str {
        "find_user_by_name"
    }

    fn description(&self) -> &'static str {
        "Find users whose name, real name or display name contains the given text (case-insensitive)."
    }

    fn argument_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "name": { "type": "string", "minLength": 1 } },
            "required": ["name"],
            "additionalProperties": false
        })
    }

    fn result_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "matches": { "type": "array", "items": profile_schema() }
            },
            "required": ["query", "matches"]
        })
    }

    async fn execute(&self, input: Value) -> Result<Value, ToolError> {
        let args: FindUserArgs = decode(input)?;
        let users = self.source.list_users().await?;
        let matches = users
            .iter()
            .filter(|user| user.matches_name(&args.name))
            .map(|user| json!({ "id": user.id, "name": user.preferred_name() }))
            .collect::<Vec<_>>();

        Ok(json!({ "query": args.name, "matches": matches }))
    }
}

/// Pulls `<@U…>` mention ids out of text. Performs no I/O.
pub struct MentionedUsersTool;

#[derive(Deserialize)]
struct MentionArgs {
    text: String,
}

#[async_trait]
impl Tool for MentionedUsersTool {
    fn name(&self) -> &'static str {
        "mentioned_users"
    }

    fn description(&self) -> &'static str {
        "Extract the user ids mentioned as <@U…> in a piece of text."
    }

    fn argument_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"],
            "additionalProperties": false
        })
    }

    fn result_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "user_ids": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["user_ids"]
        })
    }

    fn failure_modes(&self) -> &'static [ToolErrorKind] {
        &[ToolErrorKind::Argument]
    }

    async fn execute(&self, input: Value) -> Result<Value, ToolError> {
        let args: MentionArgs = decode(input)?;
        Ok(json!({ "user_ids": extract_user_mentions(&args.text) }))
    }
}

/// Distinct mentioned user ids in order of first appearance. Accepts `<@U1>` and `<@U1|name>`.
pub fn extract_user_mentions(text: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("<@") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('>') else {
            break;
        };
        let id = after[..end].split('|').next().unwrap_or_default().trim();
        if is_user_id(id) && !found.iter().any(|existing: &String| existing == id) {
            found.push(id.to_owned());
        }
        rest = &after[end + 1..];
    }
    found
}

fn is_user_id(candidate: &str) -> bool {
    candidate.len() > 1
        && matches!(candidate.as_bytes()[0], b'U' | b'W')
        && candidate.chars().all(|character| character.is_ascii_alphanumeric())
}
