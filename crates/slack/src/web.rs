use std::time::Duration;

use async_trait::async_trait;
use betweenus_core::config::SlackConfig;
use betweenus_core::domain::conversation::{Message, UserProfile};
use betweenus_core::domain::invocation::ConversationScope;
use betweenus_core::errors::{ResourceKind, ToolError};
use betweenus_core::sources::ConversationSource;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::blocks::MessageTemplate;

const MEMBERS_PAGE_SIZE: u32 = 200;
const USERS_PAGE_SIZE: u32 = 200;
const MAX_PAGES: usize = 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SlackApiError {
    #[error("slack request failed: {0}")]
    Transport(String),
    #[error("slack `{method}` returned `{error}`")]
    Api { method: &'static str, error: String },
    #[error("unexpected slack response: {0}")]
    Protocol(String),
}

impl SlackApiError {
    fn into_tool_error(self, resource: ResourceKind, id: &str) -> ToolError {
        match &self {
            Self::Api { error, .. } => match error.as_str() {
                "channel_not_found" | "not_in_channel" | "is_archived" if resource == ResourceKind::Conversation => {
                    ToolError::not_found(ResourceKind::Conversation, id)
                }
                "user_not_found" | "users_not_found" => ToolError::not_found(ResourceKind::User, id),
                "invalid_arguments" | "invalid_cursor" | "invalid_limit" => {
                    ToolError::argument(self.to_string())
                }
                _ => ToolError::upstream(self.to_string()),
            },
            Self::Transport(_) | Self::Protocol(_) => ToolError::upstream(self.to_string()),
        }
    }
}

/// Posts rendered messages back into Slack.
#[async_trait]
pub trait MessagePoster: Send + Sync {
    async fn post_message(
        &self,
        channel_id: &str,
        thread_ts: Option<&str>,
        message: &MessageTemplate,
    ) -> Result<(), SlackApiError>;
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: String,
    ts: String,
    #[serde(default)]
    subtype: Option<String>,
}

#[derive(Deserialize)]
struct RawUser {
    id: String,
    name: String,
    #[serde(default)]
    real_name: Option<String>,
    #[serde(default)]
    profile: Option<RawProfile>,
    #[serde(default)]
    deleted: bool,
}

#[derive(Deserialize)]
struct RawProfile {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    real_name: Option<String>,
}

impl From<RawUser> for UserProfile {
    fn from(user: RawUser) -> Self {
        let profile = user.profile.unwrap_or(RawProfile { display_name: None, real_name: None });
        Self {
            id: user.id,
            name: user.name,
            real_name: user.real_name.or(profile.real_name),
            display_name: profile.display_name,
        }
    }
}

/// Slack Web API over HTTPS with the bot token.
pub struct SlackWebClient {
    http: Client,
    base_url: String,
    bot_token: SecretString,
}

impl SlackWebClient {
    pub fn new(
        base_url: impl Into<String>,
        bot_token: SecretString,
        timeout: Duration,
    ) -> Result<Self, SlackApiError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| SlackApiError::Transport(error.to_string()))?;
        Ok(Self { http, base_url: base_url.into().trim_end_matches('/').to_owned(), bot_token })
    }

    pub fn from_config(config: &SlackConfig) -> Result<Self, SlackApiError> {
        Self::new(
            config.api_base_url.clone(),
            config.bot_token.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// The bot's own user id, used to strip its mention from requests.
    pub async fn auth_test(&self) -> Result<String, SlackApiError> {
        let body = self.get("auth.test", &[]).await?;
        body.get("user_id")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| SlackApiError::Protocol("auth.test response has no user_id".to_owned()))
    }

    pub async fn history(&self, channel_id: &str, limit: u32) -> Result<Vec<Message>, SlackApiError> {
        let body = self
            .get("conversations.history", &[("channel", channel_id.to_owned()), ("limit", limit.to_string())])
            .await?;
        let raw: Vec<RawMessage> = field(&body, "messages")?;

        // Slack returns newest first.
        let mut messages = raw
            .into_iter()
            .filter(|message| message.subtype.as_deref().map_or(true, |subtype| subtype == "thread_broadcast"))
            .filter_map(|message| {
                let author = message.user?;
                Some(Message { author, text: message.text, timestamp: parse_ts(&message.ts)? })
            })
            .collect::<Vec<_>>();
        messages.reverse();
        Ok(messages)
    }

    pub async fn user(&self, user_id: &str) -> Result<UserProfile, SlackApiError> {
        let body = self.get("users.info", &[("user", user_id.to_owned())]).await?;
        field::<RawUser>(&body, "user").map(UserProfile::from)
    }

    pub async fn members(&self, channel_id: &str) -> Result<Vec<String>, SlackApiError> {
        let mut members = Vec::new();
        let mut cursor = String::new();
        for _ in 0..MAX_PAGES {
            let mut params = vec![("channel", channel_id.to_owned()), ("limit", MEMBERS_PAGE_SIZE.to_string())];
            if !cursor.is_empty() {
                params.push(("cursor", cursor.clone()));
            }
            let body = self.get("conversations.members", &params).await?;
            members.extend(field::<Vec<String>>(&body, "members")?);
            cursor = next_cursor(&body);
            if cursor.is_empty() {
                break;
            }
        }
        Ok(members)
    }

    pub async fn users(&self) -> Result<Vec<UserProfile>, SlackApiError> {
        let mut users = Vec::new();
        let mut cursor = String::new();
        for _ in 0..MAX_PAGES {
            let mut params = vec![("limit", USERS_PAGE_SIZE.to_string())];
            if !cursor.is_empty() {
                params.push(("cursor", cursor.clone()));
            }
            let body = self.get("users.list", &params).await?;
            users.extend(
                field::<Vec<RawUser>>(&body, "members")?
                    .into_iter()
                    .filter(|user| !user.deleted)
                    .map(UserProfile::from),
            );
            cursor = next_cursor(&body);
            if cursor.is_empty() {
                break;
            }
        }
        Ok(users)
    }

    async fn get(&self, method: &'static str, params: &[(&str, String)]) -> Result<Value, SlackApiError> {
        debug!(event_name = "slack.api.request", method, "calling slack web api");
        let response = self
            .http
            .get(format!("{}/{method}", self.base_url))
            .bearer_auth(self.bot_token.expose_secret())
            .query(params)
            .send()
            .await
            .map_err(|error| SlackApiError::Transport(error.to_string()))?;
        check(method, response).await
    }

    async fn post(&self, method: &'static str, payload: &Value) -> Result<Value, SlackApiError> {
        debug!(event_name = "slack.api.request", method, "calling slack web api");
        let response = self
            .http
            .post(format!("{}/{method}", self.base_url))
            .bearer_auth(self.bot_token.expose_secret())
            .json(payload)
            .send()
            .await
            .map_err(|error| SlackApiError::Transport(error.to_string()))?;
        check(method, response).await
    }
}

async fn check(method: &'static str, response: reqwest::Response) -> Result<Value, SlackApiError> {
    let status = response.status();
    if !status.is_success() {
        return Err(SlackApiError::Transport(format!("`{method}` returned HTTP {status}")));
    }
    let body: Value =
        response.json().await.map_err(|error| SlackApiError::Protocol(error.to_string()))?;
    if body.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(body);
    }
    let error = body.get("error").and_then(Value::as_str).unwrap_or("unknown_error").to_owned();
    warn!(event_name = "slack.api.error", method, error = %error, "slack web api call failed");
    Err(SlackApiError::Api { method, error })
}

fn field<T: serde::de::DeserializeOwned>(body: &Value, name: &str) -> Result<T, SlackApiError> {
    let value = body
        .get(name)
        .cloned()
        .ok_or_else(|| SlackApiError::Protocol(format!("response has no `{name}`")))?;
    serde_json::from_value(value).map_err(|error| SlackApiError::Protocol(error.to_string()))
}

fn next_cursor(body: &Value) -> String {
    body.pointer("/response_metadata/next_cursor").and_then(Value::as_str).unwrap_or_default().to_owned()
}

/// `"1730000000.000100"` → UTC instant.
pub fn parse_ts(ts: &str) -> Option<DateTime<Utc>> {
    let (seconds, fraction) = ts.split_once('.').unwrap_or((ts, "0"));
    let seconds = seconds.parse::<i64>().ok()?;
    let micros = format!("{fraction:0<6}").get(..6)?.parse::<u32>().ok()?;
    Utc.timestamp_opt(seconds, micros * 1_000).single()
}

#[async_trait]
impl ConversationSource for SlackWebClient {
    async fn fetch_history(&self, scope: &ConversationScope, limit: u32) -> Result<Vec<Message>, ToolError> {
        self.history(scope.as_str(), limit)
            .await
            .map_err(|error| error.into_tool_error(ResourceKind::Conversation, scope.as_str()))
    }

    async fn user_info(&self, user_id: &str) -> Result<UserProfile, ToolError> {
        self.user(user_id).await.map_err(|error| error.into_tool_error(ResourceKind::User, user_id))
    }

    async fn channel_members(&self, scope: &ConversationScope) -> Result<Vec<String>, ToolError> {
        self.members(scope.as_str())
            .await
            .map_err(|error| error.into_tool_error(ResourceKind::Conversation, scope.as_str()))
    }

    async fn list_users(&self) -> Result<Vec<UserProfile>, ToolError> {
        self.users().await.map_err(|error| error.into_tool_error(ResourceKind::Other, "users"))
    }
}

#[async_trait]
impl MessagePoster for SlackWebClient {
    async fn post_message(
        &self,
        channel_id: &str,
        thread_ts: Option<&str>,
        message: &MessageTemplate,
    ) -> Result<(), SlackApiError> {
        let mut payload = json!({
            "channel": channel_id,
            "text": message.fallback_text,
            "blocks": message.blocks,
            "unfurl_links": false,
        });
        if let Some(thread_ts) = thread_ts {
            payload["thread_ts"] = json!(thread_ts);
        }
        self.post("chat.postMessage", &payload).await.map(|_| ())
    }
}
