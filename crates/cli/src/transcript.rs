//! Offline conversation source backed by a JSON transcript file.
//!
//! ```json
//! {
//!   "channel": "C0LAUNCH",
//!   "messages": [{ "author": "U1", "text": "The export ships Friday." }],
//!   "users": [{ "id": "U1", "name": "dana", "real_name": "Dana Ortiz" }]
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use betweenus_core::domain::conversation::{Message, UserProfile};
use betweenus_core::domain::invocation::ConversationScope;
use betweenus_core::errors::{ResourceKind, ToolError};
use betweenus_core::sources::ConversationSource;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_CHANNEL: &str = "CTRANSCRIPT";

#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("could not read transcript `{path}`: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("could not parse transcript `{path}`: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
}

#[derive(Clone, Debug, Deserialize)]
pub struct TranscriptMessage {
    pub author: String,
    pub text: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Transcript {
    #[serde(default = "default_channel")]
    pub channel: String,
    pub messages: Vec<TranscriptMessage>,
    #[serde(default)]
    pub users: Vec<UserProfile>,
}

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

impl Transcript {
    pub fn load(path: &Path) -> Result<Self, TranscriptError> {
        let raw = fs::read_to_string(path)
            .map_err(|source| TranscriptError::Read { path: path.to_path_buf(), source })?;
        Self::parse(&raw).map_err(|source| TranscriptError::Parse { path: path.to_path_buf(), source })
    }

    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

pub struct TranscriptSource {
    transcript: Transcript,
}

impl TranscriptSource {
    pub fn new(transcript: Transcript) -> Self {
        Self { transcript }
    }

    pub fn channel(&self) -> &str {
        &self.transcript.channel
    }

    fn check_scope(&self, scope: &ConversationScope) -> Result<(), ToolError> {
        if scope.as_str() == self.transcript.channel {
            Ok(())
        } else {
            Err(ToolError::not_found(ResourceKind::Conversation, scope.as_str()))
        }
    }

    fn authors(&self) -> Vec<String> {
        let mut authors: Vec<String> = Vec::new();
        for message in &self.transcript.messages {
            if !authors.contains(&message.author) {
                authors.push(message.author.clone());
            }
        }
        authors
    }

    fn profile(&self, user_id: &str) -> Option<UserProfile> {
        self.transcript.users.iter().find(|user| user.id == user_id).cloned().or_else(|| {
            self.authors().contains(&user_id.to_string()).then(|| UserProfile {
                id: user_id.to_string(),
                name: user_id.to_lowercase(),
                real_name: None,
                display_name: None,
            })
        })
    }
}

#[async_trait]
impl ConversationSource for TranscriptSource {
    async fn fetch_history(
        &self,
        scope: &ConversationScope,
        limit: u32,
    ) -> Result<Vec<Message>, ToolError> {
        self.check_scope(scope)?;
        let base = Utc.timestamp_opt(0, 0).single().unwrap_or_default();
        let messages = &self.transcript.messages;
        let skip = messages.len().saturating_sub(limit as usize);
        Ok(messages
            .iter()
            .enumerate()
            .skip(skip)
            .map(|(index, message)| Message {
                author: message.author.clone(),
                text: message.text.clone(),
                timestamp: message.timestamp.unwrap_or(base + Duration::minutes(index as i64)),
            })
            .collect())
    }

    async fn user_info(&self, user_id: &str) -> Result<UserProfile, ToolError> {
        self.profile(user_id).ok_or_else(|| ToolError::not_found(ResourceKind::User, user_id))
    }

    async fn channel_members(&self, scope: &ConversationScope) -> Result<Vec<String>, ToolError> {
        self.check_scope(scope)?;
        Ok(self.authors())
    }

    async fn list_users(&self) -> Result<Vec<UserProfile>, ToolError> {
        let mut users = self.transcript.users.clone();
        for author in self.authors() {
            if !users.iter().any(|user| user.id == author) {
                if let Some(profile) = self.profile(&author) {
                    users.push(profile);
                }
            }
        }
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use betweenus_core::domain::invocation::ConversationScope;
    use betweenus_core::errors::ToolErrorKind;
    use betweenus_core::sources::ConversationSource;

    use super::{Transcript, TranscriptSource, DEFAULT_CHANNEL};

    fn source() -> TranscriptSource {
        let transcript = Transcript::parse(
            r#"{
                "messages": [
                    { "author": "U1", "text": "one" },
                    { "author": "U2", "text": "two" },
                    { "author": "U1", "text": "three" }
                ],
                "users": [{ "id": "U1", "name": "dana", "real_name": "Dana Ortiz" }]
            }"#,
        )
        .expect("transcript");
        TranscriptSource::new(transcript)
    }

    #[tokio::test]
    async fn history_keeps_the_most_recent_messages_in_order() {
        let source = source();
        let scope = ConversationScope(DEFAULT_CHANNEL.to_string());

        let history = source.fetch_history(&scope, 2).await.expect("history");
        let texts = history.iter().map(|message| message.text.as_str()).collect::<Vec<_>>();
        assert_eq!(texts, vec!["two", "three"]);
        assert!(history[0].timestamp < history[1].timestamp);
    }

    #[tokio::test]
    async fn other_channels_are_not_found() {
        let error = source()
            .fetch_history(&ConversationScope("C404".to_string()), 10)
            .await
            .expect_err("missing");
        assert_eq!(error.kind(), ToolErrorKind::NotFound);
    }

    #[tokio::test]
    async fn authors_without_profiles_are_still_known() {
        let source = source();
        assert_eq!(source.user_info("U1").await.expect("U1").real_name.as_deref(), Some("Dana Ortiz"));
        assert_eq!(source.user_info("U2").await.expect("U2").name, "u2");
        assert!(source.user_info("U3").await.is_err());
        assert_eq!(source.list_users().await.expect("users").len(), 2);
    }
}
