//! Turns an `app_mention` into an engine invocation: strips the bot mention, picks up an
//! explicit `<#C…|name>` channel reference and an optional "last N messages" hint.

use betweenus_core::domain::invocation::{ConversationScope, Invocation};

use crate::events::AppMentionEvent;

/// Upper bound for a "last N messages" hint; the registry caps it again from configuration.
const MAX_HINTED_LIMIT: u32 = 1_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MentionRequest {
    pub channel_id: String,
    pub user_id: String,
    pub thread_ts: String,
    pub text: String,
    pub explicit_channel: Option<String>,
    pub history_limit: Option<u32>,
}

impl MentionRequest {
    pub fn is_help(&self) -> bool {
        matches!(self.text.trim().trim_end_matches(['?', '!', '.']).to_lowercase().as_str(), "help" | "usage")
    }

    /// The conversation the engine should look at.
    pub fn target_channel(&self) -> &str {
        self.explicit_channel.as_deref().unwrap_or(&self.channel_id)
    }

    pub fn to_invocation(&self) -> Invocation {
        let mut invocation = Invocation::new(ConversationScope(self.channel_id.clone()), &self.user_id)
            .with_request_text(&self.text);
        if let Some(channel) = &self.explicit_channel {
            invocation = invocation.with_explicit_scope(ConversationScope(channel.clone()));
        }
        if let Some(limit) = self.history_limit {
            invocation = invocation.with_history_limit(limit);
        }
        invocation
    }
}

#[derive(Clone, Debug, Default)]
pub struct MentionParser {
    bot_user_id: Option<String>,
}

impl MentionParser {
    pub fn new(bot_user_id: Option<String>) -> Self {
        Self { bot_user_id }
    }

    pub fn parse(&self, event: &AppMentionEvent) -> MentionRequest {
        let text = strip_bot_mention(&event.text, self.bot_user_id.as_deref());
        MentionRequest {
            channel_id: event.channel_id.clone(),
            user_id: event.user_id.clone(),
            thread_ts: event.reply_thread_ts().to_owned(),
            explicit_channel: channel_reference(&text),
            history_limit: history_limit_hint(&text),
            text,
        }
    }
}

/// Removes the bot's own mention. Without a known bot id, the leading mention is removed.
pub fn strip_bot_mention(text: &str, bot_user_id: Option<&str>) -> String {
    let stripped = match bot_user_id {
        Some(id) => text.replace(&format!("<@{id}>"), " "),
        None => {
            let trimmed = text.trim_start();
            match (trimmed.starts_with("<@"), trimmed.find('>')) {
                (true, Some(end)) => trimmed[end + 1..].to_owned(),
                _ => trimmed.to_owned(),
            }
        }
    };
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First `<#C…>` or `<#C…|name>` reference in the text.
pub fn channel_reference(text: &str) -> Option<String> {
    let mut rest = text;
    while let Some(start) = rest.find("<#") {
        let candidate = &rest[start + 2..];
        let end = candidate.find('>')?;
        let id = candidate[..end].split('|').next().unwrap_or_default().trim();
        if is_channel_id(id) {
            return Some(id.to_owned());
        }
        rest = &candidate[end + 1..];
    }
    None
}

/// "last 50 messages", "last 50 msgs" or plain "last 50".
pub fn history_limit_hint(text: &str) -> Option<u32> {
    let words = text
        .split_whitespace()
        .map(|word| word.trim_matches(|ch: char| !ch.is_ascii_alphanumeric()).to_lowercase())
        .collect::<Vec<_>>();
    words.windows(2).find_map(|pair| {
        if pair[0] != "last" {
            return None;
        }
        pair[1].parse::<u32>().ok().filter(|limit| *limit > 0).map(|limit| limit.min(MAX_HINTED_LIMIT))
    })
}

fn is_channel_id(id: &str) -> bool {
    id.len() >= 2
        && matches!(id.as_bytes()[0], b'C' | b'G' | b'D')
        && id.bytes().all(|byte| byte.is_ascii_uppercase() || byte.is_ascii_digit())
}
