use std::fs;
use std::time::Duration;

use async_trait::async_trait;
use betweenus_core::config::{LlmConfig, LlmProvider};
use reqwest::{header, Client};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_MAX_TOKENS: u32 = 2_048;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are BetweenUs, a neutral workplace conflict analyst working inside a team chat. \
You read conversation threads, separate verifiable facts from feelings, and help colleagues \
understand each other. You never take sides, never diagnose people, and never invent \
messages that were not in the thread. When you suggest wording, you keep the speaker's \
intent but remove blame. Follow the output format you are asked for exactly.";

#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    /// Ask the provider for a JSON object when it supports a JSON mode.
    pub json_output: bool,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self { system: system.into(), prompt: prompt.into(), json_output: false }
    }

    pub fn json(mut self) -> Self {
        self.json_output = true;
        self
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm client is misconfigured: {0}")]
    Config(String),
    #[error("llm request failed: {0}")]
    Transport(String),
    #[error("llm provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("llm response could not be decoded: {0}")]
    Protocol(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Config(_) | Self::Protocol(_) => false,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
}

/// Reads the operator's system prompt override, or returns the built-in prompt.
pub fn load_system_prompt(config: &LlmConfig) -> Result<String, LlmError> {
    match &config.system_prompt_path {
        Some(path) => fs::read_to_string(path).map_err(|error| {
            LlmError::Config(format!("cannot read system prompt `{}`: {error}", path.display()))
        }),
        None => Ok(DEFAULT_SYSTEM_PROMPT.to_owned()),
    }
}

/// Chat-completions client for OpenAI-compatible providers (OpenAI, Groq, Ollama) and the
/// Anthropic messages API.
pub struct HttpLlmClient {
    client: Client,
    provider: LlmProvider,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
    temperature: f32,
    max_retries: u32,
}

impl HttpLlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| LlmError::Config(error.to_string()))?;

        Ok(Self {
            client,
            provider: config.provider,
            endpoint: endpoint_for(config.provider, config.base_url.as_deref()),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send_once(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let body = match self.provider {
            LlmProvider::Anthropic => anthropic_body(&self.model, self.temperature, request),
            LlmProvider::OpenAi | LlmProvider::Groq | LlmProvider::Ollama => {
                openai_body(&self.model, self.temperature, request)
            }
        };

        let mut builder = self
            .client
            .post(&self.endpoint)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&body);
        if let Some(api_key) = &self.api_key {
            builder = match self.provider {
                LlmProvider::Anthropic => builder
                    .header("x-api-key", api_key.expose_secret())
                    .header("anthropic-version", ANTHROPIC_VERSION),
                _ => builder.bearer_auth(api_key.expose_secret()),
            };
        }

        let response =
            builder.send().await.map_err(|error| LlmError::Transport(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status: status.as_u16(), body: truncate(&body, 500) });
        }

        let payload: Value =
            response.json().await.map_err(|error| LlmError::Protocol(error.to_string()))?;
        extract_text(self.provider, &payload)
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let mut attempt = 0;
        loop {
            match self.send_once(request).await {
                Ok(text) => return Ok(text),
                Err(error) if error.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        event_name = "llm.retry",
                        attempt,
                        error = %error,
                        "retrying llm request"
                    );
                    tokio::time::sleep(Duration::from_millis(250 * u64::from(attempt))).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

fn endpoint_for(provider: LlmProvider, base_url: Option<&str>) -> String {
    let base = base_url.map(|url| url.trim_end_matches('/').to_owned());
    match provider {
        LlmProvider::OpenAi => format!(
            "{}/chat/completions",
            base.unwrap_or_else(|| "https://api.openai.com/v1".to_owned())
        ),
        LlmProvider::Groq => format!(
            "{}/chat/completions",
            base.unwrap_or_else(|| "https://api.groq.com/openai/v1".to_owned())
        ),
        LlmProvider::Ollama => format!(
            "{}/v1/chat/completions",
            base.unwrap_or_else(|| "http://localhost:11434".to_owned())
        ),
        LlmProvider::Anthropic => format!(
            "{}/v1/messages",
            base.unwrap_or_else(|| "https://api.anthropic.com".to_owned())
        ),
    }
}

fn openai_body(model: &str, temperature: f32, request: &CompletionRequest) -> Value {
    let mut body = json!({
        "model": model,
        "temperature": temperature,
        "messages": [
            { "role": "system", "content": request.system },
            { "role": "user", "content": request.prompt }
        ]
    });
    if request.json_output {
        body["response_format"] = json!({ "type": "json_object" });
    }
    body
}

fn anthropic_body(model: &str, temperature: f32, request: &CompletionRequest) -> Value {
    json!({
        "model": model,
        "temperature": temperature,
        "max_tokens": ANTHROPIC_MAX_TOKENS,
        "system": request.system,
        "messages": [{ "role": "user", "content": request.prompt }]
    })
}

fn extract_text(provider: LlmProvider, payload: &Value) -> Result<String, LlmError> {
    let text = match provider {
        LlmProvider::Anthropic => payload
            .get("content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|block| block.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("")
            }),
        _ => payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_owned),
    };

    text.filter(|text| !text.trim().is_empty())
        .ok_or_else(|| LlmError::Protocol("response carried no text content".to_owned()))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }
    let mut shortened = text.chars().take(max_chars).collect::<String>();
    shortened.push('…');
    shortened
}

/// Finds the outermost JSON object in model output, tolerating code fences and prose around it.
pub fn extract_json_object(raw: &str) -> Option<Value> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&raw[start..=end]).ok().filter(Value::is_object)
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{CompletionRequest, LlmClient, LlmError};

    /// Replays scripted completions in order; the last one repeats.
    pub struct ScriptedLlm {
        replies: Mutex<Vec<Result<String, LlmError>>>,
        pub prompts: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedLlm {
        pub fn new(replies: Vec<Result<String, LlmError>>) -> Self {
            Self { replies: Mutex::new(replies), prompts: Mutex::new(Vec::new()) }
        }

        pub fn replying(text: &str) -> Self {
            Self::new(vec![Ok(text.to_owned())])
        }

        pub fn failing() -> Self {
            Self::new(vec![Err(LlmError::Transport("connection refused".to_owned()))])
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
            self.prompts.lock().expect("prompts lock").push(request.clone());
            let mut replies = self.replies.lock().expect("replies lock");
            if replies.len() > 1 {
                replies.remove(0)
            } else {
                clone_reply(&replies[0])
            }
        }
    }

    fn clone_reply(reply: &Result<String, LlmError>) -> Result<String, LlmError> {
        match reply {
            Ok(text) => Ok(text.clone()),
            Err(LlmError::Transport(message)) => Err(LlmError::Transport(message.clone())),
            Err(other) => Err(LlmError::Protocol(other.to_string())),
        }
    }
}
