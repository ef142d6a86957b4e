use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use betweenus_core::config::SearchConfig;
use betweenus_core::domain::conversation::SearchResult;
use betweenus_core::errors::ToolError;
use betweenus_core::sources::SearchBackend;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use super::Tool;

pub struct WebSearchTool {
    backend: Arc<dyn SearchBackend>,
    max_results: u32,
}

impl WebSearchTool {
    pub fn new(backend: Arc<dyn SearchBackend>, max_results: u32) -> Self {
        Self { backend, max_results }
    }
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &'static str {
        "web_search"
    }

    fn description(&self) -> &'static str {
        "Search the web for public, factual context (documentation, standards, release notes) relevant to a disputed claim."
    }

    fn argument_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "query": { "type": "string", "minLength": 2 } },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    fn result_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "results": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["title", "snippet", "url"]
                    }
                }
            },
            "required": ["query", "results"]
        })
    }

    async fn execute(&self, input: Value) -> Result<Value, ToolError> {
        let args: SearchArgs =
            serde_json::from_value(input).map_err(|error| ToolError::argument(error.to_string()))?;
        let results = self.backend.search(&args.query, self.max_results).await?;
        Ok(json!({ "query": args.query, "results": results }))
    }
}

/// Google Programmable Search (Custom Search JSON API) backend.
pub struct GoogleSearchBackend {
    client: Client,
    api_key: SecretString,
    engine_id: String,
    base_url: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Deserialize)]
struct SearchItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    link: String,
}

impl GoogleSearchBackend {
    pub fn new(
        api_key: SecretString,
        engine_id: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ToolError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| ToolError::upstream(format!("search client: {error}")))?;
        Ok(Self { client, api_key, engine_id: engine_id.into(), base_url: base_url.into() })
    }

    /// `None` when search is disabled or not fully configured.
    pub fn from_config(config: &SearchConfig) -> Result<Option<Self>, ToolError> {
        if !config.enabled {
            return Ok(None);
        }
        let (Some(api_key), Some(engine_id)) = (&config.api_key, &config.engine_id) else {
            return Ok(None);
        };
        Self::new(
            api_key.clone(),
            engine_id.clone(),
            config.base_url.clone(),
            Duration::from_secs(config.timeout_secs),
        )
        .map(Some)
    }
}

#[async_trait]
impl SearchBackend for GoogleSearchBackend {
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<SearchResult>, ToolError> {
        let num = max_results.clamp(1, 10).to_string();
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("key", self.api_key.expose_secret()),
                ("cx", self.engine_id.as_str()),
                ("q", query),
                ("num", num.as_str()),
            ])
            .send()
            .await
            .map_err(|error| ToolError::upstream(format!("search request failed: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "search backend returned an error status");
            return Err(ToolError::upstream(format!("search backend returned {status}")));
        }

        let payload: SearchResponse = response
            .json()
            .await
            .map_err(|error| ToolError::upstream(format!("failed to decode search response: {error}")))?;

        Ok(payload
            .items
            .into_iter()
            .filter(|item| !item.link.is_empty())
            .map(|item| SearchResult { title: item.title, snippet: item.snippet, url: item.link })
            .collect())
    }
}
