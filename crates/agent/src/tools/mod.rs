use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use betweenus_core::config::AppConfig;
use betweenus_core::errors::{ToolError, ToolErrorKind};
use betweenus_core::sources::{ConversationSource, SearchBackend};
use jsonschema::JSONSchema;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

pub mod history;
pub mod people;
pub mod search;

pub use history::{ChannelDigestTool, FetchHistoryTool};
pub use people::{FindUserByNameTool, ListChannelMembersTool, MentionedUsersTool, UserInfoTool};
pub use search::{GoogleSearchBackend, WebSearchTool};

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn argument_schema(&self) -> Value;
    fn result_schema(&self) -> Value;

    fn failure_modes(&self) -> &'static [ToolErrorKind] {
        &[ToolErrorKind::Argument, ToolErrorKind::Upstream]
    }

    /// Per-tool timeout; `None` uses the registry default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn execute(&self, input: Value) -> Result<Value, ToolError>;
}

/// Read-only description of a registered tool, shown to reasoners.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolContract {
    pub name: &'static str,
    pub description: &'static str,
    pub arguments: Value,
    pub result: Value,
    pub failure_modes: Vec<ToolErrorKind>,
    #[serde(skip)]
    pub timeout: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistoryLimits {
    pub default_limit: u32,
    pub max_limit: u32,
}

impl HistoryLimits {
    pub fn resolve(&self, requested: Option<u32>) -> u32 {
        requested.unwrap_or(self.default_limit).clamp(1, self.max_limit.max(1))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryConfig {
    pub default_timeout: Duration,
    pub history: HistoryLimits,
    pub search_max_results: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(15),
            history: HistoryLimits { default_limit: 20, max_limit: 200 },
            search_max_results: 5,
        }
    }
}

impl From<&AppConfig> for RegistryConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            default_timeout: Duration::from_secs(config.triage.tool_timeout_secs),
            history: HistoryLimits {
                default_limit: config.triage.default_history_limit,
                max_limit: config.triage.max_history_limit,
            },
            search_max_results: config.search.max_results,
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("tool `{0}` is already registered")]
    Duplicate(&'static str),
    #[error("tool `{tool}` declares an invalid {which} schema: {message}")]
    InvalidSchema { tool: &'static str, which: &'static str, message: String },
}

struct RegisteredTool {
    contract: ToolContract,
    arguments: JSONSchema,
    result: JSONSchema,
    tool: Arc<dyn Tool>,
}

/// Name → tool mapping. Built once at startup and shared behind an `Arc`; invocation never
/// mutates it and never retries.
pub struct ToolRegistry {
    config: RegistryConfig,
    tools: BTreeMap<&'static str, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self { config, tools: BTreeMap::new() }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn register<T>(&mut self, tool: T) -> Result<(), RegistryError>
    where
        T: Tool + 'static,
    {
        let name = tool.name();
        if self.tools.contains_key(name) {
            return Err(RegistryError::Duplicate(name));
        }

        let contract = ToolContract {
            name,
            description: tool.description(),
            arguments: tool.argument_schema(),
            result: tool.result_schema(),
            failure_modes: tool.failure_modes().to_vec(),
            timeout: tool.timeout().unwrap_or(self.config.default_timeout),
        };
        let arguments = compile_schema(name, "argument", &contract.arguments)?;
        let result = compile_schema(name, "result", &contract.result)?;

        self.tools.insert(name, RegisteredTool { contract, arguments, result, tool: Arc::new(tool) });
        Ok(())
    }

    /// Validates arguments, runs the tool under its timeout and checks the result shape.
    pub async fn invoke(&self, name: &str, arguments: &Value) -> Result<Value, ToolError> {
        let Some(entry) = self.tools.get(name) else {
            return Err(ToolError::argument(format!("unknown tool `{name}`")));
        };

        if let Err(errors) = entry.arguments.validate(arguments) {
            let messages = errors.map(|error| error.to_string()).collect::<Vec<_>>();
            return Err(ToolError::argument(format!(
                "arguments for `{name}` do not match its schema: {}",
                messages.join("; ")
            )));
        }

        let timeout = entry.contract.timeout;
        let value =
            match tokio::time::timeout(timeout, entry.tool.execute(arguments.clone())).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(ToolError::upstream(format!(
                        "`{name}` timed out after {}ms",
                        timeout.as_millis()
                    )))
                }
            };

        if let Err(errors) = entry.result.validate(&value) {
            let messages = errors.map(|error| error.to_string()).collect::<Vec<_>>();
            return Err(ToolError::upstream(format!(
                "`{name}` returned a malformed result: {}",
                messages.join("; ")
            )));
        }

        debug!(event_name = "tool.invoked", tool = name, "tool call completed");
        Ok(value)
    }

    pub fn contract(&self, name: &str) -> Option<&ToolContract> {
        self.tools.get(name).map(|entry| &entry.contract)
    }

    pub fn contracts(&self) -> Vec<ToolContract> {
        self.tools.values().map(|entry| entry.contract.clone()).collect()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.keys().copied().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Registers the standard tool set. `web_search` is only added when a backend is supplied.
pub fn register_builtins(
    registry: &mut ToolRegistry,
    source: Arc<dyn ConversationSource>,
    search: Option<Arc<dyn SearchBackend>>,
) -> Result<(), RegistryError> {
    let limits = registry.config().history;
    let max_results = registry.config().search_max_results;

    registry.register(FetchHistoryTool::new(source.clone(), limits))?;
    registry.register(ChannelDigestTool::new(source.clone(), limits))?;
    registry.register(UserInfoTool::new(source.clone()))?;
    registry.register(ListChannelMembersTool::new(source.clone()))?;
    registry.register(FindUserByNameTool::new(source))?;
    registry.register(MentionedUsersTool)?;
    if let Some(backend) = search {
        registry.register(WebSearchTool::new(backend, max_results))?;
    }
    Ok(())
}

fn compile_schema(
    tool: &'static str,
    which: &'static str,
    schema: &Value,
) -> Result<JSONSchema, RegistryError> {
    JSONSchema::compile(schema).map_err(|error| RegistryError::InvalidSchema {
        tool,
        which,
        message: error.to_string(),
    })
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use betweenus_core::errors::{ToolError, ToolErrorKind};
    use serde_json::{json, Value};

    use super::fakes::InMemorySource;
    use super::{register_builtins, RegistryConfig, RegistryError, Tool, ToolRegistry};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn description(&self) -> &'static str {
            "Echoes its input."
        }

        fn argument_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "text": { "type": "string", "minLength": 1 } },
                "required": ["text"],
                "additionalProperties": false
            })
        }

        fn result_schema(&self) -> Value {
            json!({ "type": "object", "required": ["text"] })
        }

        async fn execute(&self, input: Value) -> Result<Value, ToolError> {
            Ok(input)
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn description(&self) -> &'static str {
            "Never finishes in time."
        }

        fn argument_schema(&self) -> Value {
            json!({ "type": "object" })
        }

        fn result_schema(&self) -> Value {
            json!({ "type": "object" })
        }

        fn timeout(&self) -> Option<Duration> {
            Some(Duration::from_millis(50))
        }

        async fn execute(&self, _input: Value) -> Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!({}))
        }
    }

    struct MalformedTool;

    #[async_trait]
    impl Tool for MalformedTool {
        fn name(&self) -> &'static str {
            "malformed"
        }

        fn description(&self) -> &'static str {
            "Returns the wrong shape."
        }

        fn argument_schema(&self) -> Value {
            json!({ "type": "object" })
        }

        fn result_schema(&self) -> Value {
            json!({ "type": "object", "required": ["items"] })
        }

        async fn execute(&self, _input: Value) -> Result<Value, ToolError> {
            Ok(json!({ "unexpected": true }))
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_an_argument_error() {
        let registry = ToolRegistry::new(RegistryConfig::default());
        let error = registry.invoke("nope", &json!({})).await.expect_err("unknown tool");
        assert_eq!(error.kind(), ToolErrorKind::Argument);
        assert!(error.to_string().contains("nope"));
    }

    #[tokio::test]
    async fn arguments_are_validated_before_execution() {
        let mut registry = ToolRegistry::new(RegistryConfig::default());
        registry.register(EchoTool).expect("register echo");

        let error = registry.invoke("echo", &json!({ "text": 4 })).await.expect_err("bad args");
        assert_eq!(error.kind(), ToolErrorKind::Argument);

        let value = registry.invoke("echo", &json!({ "text": "hi" })).await.expect("valid args");
        assert_eq!(value["text"], "hi");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_surfaces_as_upstream_error() {
        let mut registry = ToolRegistry::new(RegistryConfig::default());
        registry.register(SlowTool).expect("register slow");

        let error = registry.invoke("slow", &json!({})).await.expect_err("timeout");
        assert!(error.is_retryable());
        assert!(error.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn malformed_result_is_an_upstream_error() {
        let mut registry = ToolRegistry::new(RegistryConfig::default());
        registry.register(MalformedTool).expect("register malformed");

        let error = registry.invoke("malformed", &json!({})).await.expect_err("bad result");
        assert_eq!(error.kind(), ToolErrorKind::Upstream);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = ToolRegistry::new(RegistryConfig::default());
        registry.register(EchoTool).expect("first registration");
        let error = registry.register(EchoTool).expect_err("second registration");
        assert!(matches!(error, RegistryError::Duplicate("echo")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn builtins_exclude_search_without_backend() {
        let mut registry = ToolRegistry::new(RegistryConfig::default());
        register_builtins(&mut registry, Arc::new(InMemorySource::default()), None)
            .expect("register builtins");

        assert_eq!(
            registry.names(),
            vec![
                "channel_digest",
                "fetch_history",
                "find_user_by_name",
                "list_channel_members",
                "mentioned_users",
                "user_info",
            ]
        );
        assert!(!registry.contains("web_search"));
        let contract = registry.contract("fetch_history").expect("contract");
        assert_eq!(contract.timeout, Duration::from_secs(15));
    }
}
