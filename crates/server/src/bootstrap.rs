use std::sync::Arc;

use betweenus_agent::tools::{GoogleSearchBackend, RegistryError};
use betweenus_agent::{register_builtins, MediationRuntime, RegistryConfig, RuntimeError, ToolRegistry};
use betweenus_core::config::{AppConfig, ConfigError, LoadOptions};
use betweenus_core::errors::ToolError;
use betweenus_core::sources::SearchBackend;
use betweenus_slack::web::{SlackApiError, SlackWebClient};
use thiserror::Error;
use tracing::{info, warn};

pub struct Application {
    pub config: AppConfig,
    pub runtime: Arc<MediationRuntime>,
    pub slack: Arc<SlackWebClient>,
    /// `None` when `auth.test` failed; mentions then fall back to stripping the leading mention.
    pub bot_user_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("slack client setup failed: {0}")]
    Slack(#[source] SlackApiError),
    #[error("search backend setup failed: {0}")]
    Search(#[source] ToolError),
    #[error("tool registration failed: {0}")]
    Registry(#[from] RegistryError),
    #[error("mediation runtime setup failed: {0}")]
    Runtime(#[from] RuntimeError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        reasoner = ?config.triage.reasoner,
        "starting application bootstrap"
    );

    let slack = Arc::new(SlackWebClient::from_config(&config.slack).map_err(BootstrapError::Slack)?);
    let search = GoogleSearchBackend::from_config(&config.search)
        .map_err(BootstrapError::Search)?
        .map(|backend| Arc::new(backend) as Arc<dyn SearchBackend>);
    if search.is_none() {
        info!(
            event_name = "system.bootstrap.search_disabled",
            correlation_id = "bootstrap",
            "web search is not configured; web_search tool will not be registered"
        );
    }

    let mut registry = ToolRegistry::new(RegistryConfig::from(&config));
    register_builtins(&mut registry, slack.clone(), search)?;
    info!(
        event_name = "system.bootstrap.tools_registered",
        correlation_id = "bootstrap",
        tools = ?registry.names(),
        "tool registry ready"
    );

    let runtime = Arc::new(MediationRuntime::from_config(&config, Arc::new(registry))?);

    let bot_user_id = match slack.auth_test().await {
        Ok(user_id) => {
            info!(
                event_name = "system.bootstrap.slack_identified",
                correlation_id = "bootstrap",
                bot_user_id = %user_id,
                "slack bot identity resolved"
            );
            Some(user_id)
        }
        Err(error) => {
            warn!(
                event_name = "system.bootstrap.slack_identity_unavailable",
                correlation_id = "bootstrap",
                error = %error,
                "could not resolve bot identity; continuing without it"
            );
            None
        }
    };

    Ok(Application { config, runtime, slack, bot_user_id })
}

#[cfg(test)]
mod tests {
    use betweenus_core::config::{ConfigOverrides, LoadOptions, ReasonerKind};

    use crate::bootstrap::bootstrap;

    #[tokio::test]
    async fn bootstrap_fails_fast_with_an_app_level_token() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                slack_bot_token: Some("xapp-not-a-bot-token".to_string()),
                slack_signing_secret: Some("secret".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("slack.bot_token"));
    }

    #[tokio::test]
    async fn bootstrap_continues_when_slack_identity_is_unreachable() {
        let app = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                slack_bot_token: Some("xoxb-test".to_string()),
                slack_signing_secret: Some("secret".to_string()),
                slack_api_base_url: Some("http://127.0.0.1:9/api".to_string()),
                search_enabled: Some(false),
                triage_reasoner: Some(ReasonerKind::Heuristic),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed without slack connectivity");

        assert_eq!(app.bot_user_id, None);
        let tools = app.runtime.registry().names();
        assert!(tools.contains(&"fetch_history"));
        assert!(!tools.contains(&"web_search"));
    }
}
