use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use betweenus_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

struct Field {
    key: &'static str,
    env_key: &'static str,
    value: String,
}

impl Field {
    fn new(key: &'static str, env_key: &'static str, value: impl Into<String>) -> Self {
        Self { key, env_key, value: value.into() }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            Some(field.env_key),
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    vec![
        Field::new(
            "slack.bot_token",
            "BETWEENUS_SLACK_BOT_TOKEN",
            redact_token(config.slack.bot_token.expose_secret()),
        ),
        Field::new(
            "slack.signing_secret",
            "BETWEENUS_SLACK_SIGNING_SECRET",
            redact_secret(config.slack.signing_secret.expose_secret()),
        ),
        Field::new("slack.api_base_url", "BETWEENUS_SLACK_API_BASE_URL", &config.slack.api_base_url),
        Field::new("llm.provider", "BETWEENUS_LLM_PROVIDER", format!("{:?}", config.llm.provider)),
        Field::new("llm.model", "BETWEENUS_LLM_MODEL", &config.llm.model),
        Field::new(
            "llm.base_url",
            "BETWEENUS_LLM_BASE_URL",
            config.llm.base_url.as_deref().unwrap_or("<unset>"),
        ),
        Field::new(
            "llm.api_key",
            "BETWEENUS_LLM_API_KEY",
            if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" },
        ),
        Field::new(
            "llm.system_prompt_path",
            "BETWEENUS_LLM_SYSTEM_PROMPT_PATH",
            config
                .llm
                .system_prompt_path
                .as_deref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "<built-in>".to_string()),
        ),
        Field::new("search.enabled", "BETWEENUS_SEARCH_ENABLED", config.search.enabled.to_string()),
        Field::new(
            "search.api_key",
            "BETWEENUS_SEARCH_API_KEY",
            if config.search.api_key.is_some() { "<redacted>" } else { "<unset>" },
        ),
        Field::new(
            "search.engine_id",
            "BETWEENUS_SEARCH_ENGINE_ID",
            config.search.engine_id.as_deref().unwrap_or("<unset>"),
        ),
        Field::new(
            "triage.reasoner",
            "BETWEENUS_TRIAGE_REASONER",
            format!("{:?}", config.triage.reasoner),
        ),
        Field::new(
            "triage.max_cycles",
            "BETWEENUS_TRIAGE_MAX_CYCLES",
            config.triage.max_cycles.to_string(),
        ),
        Field::new(
            "triage.upstream_retries",
            "BETWEENUS_TRIAGE_UPSTREAM_RETRIES",
            config.triage.upstream_retries.to_string(),
        ),
        Field::new(
            "triage.tool_timeout_secs",
            "BETWEENUS_TRIAGE_TOOL_TIMEOUT_SECS",
            config.triage.tool_timeout_secs.to_string(),
        ),
        Field::new(
            "server.bind_address",
            "BETWEENUS_SERVER_BIND_ADDRESS",
            &config.server.bind_address,
        ),
        Field::new("server.port", "BETWEENUS_SERVER_PORT", config.server.port.to_string()),
        Field::new(
            "server.graceful_shutdown_secs",
            "BETWEENUS_SERVER_GRACEFUL_SHUTDOWN_SECS",
            config.server.graceful_shutdown_secs.to_string(),
        ),
        Field::new("logging.level", "BETWEENUS_LOGGING_LEVEL", &config.logging.level),
        Field::new(
            "logging.format",
            "BETWEENUS_LOGGING_FORMAT",
            format!("{:?}", config.logging.format),
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("betweenus.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/betweenus.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}

fn redact_secret(secret: &str) -> String {
    if secret.trim().is_empty() {
        "<empty>".to_string()
    } else {
        "<redacted>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, redact_secret, redact_token};

    #[test]
    fn tokens_keep_only_their_prefix() {
        assert_eq!(redact_token("xoxb-123-456"), "xoxb-***");
        assert_eq!(redact_token("  "), "<empty>");
        assert_eq!(redact_token("opaque"), "<redacted>");
        assert_eq!(redact_secret("8f742231"), "<redacted>");
    }

    #[test]
    fn dotted_paths_are_found_in_nested_tables() {
        let doc = "[triage]\nmax_cycles = 4\n".parse::<Value>().expect("toml");
        assert!(contains_path(&doc, "triage.max_cycles"));
        assert!(!contains_path(&doc, "triage.reasoner"));
    }
}
