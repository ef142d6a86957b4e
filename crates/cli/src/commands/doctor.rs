use std::sync::Arc;

use betweenus_agent::llm::{load_system_prompt, HttpLlmClient};
use betweenus_agent::tools::GoogleSearchBackend;
use betweenus_agent::{register_builtins, RegistryConfig, ToolRegistry};
use betweenus_core::config::{AppConfig, LoadOptions, ReasonerKind};
use betweenus_core::sources::SearchBackend;
use betweenus_slack::web::SlackWebClient;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            details: "skipped because configuration did not load".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass("config_validation", "configuration loaded and validated"));
            checks.push(DoctorCheck::pass(
                "slack_credentials",
                "bot token and signing secret validated by config contract",
            ));
            checks.push(check_reasoner(&config));
            checks.push(check_tools(&config));
            checks.push(check_slack_connectivity(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            for name in ["slack_credentials", "reasoner", "tool_registry", "slack_connectivity"] {
                checks.push(DoctorCheck::skipped(name));
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_reasoner(config: &AppConfig) -> DoctorCheck {
    if config.triage.reasoner == ReasonerKind::Heuristic {
        return DoctorCheck::pass("reasoner", "heuristic reasoner needs no language model");
    }

    let client = match HttpLlmClient::from_config(&config.llm) {
        Ok(client) => client,
        Err(error) => return DoctorCheck::fail("reasoner", error.to_string()),
    };
    match load_system_prompt(&config.llm) {
        Ok(_) => DoctorCheck::pass(
            "reasoner",
            format!("{:?} model `{}` at {}", config.llm.provider, config.llm.model, client.endpoint()),
        ),
        Err(error) => DoctorCheck::fail("reasoner", error.to_string()),
    }
}

fn check_tools(config: &AppConfig) -> DoctorCheck {
    let slack = match SlackWebClient::from_config(&config.slack) {
        Ok(slack) => Arc::new(slack),
        Err(error) => return DoctorCheck::fail("tool_registry", error.to_string()),
    };
    let search = match GoogleSearchBackend::from_config(&config.search) {
        Ok(search) => search.map(|backend| Arc::new(backend) as Arc<dyn SearchBackend>),
        Err(error) => return DoctorCheck::fail("tool_registry", error.to_string()),
    };

    let mut registry = ToolRegistry::new(RegistryConfig::from(config));
    match register_builtins(&mut registry, slack, search) {
        Ok(()) => DoctorCheck::pass("tool_registry", registry.names().join(", ")),
        Err(error) => DoctorCheck::fail("tool_registry", error.to_string()),
    }
}

fn check_slack_connectivity(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck::fail(
                "slack_connectivity",
                format!("failed to initialize async runtime: {error}"),
            );
        }
    };

    let result = SlackWebClient::from_config(&config.slack)
        .and_then(|client| runtime.block_on(client.auth_test()));

    match result {
        Ok(user_id) => DoctorCheck::pass("slack_connectivity", format!("auth.test ok as `{user_id}`")),
        Err(error) => DoctorCheck::fail("slack_connectivity", error.to_string()),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
