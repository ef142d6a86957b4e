use std::path::Path;
use std::sync::Arc;

use betweenus_agent::{register_builtins, MediationOutcome, MediationRuntime, RegistryConfig, ToolRegistry};
use betweenus_core::config::{AppConfig, ConfigOverrides, LoadOptions, ReasonerKind};
use betweenus_core::domain::invocation::{ConversationScope, Invocation};
use betweenus_core::errors::MediationError;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::commands::CommandResult;
use crate::transcript::{Transcript, TranscriptSource};

const COMMAND: &str = "mediate";

pub struct MediateArgs<'a> {
    pub transcript: &'a Path,
    pub request: Option<&'a str>,
    pub reasoner: Option<ReasonerKind>,
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct MediationReport<'a> {
    command: &'static str,
    status: &'static str,
    invocation_id: &'a str,
    label: &'static str,
    fact_score: u32,
    emotion_score: u32,
    rationale: &'a str,
    termination: &'static str,
    cycles: usize,
    strategy: &'a str,
    sections: Vec<ReportSection<'a>>,
}

#[derive(Debug, Serialize)]
struct ReportSection<'a> {
    key: &'a str,
    label: &'a str,
    body: &'a str,
}

/// Runs one mediation over a transcript file, offline. The heuristic reasoner is used unless
/// another one is asked for.
pub fn run(args: MediateArgs<'_>) -> CommandResult {
    let config = match AppConfig::load(LoadOptions {
        offline: true,
        overrides: ConfigOverrides {
            triage_reasoner: Some(args.reasoner.unwrap_or(ReasonerKind::Heuristic)),
            search_enabled: Some(false),
            ..ConfigOverrides::default()
        },
        ..LoadOptions::default()
    }) {
        Ok(config) => config,
        Err(error) => return CommandResult::failure(COMMAND, "config_validation", error.to_string(), 2),
    };

    let transcript = match Transcript::load(args.transcript) {
        Ok(transcript) => transcript,
        Err(error) => return CommandResult::failure(COMMAND, "transcript", error.to_string(), 3),
    };
    let source = Arc::new(TranscriptSource::new(transcript));
    let invocation = Invocation::new(ConversationScope(source.channel().to_string()), "cli")
        .with_request_text(args.request.unwrap_or_default());

    let mut registry = ToolRegistry::new(RegistryConfig::from(&config));
    if let Err(error) = register_builtins(&mut registry, source, None) {
        return CommandResult::failure(COMMAND, "runtime_setup", error.to_string(), 5);
    }
    let runtime = match MediationRuntime::from_config(&config, Arc::new(registry)) {
        Ok(runtime) => runtime,
        Err(error) => return CommandResult::failure(COMMAND, "runtime_setup", error.to_string(), 5),
    };

    let executor = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(executor) => executor,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "runtime_setup",
                format!("failed to initialize async runtime: {error}"),
                5,
            );
        }
    };

    match executor.block_on(runtime.mediate(&invocation, &CancellationToken::new())) {
        Ok(outcome) if args.json => CommandResult { exit_code: 0, output: render_json(&outcome) },
        Ok(outcome) => CommandResult { exit_code: 0, output: render_human(&outcome) },
        Err(error) => failure(&error),
    }
}

fn failure(error: &MediationError) -> CommandResult {
    let message = error.user_message().unwrap_or_else(|| error.to_string());
    CommandResult::failure(COMMAND, error.error_class(), message, 4)
}

fn render_json(outcome: &MediationOutcome) -> String {
    let report = MediationReport {
        command: COMMAND,
        status: "ok",
        invocation_id: &outcome.invocation_id.0,
        label: outcome.classification.label.as_str(),
        fact_score: outcome.classification.fact_score,
        emotion_score: outcome.classification.emotion_score,
        rationale: &outcome.classification.rationale,
        termination: outcome.termination.as_str(),
        cycles: outcome.evidence.len(),
        strategy: outcome.response.strategy(),
        sections: outcome
            .formatted
            .sections
            .iter()
            .map(|section| ReportSection {
                key: &section.key,
                label: &section.label,
                body: &section.body,
            })
            .collect(),
    };
    serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
        CommandResult::failure(COMMAND, "serialization", error.to_string(), 1).output
    })
}

fn render_human(outcome: &MediationOutcome) -> String {
    let classification = &outcome.classification;
    format!(
        "{label} (fact {fact}, emotion {emotion}; {cycles} cycles, {termination})\n\n{text}",
        label = classification.label,
        fact = classification.fact_score,
        emotion = classification.emotion_score,
        cycles = outcome.evidence.len(),
        termination = outcome.termination.as_str(),
        text = outcome.formatted.text,
    )
}
