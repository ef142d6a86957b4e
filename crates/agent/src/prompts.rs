//! User-turn prompts for the model-backed reasoner, classifier and strategy. The persona lives
//! in the system prompt, which operators can replace.

use std::fmt::Write as _;

use betweenus_core::domain::classification::Classification;
use betweenus_core::domain::evidence::{Action, EvidenceLog};
use betweenus_core::domain::invocation::Invocation;

use crate::signals::{transcript, SignalReport};
use crate::tools::ToolContract;

const MAX_OBSERVATION_CHARS: usize = 4_000;
const MAX_TRANSCRIPT_LINES: usize = 200;

pub fn reasoner_prompt(
    invocation: &Invocation,
    evidence: &EvidenceLog,
    tools: &[ToolContract],
) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "A teammate asked for help with a conflict.");
    let _ = writeln!(prompt, "Requested by: {}", invocation.triggering_actor);
    let _ = writeln!(prompt, "Target conversation: {}", invocation.target_scope().as_str());
    if !invocation.request_text.trim().is_empty() {
        let _ = writeln!(prompt, "Their request: \"{}\"", invocation.request_text.trim());
    }
    if let Some(limit) = invocation.history_limit {
        let _ = writeln!(prompt, "They asked you to look at the last {limit} messages.");
    }

    let _ = writeln!(prompt, "\nTools you may call:");
    for tool in tools {
        let _ = writeln!(prompt, "- {}: {} Arguments schema: {}", tool.name, tool.description, tool.arguments);
    }

    let _ = writeln!(prompt, "\nEvidence so far:");
    if evidence.is_empty() {
        let _ = writeln!(prompt, "(none yet)");
    }
    prompt.push_str(&render_evidence(evidence));

    prompt.push_str(
        "\nDecide the single next step. Reply with one JSON object and nothing else:\n\
         {\"thought\": \"why\", \"action\": {\"tool\": \"<tool name>\", \"arguments\": {...}}} to gather more context, or\n\
         {\"thought\": \"what you concluded\", \"conclude\": true} once you understand the conflict well enough.\n",
    );
    prompt
}

pub fn classification_prompt(evidence: &EvidenceLog, report: &SignalReport) -> String {
    let mut prompt = String::new();
    prompt.push_str("Classify the conflict in this conversation.\n\nConversation:\n");
    prompt.push_str(&transcript_text(evidence));
    let _ = writeln!(
        prompt,
        "\nLexical signals: factual {} ({}), emotional {} ({}).",
        report.fact_score,
        report.factual_markers.join(", "),
        report.emotion_score,
        report.emotional_markers.join(", ")
    );
    prompt.push_str(
        "\nAnswer with one JSON object: {\"label\": \"fact-dominant\" | \"emotion-dominant\" | \"mixed\", \
         \"rationale\": \"one or two sentences\"}. Use \"mixed\" when both kinds of signal are comparably \
         strong or the evidence is inconclusive.\n",
    );
    prompt
}

pub fn synthesis_prompt(
    stance: &str,
    guidance: &str,
    classification: &Classification,
    evidence: &EvidenceLog,
) -> String {
    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "The conflict was classified as {} ({}). Write a {stance} intervention.",
        classification.label, classification.rationale
    );
    let _ = writeln!(prompt, "{guidance}");
    prompt.push_str("\nConversation:\n");
    prompt.push_str(&transcript_text(evidence));
    prompt.push_str("\nInvestigation notes:\n");
    prompt.push_str(&render_evidence(evidence));
    prompt.push_str(
        "\nReply with one JSON object with exactly these string keys, each a short plain-text paragraph:\n\
         \"summary\", \"common_ground\", \"reframing\", \"communication_alternatives\".\n\
         \"communication_alternatives\" must include at least one rewrite in the form \
         Instead of saying \"...\", try: \"...\".\n",
    );
    prompt
}

/// One line per message, `author: text`.
pub fn transcript_text(evidence: &EvidenceLog) -> String {
    let lines = transcript(evidence);
    if lines.is_empty() {
        return "(no messages were retrieved)\n".to_owned();
    }
    let skip = lines.len().saturating_sub(MAX_TRANSCRIPT_LINES);
    lines[skip..].iter().fold(String::new(), |mut text, line| {
        let _ = writeln!(text, "{}: {}", line.author, line.text);
        text
    })
}

pub fn render_evidence(evidence: &EvidenceLog) -> String {
    evidence.iter().fold(String::new(), |mut text, record| {
        let action = match &record.action {
            Action::None => "none".to_owned(),
            Action::Tool { name, arguments } => format!("{name} {arguments}"),
        };
        let _ = writeln!(
            text,
            "[cycle {}] thought: {} | action: {} | observation: {}",
            record.cycle,
            record.thought,
            action,
            clip(&record.observation.render(), MAX_OBSERVATION_CHARS)
        );
        text
    })
}

fn clip(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => format!("{}…", &text[..index]),
        None => text.to_owned(),
    }
}
