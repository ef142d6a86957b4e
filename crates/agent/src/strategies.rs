use std::sync::Arc;

use async_trait::async_trait;
use betweenus_core::domain::classification::Classification;
use betweenus_core::domain::evidence::EvidenceLog;
use betweenus_core::domain::response::{Section, SectionDraft};
use betweenus_core::errors::MediationError;
use serde_json::Value;
use tracing::warn;

use crate::llm::{extract_json_object, CompletionRequest, LlmClient};
use crate::prompts;
use crate::signals::{SignalExtractor, SignalReport};

/// Closing line shared by both stances; the mixed merge keeps only one copy.
const CONFIRM_IN_THREAD: &str =
    "Confirm whatever you agree on here in the thread so everyone works from the same understanding.";

#[async_trait]
pub trait SynthesisStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn draft(
        &self,
        classification: &Classification,
        evidence: &EvidenceLog,
    ) -> Result<SectionDraft, MediationError>;
}

/// Objective stance: verifiable claims, researchable gaps, a factual path to resolution.
#[derive(Clone, Debug, Default)]
pub struct AnalyticalStrategy {
    extractor: SignalExtractor,
}

impl AnalyticalStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draft_from(&self, report: &SignalReport) -> SectionDraft {
        let mut draft = SectionDraft::default();

        draft.push(Section::Summary, analytical_summary(report));

        let mut common_ground = String::from(
            "Everyone in this thread is working toward the same deliverable and wants the facts settled.",
        );
        if !report.references.is_empty() {
            common_ground.push_str(&format!(
                " You are already pointing at shared sources ({}), so the answer can be checked rather than argued.",
                report.references.join(", ")
            ));
        }
        draft.push(Section::CommonGround, common_ground);

        let mut reframing = String::from(
            "This is a question of which information is current, not of who is right.",
        );
        if report.deadline_disputed() {
            reframing.push_str(&format!(
                " Two or more dates are in play ({}); find out which one was last agreed and by whom.",
                report.dates.join(", ")
            ));
        } else if let Some(claim) = report.claims.first() {
            reframing.push_str(&format!(
                " Start by verifying the claim \"{}\" against its source.",
                claim.sentence
            ));
        }
        draft.push(Section::Reframing, reframing);

        if let Some(finding) = report.findings.first() {
            draft.push(
                Section::Reframing,
                format!("Outside context worth reading: {} ({}).", finding.title, finding.url),
            );
        } else if report.degraded_tools.iter().any(|tool| tool == "web_search") {
            draft.push(
                Section::Reframing,
                "Outside research was unavailable, so external facts could not be checked.",
            );
        }

        let quoted = report
            .claims
            .iter()
            .find(|claim| claim.sentence.to_lowercase().starts_with("no"))
            .or_else(|| report.claims.first())
            .map(|claim| claim.sentence.clone())
            .unwrap_or_else(|| "That's wrong.".to_owned());
        let subject = if report.deadline_mentioned { "deadline" } else { "details" };
        let source = report.references.first().map(String::as_str).unwrap_or("source");
        draft.push(
            Section::CommunicationAlternatives,
            format!(
                "Instead of saying \"{quoted}\", try: \"I have a different {subject} in my notes. Can we open the {source} together and confirm which one is current?\""
            ),
        );
        draft.push(Section::CommunicationAlternatives, CONFIRM_IN_THREAD);

        draft
    }
}

fn analytical_summary(report: &SignalReport) -> String {
    if !report.has_history() {
        return "No message history was available, so this analysis rests on the request alone. \
                The question appears to be about facts that can be checked."
            .to_owned();
    }

    let mut summary = format!(
        "{} messages between {} show a disagreement about verifiable facts rather than intentions.",
        report.message_count,
        report.participants_phrase()
    );
    if report.deadline_disputed() {
        summary.push_str(&format!(
            " The deadline is in dispute: the thread cites {}.",
            report.dates.join(" and ")
        ));
    } else if report.deadline_mentioned {
        summary.push_str(" The discussion hinges on the deadline.");
    }
    let claims = report
        .claims
        .iter()
        .take(2)
        .map(|claim| format!("{} said \"{}\"", claim.author, claim.sentence))
        .collect::<Vec<_>>();
    if !claims.is_empty() {
        summary.push_str(&format!(" Key claims: {}.", claims.join("; ")));
    }
    summary
}

/// Empathetic stance: acknowledgment, shared goals, trust repair.
#[derive(Clone, Debug, Default)]
pub struct RelationalStrategy {
    extractor: SignalExtractor,
}

impl RelationalStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draft_from(&self, report: &SignalReport) -> SectionDraft {
        let mut draft = SectionDraft::default();

        let summary = if report.has_history() {
            let mut summary = format!(
                "The tension between {} is about how people feel treated more than about facts.",
                report.participants_phrase()
            );
            if !report.emotional_markers.is_empty() {
                let markers = report
                    .emotional_markers
                    .iter()
                    .take(3)
                    .map(|marker| format!("\"{marker}\""))
                    .collect::<Vec<_>>();
                summary.push_str(&format!(
                    " The exchange carries strong feelings, with language such as {}.",
                    markers.join(", ")
                ));
            }
            summary
        } else {
            "No message history was available; the request suggests people are feeling unheard."
                .to_owned()
        };
        draft.push(Section::Summary, summary);

        let goal = match report.focus.as_deref() {
            Some(topic) => format!("getting the {topic} right together"),
            None => "being heard and working well together".to_owned(),
        };
        draft.push(
            Section::CommonGround,
            format!(
                "You share a goal: {goal}. Both of you are invested enough to push back, which means both of you care about the outcome."
            ),
        );

        let reframing = match report.charged.first() {
            Some(quote) => format!(
                "A statement like \"{}\" describes how the situation felt, not a fixed trait of the other person. Underneath it is a need to be recognised and consulted.",
                quote.sentence
            ),
            None => "What reads as criticism is usually an unmet need to be recognised and consulted."
                .to_owned(),
        };
        draft.push(Section::Reframing, reframing);

        let quoted = report
            .charged
            .iter()
            .find(|quote| quote.sentence.to_lowercase().contains("you "))
            .or_else(|| report.charged.first())
            .map(|quote| quote.sentence.clone())
            .unwrap_or_else(|| "You never listen.".to_owned());
        draft.push(
            Section::CommunicationAlternatives,
            format!(
                "Instead of saying \"{quoted}\", try: \"I felt overlooked when this happened. Can we talk about how we handle it next time?\""
            ),
        );
        draft.push(
            Section::CommunicationAlternatives,
            "Acknowledge the other person's frustration before restating your own position.",
        );
        draft.push(Section::CommunicationAlternatives, CONFIRM_IN_THREAD);

        draft
    }
}

#[async_trait]
impl SynthesisStrategy for AnalyticalStrategy {
    fn name(&self) -> &'static str {
        "analytical"
    }

    async fn draft(
        &self,
        _classification: &Classification,
        evidence: &EvidenceLog,
    ) -> Result<SectionDraft, MediationError> {
        Ok(self.draft_from(&self.extractor.extract(evidence)))
    }
}

#[async_trait]
impl SynthesisStrategy for RelationalStrategy {
    fn name(&self) -> &'static str {
        "relational"
    }

    async fn draft(
        &self,
        _classification: &Classification,
        evidence: &EvidenceLog,
    ) -> Result<SectionDraft, MediationError> {
        Ok(self.draft_from(&self.extractor.extract(evidence)))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stance {
    Analytical,
    Relational,
}

impl Stance {
    fn name(&self) -> &'static str {
        match self {
            Self::Analytical => "analytical",
            Self::Relational => "relational",
        }
    }

    fn guidance(&self) -> &'static str {
        match self {
            Self::Analytical => {
                "Be objective: separate verifiable claims from assumptions, name the facts that still need checking, and propose a concrete way to settle them."
            }
            Self::Relational => {
                "Be empathetic: acknowledge how each person feels, name a goal they share, and suggest how to rebuild trust."
            }
        }
    }
}

/// Model-written sections for one stance. Transport failures fall back to the template
/// strategy; a reply that parses but leaves a section empty is incomplete.
pub struct LlmStrategy {
    stance: Stance,
    client: Arc<dyn LlmClient>,
    system_prompt: String,
    fallback: Arc<dyn SynthesisStrategy>,
}

impl LlmStrategy {
    pub fn analytical(client: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            stance: Stance::Analytical,
            client,
            system_prompt: system_prompt.into(),
            fallback: Arc::new(AnalyticalStrategy::new()),
        }
    }

    pub fn relational(client: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            stance: Stance::Relational,
            client,
            system_prompt: system_prompt.into(),
            fallback: Arc::new(RelationalStrategy::new()),
        }
    }
}

#[async_trait]
impl SynthesisStrategy for LlmStrategy {
    fn name(&self) -> &'static str {
        self.stance.name()
    }

    async fn draft(
        &self,
        classification: &Classification,
        evidence: &EvidenceLog,
    ) -> Result<SectionDraft, MediationError> {
        let request = CompletionRequest::new(
            self.system_prompt.clone(),
            prompts::synthesis_prompt(
                self.stance.name(),
                self.stance.guidance(),
                classification,
                evidence,
            ),
        )
        .json();

        let raw = match self.client.complete(&request).await {
            Ok(raw) => raw,
            Err(error) => {
                warn!(
                    event_name = "synthesis.fallback",
                    strategy = self.name(),
                    error = %error,
                    "llm synthesis failed; using template strategy"
                );
                return self.fallback.draft(classification, evidence).await;
            }
        };

        let object = extract_json_object(&raw).unwrap_or(Value::Null);
        let mut draft = SectionDraft::default();
        for section in Section::ORDER {
            let text = object
                .get(section.key())
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default();
            if text.is_empty() {
                return Err(MediationError::synthesis_incomplete(self.name(), section.key()));
            }
            draft.push(section, text);
        }
        Ok(draft)
    }
}
