use std::sync::Arc;

use async_trait::async_trait;
use betweenus_core::domain::classification::{Classification, ConflictLabel};
use betweenus_core::domain::evidence::EvidenceLog;
use serde_json::Value;
use tracing::{debug, warn};

use crate::llm::{extract_json_object, CompletionRequest, LlmClient};
use crate::prompts;
use crate::signals::{SignalExtractor, SignalReport};

/// Minimum score a side needs before it can dominate.
pub const DOMINANCE_FLOOR: u32 = 2;
/// How many times larger the dominant score must be than the other.
pub const DOMINANCE_RATIO: u32 = 2;

/// Assigns exactly one label from the accumulated evidence. Never fails and never fetches.
#[async_trait]
pub trait ConflictClassifier: Send + Sync {
    async fn classify(&self, evidence: &EvidenceLog) -> Classification;
}

#[derive(Clone, Debug, Default)]
pub struct SignalClassifier {
    extractor: SignalExtractor,
}

impl SignalClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify_report(&self, report: &SignalReport) -> Classification {
        let fact = report.fact_score;
        let emotion = report.emotion_score;

        let (label, rationale) = if fact >= DOMINANCE_FLOOR && fact >= emotion * DOMINANCE_RATIO {
            (
                ConflictLabel::FactDominant,
                format!(
                    "Factual signals ({}) clearly outweigh emotional ones ({emotion}).",
                    describe(fact, &report.factual_markers)
                ),
            )
        } else if emotion >= DOMINANCE_FLOOR && emotion >= fact * DOMINANCE_RATIO {
            (
                ConflictLabel::EmotionDominant,
                format!(
                    "Emotional signals ({}) clearly outweigh factual ones ({fact}).",
                    describe(emotion, &report.emotional_markers)
                ),
            )
        } else if fact == 0 && emotion == 0 {
            (
                ConflictLabel::Mixed,
                "The evidence carries no clear factual or emotional signal, so both lenses apply."
                    .to_owned(),
            )
        } else {
            (
                ConflictLabel::Mixed,
                format!(
                    "Factual ({fact}) and emotional ({emotion}) signals are comparably strong."
                ),
            )
        };

        Classification::new(label, rationale).with_scores(fact, emotion)
    }
}

#[async_trait]
impl ConflictClassifier for SignalClassifier {
    async fn classify(&self, evidence: &EvidenceLog) -> Classification {
        self.classify_report(&self.extractor.extract(evidence))
    }
}

fn describe(score: u32, markers: &[String]) -> String {
    if markers.is_empty() {
        return score.to_string();
    }
    let shown = markers.iter().take(5).cloned().collect::<Vec<_>>().join(", ");
    format!("{score}: {shown}")
}

/// Asks the model for a label; falls back to [`SignalClassifier`] when the model is unavailable
/// or answers with something other than one of the three labels.
pub struct LlmClassifier {
    client: Arc<dyn LlmClient>,
    system_prompt: String,
    fallback: SignalClassifier,
}

impl LlmClassifier {
    pub fn new(client: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self { client, system_prompt: system_prompt.into(), fallback: SignalClassifier::new() }
    }
}

#[async_trait]
impl ConflictClassifier for LlmClassifier {
    async fn classify(&self, evidence: &EvidenceLog) -> Classification {
        let report = SignalExtractor::new().extract(evidence);
        let fallback = self.fallback.classify_report(&report);

        let request = CompletionRequest::new(
            self.system_prompt.clone(),
            prompts::classification_prompt(evidence, &report),
        )
        .json();

        let raw = match self.client.complete(&request).await {
            Ok(raw) => raw,
            Err(error) => {
                warn!(
                    event_name = "classifier.fallback",
                    error = %error,
                    "llm classification failed; using signal classifier"
                );
                return fallback;
            }
        };

        match parse_label(&raw) {
            Some((label, rationale)) => {
                debug!(event_name = "classifier.llm", label = label.as_str(), "llm classified");
                Classification::new(label, rationale)
                    .with_scores(report.fact_score, report.emotion_score)
            }
            None => {
                warn!(
                    event_name = "classifier.fallback",
                    "llm returned no recognizable label; using signal classifier"
                );
                fallback
            }
        }
    }
}

fn parse_label(raw: &str) -> Option<(ConflictLabel, String)> {
    if let Some(object) = extract_json_object(raw) {
        let label =
            object.get("label").and_then(Value::as_str).and_then(ConflictLabel::parse_lenient)?;
        let rationale = object
            .get("rationale")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|rationale| !rationale.is_empty())
            .unwrap_or("The model gave no rationale.")
            .to_owned();
        return Some((label, rationale));
    }

    let label = ConflictLabel::parse_lenient(raw.lines().next().unwrap_or_default())?;
    let rationale = raw.lines().skip(1).collect::<Vec<_>>().join(" ").trim().to_owned();
    if rationale.is_empty() {
        return Some((label, "The model gave no rationale.".to_owned()));
    }
    Some((label, rationale))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use betweenus_core::domain::classification::ConflictLabel;
    use betweenus_core::domain::evidence::{Action, EvidenceLog, Observation};
    use serde_json::json;

    use super::{ConflictClassifier, LlmClassifier, SignalClassifier};
    use crate::llm::fakes::ScriptedLlm;
    use crate::signals::SignalReport;

    fn report(fact_score: u32, emotion_score: u32) -> SignalReport {
        SignalReport { fact_score, emotion_score, ..SignalReport::default() }
    }

    fn evidence_with(lines: &[(&str, &str)]) -> EvidenceLog {
        let messages = lines
            .iter()
            .map(|(author, text)| {
                json!({ "author": author, "text": text, "timestamp": "2026-03-02T09:00:00Z" })
            })
            .collect::<Vec<_>>();
        let mut evidence = EvidenceLog::new();
        evidence.append(
            "read the thread",
            Action::tool("fetch_history", json!({ "channel_id": "C1" })),
            Observation::Payload(json!({ "channel_id": "C1", "messages": messages })),
            1,
        );
        evidence
    }

    #[test]
    fn label_is_always_one_of_three() {
        let classifier = SignalClassifier::new();
        for fact in 0..8 {
            for emotion in 0..8 {
                let label = classifier.classify_report(&report(fact, emotion)).label;
                assert!(ConflictLabel::ALL.contains(&label));
            }
        }
    }

    #[test]
    fn dominance_needs_ratio_and_floor() {
        let classifier = SignalClassifier::new();
        assert_eq!(classifier.classify_report(&report(4, 2)).label, ConflictLabel::FactDominant);
        assert_eq!(classifier.classify_report(&report(1, 0)).label, ConflictLabel::Mixed);
        assert_eq!(classifier.classify_report(&report(2, 5)).label, ConflictLabel::EmotionDominant);
        assert_eq!(classifier.classify_report(&report(5, 4)).label, ConflictLabel::Mixed);
    }

    #[tokio::test]
    async fn absence_of_signal_is_mixed() {
        let classification = SignalClassifier::new().classify(&EvidenceLog::new()).await;
        assert_eq!(classification.label, ConflictLabel::Mixed);
        assert!(classification.rationale.contains("no clear"));
    }

    #[tokio::test]
    async fn llm_label_is_used_with_signal_scores() {
        let llm = Arc::new(ScriptedLlm::replying(
            r#"{"label": "emotion-dominant", "rationale": "Blame, not data."}"#,
        ));
        let classifier = LlmClassifier::new(llm.clone(), "system");
        let evidence = evidence_with(&[("ana", "You never listen to me.")]);

        let classification = classifier.classify(&evidence).await;
        assert_eq!(classification.label, ConflictLabel::EmotionDominant);
        assert_eq!(classification.rationale, "Blame, not data.");
        assert!(classification.emotion_score > 0);
        assert!(llm.prompts.lock().expect("prompts")[0].prompt.contains("You never listen"));
    }

    #[tokio::test]
    async fn llm_failure_or_unknown_label_falls_back() {
        let evidence = evidence_with(&[("ana", "The deadline in the ticket is Friday, not Monday.")]);

        let failing = LlmClassifier::new(Arc::new(ScriptedLlm::failing()), "system");
        assert_eq!(failing.classify(&evidence).await.label, ConflictLabel::FactDominant);

        let confused =
            LlmClassifier::new(Arc::new(ScriptedLlm::replying("{\"label\": \"spicy\"}")), "system");
        assert_eq!(confused.classify(&evidence).await.label, ConflictLabel::FactDominant);
    }

    #[tokio::test]
    async fn plain_text_label_on_first_line_is_accepted() {
        let classifier = LlmClassifier::new(
            Arc::new(ScriptedLlm::replying("Mixed\nBoth data and hurt feelings.")),
            "system",
        );
        let classification = classifier.classify(&EvidenceLog::new()).await;
        assert_eq!(classification.label, ConflictLabel::Mixed);
        assert_eq!(classification.rationale, "Both data and hurt feelings.");
    }
}
