use std::collections::BTreeSet;
use std::sync::Arc;

use betweenus_core::domain::classification::{Classification, ConflictLabel};
use betweenus_core::domain::evidence::EvidenceLog;
use betweenus_core::domain::response::{Section, SectionDraft, StructuredResponse};
use betweenus_core::errors::MediationError;
use tracing::debug;

use crate::signals::split_sentences;
use crate::strategies::{AnalyticalStrategy, RelationalStrategy, SynthesisStrategy};

/// Sentences at or above this word-set overlap count as duplicates.
pub const DUPLICATE_SIMILARITY: f64 = 0.8;

pub struct ResponseRouter {
    analytical: Arc<dyn SynthesisStrategy>,
    relational: Arc<dyn SynthesisStrategy>,
}

impl Default for ResponseRouter {
    fn default() -> Self {
        Self::new(Arc::new(AnalyticalStrategy::new()), Arc::new(RelationalStrategy::new()))
    }
}

impl ResponseRouter {
    pub fn new(
        analytical: Arc<dyn SynthesisStrategy>,
        relational: Arc<dyn SynthesisStrategy>,
    ) -> Self {
        Self { analytical, relational }
    }

    pub async fn route(
        &self,
        classification: &Classification,
        evidence: &EvidenceLog,
    ) -> Result<StructuredResponse, MediationError> {
        debug!(
            event_name = "router.route",
            label = classification.label.as_str(),
            "routing classification"
        );
        match classification.label {
            ConflictLabel::FactDominant => {
                let draft = self.analytical.draft(classification, evidence).await?;
                StructuredResponse::from_draft(draft, self.analytical.name())
            }
            ConflictLabel::EmotionDominant => {
                let draft = self.relational.draft(classification, evidence).await?;
                StructuredResponse::from_draft(draft, self.relational.name())
            }
            ConflictLabel::Mixed => {
                let analytical = self.analytical.draft(classification, evidence).await?;
                ensure_complete(&analytical, self.analytical.name())?;
                let relational = self.relational.draft(classification, evidence).await?;
                ensure_complete(&relational, self.relational.name())?;
                StructuredResponse::from_draft(merge_drafts(&analytical, &relational), "mixed")
            }
        }
    }
}

fn ensure_complete(draft: &SectionDraft, strategy: &str) -> Result<(), MediationError> {
    match draft.first_missing() {
        Some(section) => Err(MediationError::synthesis_incomplete(strategy, section.key())),
        None => Ok(()),
    }
}

/// Section-by-section merge, analytical paragraphs first. A sentence is dropped when it is a
/// near-duplicate of any sentence already kept anywhere in the merged response.
pub fn merge_drafts(analytical: &SectionDraft, relational: &SectionDraft) -> SectionDraft {
    let mut merged = SectionDraft::default();
    let mut kept: Vec<BTreeSet<String>> = Vec::new();

    for section in Section::ORDER {
        let paragraphs = analytical.section(section).iter().chain(relational.section(section));
        for paragraph in paragraphs {
            let mut sentences = Vec::new();
            for sentence in split_sentences(paragraph) {
                let words = word_set(&sentence);
                if words.is_empty() {
                    continue;
                }
                if kept.iter().any(|existing| jaccard(existing, &words) >= DUPLICATE_SIMILARITY) {
                    continue;
                }
                kept.push(words);
                sentences.push(sentence);
            }
            if !sentences.is_empty() {
                merged.push(section, sentences.join(" "));
            }
        }
    }

    merged
}

pub fn word_set(sentence: &str) -> BTreeSet<String> {
    sentence
        .to_lowercase()
        .split(|character: char| !character.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_owned)
        .collect()
}

pub fn jaccard(left: &BTreeSet<String>, right: &BTreeSet<String>) -> f64 {
    let union = left.union(right).count();
    if union == 0 {
        return 1.0;
    }
    left.intersection(right).count() as f64 / union as f64
}
