use serde::{Deserialize, Serialize};

use crate::errors::MediationError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Summary,
    CommonGround,
    Reframing,
    CommunicationAlternatives,
}

impl Section {
    /// Presentation order of the four sections.
    pub const ORDER: [Section; 4] =
        [Self::Summary, Self::CommonGround, Self::Reframing, Self::CommunicationAlternatives];

    pub fn key(&self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::CommonGround => "common_ground",
            Self::Reframing => "reframing",
            Self::CommunicationAlternatives => "communication_alternatives",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Summary => "Summary",
            Self::CommonGround => "Common Ground",
            Self::Reframing => "Reframing",
            Self::CommunicationAlternatives => "Communication Alternatives",
        }
    }
}

/// Section content produced by a synthesis strategy, one entry per paragraph. Drafts may be
/// incomplete; `StructuredResponse::from_draft` is the only way to get a response out of one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionDraft {
    pub summary: Vec<String>,
    pub common_ground: Vec<String>,
    pub reframing: Vec<String>,
    pub communication_alternatives: Vec<String>,
}

impl SectionDraft {
    pub fn section(&self, section: Section) -> &[String] {
        match section {
            Section::Summary => &self.summary,
            Section::CommonGround => &self.common_ground,
            Section::Reframing => &self.reframing,
            Section::CommunicationAlternatives => &self.communication_alternatives,
        }
    }

    pub fn section_mut(&mut self, section: Section) -> &mut Vec<String> {
        match section {
            Section::Summary => &mut self.summary,
            Section::CommonGround => &mut self.common_ground,
            Section::Reframing => &mut self.reframing,
            Section::CommunicationAlternatives => &mut self.communication_alternatives,
        }
    }

    pub fn push(&mut self, section: Section, paragraph: impl Into<String>) -> &mut Self {
        self.section_mut(section).push(paragraph.into());
        self
    }

    /// First section with no non-blank paragraph, in presentation order.
    pub fn first_missing(&self) -> Option<Section> {
        Section::ORDER
            .into_iter()
            .find(|section| self.section(*section).iter().all(|paragraph| paragraph.trim().is_empty()))
    }
}

/// The four-part intervention. Every section is guaranteed non-empty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StructuredResponse {
    summary: String,
    common_ground: String,
    reframing: String,
    communication_alternatives: String,
    strategy: String,
}

impl StructuredResponse {
    pub fn from_draft(
        draft: SectionDraft,
        strategy: impl Into<String>,
    ) -> Result<Self, MediationError> {
        let strategy = strategy.into();
        if let Some(missing) = draft.first_missing() {
            return Err(MediationError::synthesis_incomplete(strategy, missing.key()));
        }

        let join = |paragraphs: Vec<String>| {
            paragraphs
                .into_iter()
                .map(|paragraph| paragraph.trim().to_owned())
                .filter(|paragraph| !paragraph.is_empty())
                .collect::<Vec<_>>()
                .join("\n\n")
        };

        Ok(Self {
            summary: join(draft.summary),
            common_ground: join(draft.common_ground),
            reframing: join(draft.reframing),
            communication_alternatives: join(draft.communication_alternatives),
            strategy,
        })
    }

    pub fn section(&self, section: Section) -> &str {
        match section {
            Section::Summary => &self.summary,
            Section::CommonGround => &self.common_ground,
            Section::Reframing => &self.reframing,
            Section::CommunicationAlternatives => &self.communication_alternatives,
        }
    }

    pub fn strategy(&self) -> &str {
        &self.strategy
    }
}
