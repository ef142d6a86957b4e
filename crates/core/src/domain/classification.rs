use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictLabel {
    FactDominant,
    EmotionDominant,
    Mixed,
}

impl ConflictLabel {
    pub const ALL: [ConflictLabel; 3] = [Self::FactDominant, Self::EmotionDominant, Self::Mixed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FactDominant => "fact-dominant",
            Self::EmotionDominant => "emotion-dominant",
            Self::Mixed => "mixed",
        }
    }

    /// Lenient parse for model output: accepts `fact-dominant`, `fact_dominant`,
    /// `FACT DOMINANT`, `factual`, and so on.
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        let normalized = raw
            .trim()
            .trim_matches(|ch: char| ch == '"' || ch == '\'' || ch == '`' || ch == '.')
            .to_ascii_lowercase()
            .replace(['_', ' '], "-");
        match normalized.as_str() {
            "fact-dominant" | "fact" | "factual" | "technical" => Some(Self::FactDominant),
            "emotion-dominant" | "emotion" | "emotional" | "relational" => {
                Some(Self::EmotionDominant)
            }
            "mixed" | "both" => Some(Self::Mixed),
            _ => None,
        }
    }
}

impl fmt::Display for ConflictLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: ConflictLabel,
    pub fact_score: u32,
    pub emotion_score: u32,
    pub rationale: String,
}

impl Classification {
    pub fn new(label: ConflictLabel, rationale: impl Into<String>) -> Self {
        Self { label, fact_score: 0, emotion_score: 0, rationale: rationale.into() }
    }

    pub fn with_scores(mut self, fact_score: u32, emotion_score: u32) -> Self {
        self.fact_score = fact_score;
        self.emotion_score = emotion_score;
        self
    }
}
