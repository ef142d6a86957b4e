use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub author: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub real_name: Option<String>,
    pub display_name: Option<String>,
}

impl UserProfile {
    /// Best human-readable name available for the user.
    pub fn preferred_name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .or(self.real_name.as_deref().filter(|name| !name.trim().is_empty()))
            .unwrap_or(&self.name)
    }

    pub fn matches_name(&self, query: &str) -> bool {
        let query = query.trim().trim_start_matches('@').to_lowercase();
        if query.is_empty() {
            return false;
        }
        [Some(self.name.as_str()), self.real_name.as_deref(), self.display_name.as_deref()]
            .into_iter()
            .flatten()
            .any(|candidate| candidate.to_lowercase().contains(&query))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub snippet: String,
    pub url: String,
}
