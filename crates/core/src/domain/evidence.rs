use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ToolError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    None,
    Tool { name: String, arguments: Value },
}

impl Action {
    pub fn tool(name: impl Into<String>, arguments: Value) -> Self {
        Self::Tool { name: name.into(), arguments }
    }

    pub fn tool_name(&self) -> Option<&str> {
        match self {
            Self::None => None,
            Self::Tool { name, .. } => Some(name),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Observation {
    None,
    Payload(Value),
    Failure(ToolError),
}

impl Observation {
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::Payload(value) => Some(value),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&ToolError> {
        match self {
            Self::Failure(error) => Some(error),
            _ => None,
        }
    }

    pub fn render(&self) -> String {
        match self {
            Self::None => "none".to_owned(),
            Self::Payload(value) => value.to_string(),
            Self::Failure(error) => format!("error: {error}"),
        }
    }
}

/// One thought/action/observation cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub cycle: u32,
    pub thought: String,
    pub action: Action,
    pub observation: Observation,
    pub attempts: u32,
}

/// Append-only evidence for a single invocation. Records get their cycle index on append and
/// cannot be changed afterwards.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct EvidenceLog {
    records: Vec<EvidenceRecord>,
}

impl EvidenceLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(
        &mut self,
        thought: impl Into<String>,
        action: Action,
        observation: Observation,
        attempts: u32,
    ) -> &EvidenceRecord {
        let cycle = self.records.len() as u32 + 1;
        self.records.push(EvidenceRecord {
            cycle,
            thought: thought.into(),
            action,
            observation,
            attempts,
        });
        &self.records[self.records.len() - 1]
    }

    pub fn records(&self) -> &[EvidenceRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &EvidenceRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&EvidenceRecord> {
        self.records.last()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ToolError> {
        self.records.iter().filter_map(|record| record.observation.failure())
    }

    /// Successful payloads produced by the named tool, oldest first.
    pub fn payloads_for<'a>(&'a self, tool: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.records
            .iter()
            .filter(move |record| record.action.tool_name() == Some(tool))
            .filter_map(|record| record.observation.payload())
    }

    pub fn has_called(&self, tool: &str) -> bool {
        self.records.iter().any(|record| record.action.tool_name() == Some(tool))
    }
}
