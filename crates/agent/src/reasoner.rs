use std::sync::Arc;

use async_trait::async_trait;
use betweenus_core::domain::evidence::{Action, EvidenceLog};
use betweenus_core::domain::invocation::Invocation;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::llm::{extract_json_object, CompletionRequest, LlmClient, LlmError};
use crate::prompts;
use crate::signals::{transcript, SignalExtractor};
use crate::tools::people::extract_user_mentions;
use crate::tools::ToolContract;

const MAX_USER_LOOKUPS: usize = 2;
const MAX_QUERY_WORDS: usize = 12;

#[derive(Clone, Debug, PartialEq)]
pub enum NextStep {
    Act { thought: String, tool: String, arguments: Value },
    Conclude { thought: String },
}

impl NextStep {
    pub fn act(thought: impl Into<String>, tool: impl Into<String>, arguments: Value) -> Self {
        Self::Act { thought: thought.into(), tool: tool.into(), arguments }
    }

    pub fn conclude(thought: impl Into<String>) -> Self {
        Self::Conclude { thought: thought.into() }
    }
}

#[derive(Debug, Error)]
pub enum ReasonerError {
    #[error("reasoner model unavailable: {0}")]
    Llm(#[from] LlmError),
}

#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn propose_next_step(
        &self,
        invocation: &Invocation,
        evidence: &EvidenceLog,
    ) -> Result<NextStep, ReasonerError>;
}

/// Model-driven reasoner speaking a small JSON protocol.
pub struct LlmReasoner {
    client: Arc<dyn LlmClient>,
    system_prompt: String,
    tools: Vec<ToolContract>,
}

impl LlmReasoner {
    pub fn new(
        client: Arc<dyn LlmClient>,
        system_prompt: impl Into<String>,
        tools: Vec<ToolContract>,
    ) -> Self {
        Self { client, system_prompt: system_prompt.into(), tools }
    }
}

#[async_trait]
impl Reasoner for LlmReasoner {
    async fn propose_next_step(
        &self,
        invocation: &Invocation,
        evidence: &EvidenceLog,
    ) -> Result<NextStep, ReasonerError> {
        let request = CompletionRequest::new(
            self.system_prompt.clone(),
            prompts::reasoner_prompt(invocation, evidence, &self.tools),
        )
        .json();
        let raw = self.client.complete(&request).await?;
        Ok(parse_step(&raw))
    }
}

/// Unparseable output counts as a conclusion whose thought is the raw text.
pub fn parse_step(raw: &str) -> NextStep {
    let Some(object) = extract_json_object(raw) else {
        let thought = raw.trim();
        if thought.is_empty() {
            return NextStep::conclude("The model returned no reasoning.");
        }
        return NextStep::conclude(thought);
    };

    let thought = object
        .get("thought")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_owned();

    let tool = object
        .get("action")
        .and_then(|action| action.get("tool"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|tool| !tool.is_empty());
    let concluded = object.get("conclude").and_then(Value::as_bool).unwrap_or(false);

    match tool {
        Some(tool) if !concluded => {
            let arguments = object
                .pointer("/action/arguments")
                .cloned()
                .filter(Value::is_object)
                .unwrap_or_else(|| Value::Object(Map::new()));
            NextStep::act(thought, tool, arguments)
        }
        _ if thought.is_empty() => NextStep::conclude("The evidence gathered is sufficient."),
        _ => NextStep::conclude(thought),
    }
}

/// Fixed investigation plan: read the thread, check one factual claim on the web, resolve who
/// was mentioned, then conclude.
#[derive(Clone, Debug, Default)]
pub struct HeuristicReasoner {
    search_enabled: bool,
    extractor: SignalExtractor,
}

impl HeuristicReasoner {
    pub fn new(search_enabled: bool) -> Self {
        Self { search_enabled, extractor: SignalExtractor::new() }
    }

    fn next_user_lookup(&self, evidence: &EvidenceLog) -> Option<String> {
        let looked_up = evidence
            .iter()
            .filter_map(|record| match &record.action {
                Action::Tool { name, arguments } if name == "user_info" => {
                    arguments.get("user_id").and_then(Value::as_str).map(str::to_owned)
                }
                _ => None,
            })
            .collect::<Vec<_>>();
        if looked_up.len() >= MAX_USER_LOOKUPS {
            return None;
        }

        evidence
            .payloads_for("mentioned_users")
            .filter_map(|payload| payload.get("user_ids").and_then(Value::as_array))
            .flatten()
            .filter_map(Value::as_str)
            .find(|id| !looked_up.iter().any(|done| done == id))
            .map(str::to_owned)
    }
}

#[async_trait]
impl Reasoner for HeuristicReasoner {
    async fn propose_next_step(
        &self,
        invocation: &Invocation,
        evidence: &EvidenceLog,
    ) -> Result<NextStep, ReasonerError> {
        let target = invocation.target_scope();

        if !evidence.has_called("fetch_history") {
            let mut arguments = json!({ "channel_id": target.as_str() });
            if let Some(limit) = invocation.history_limit {
                arguments["limit"] = json!(limit);
            }
            return Ok(NextStep::act(
                format!("I need to read the recent messages in {} first.", target.as_str()),
                "fetch_history",
                arguments,
            ));
        }

        let lines = transcript(evidence);
        if lines.is_empty() {
            return Ok(NextStep::conclude(
                "No message history is available, so I'll work from the request alone.",
            ));
        }

        let report = self.extractor.extract_lines(&lines);
        if self.search_enabled && !evidence.has_called("web_search") {
            if let Some(claim) = report.claims.first() {
                return Ok(NextStep::act(
                    "Some claims in the thread are checkable; I'll look for outside context.",
                    "web_search",
                    json!({ "query": search_query(&claim.sentence) }),
                ));
            }
        }

        if !evidence.has_called("mentioned_users") {
            let text = lines
                .iter()
                .map(|line| line.text.as_str())
                .chain(std::iter::once(invocation.request_text.as_str()))
                .collect::<Vec<_>>()
                .join("\n");
            if !extract_user_mentions(&text).is_empty() {
                return Ok(NextStep::act(
                    "People are mentioned by id; I'll find out who they are.",
                    "mentioned_users",
                    json!({ "text": text }),
                ));
            }
        }

        if let Some(user_id) = self.next_user_lookup(evidence) {
            return Ok(NextStep::act(
                format!("Resolving the name of {user_id}."),
                "user_info",
                json!({ "user_id": user_id }),
            ));
        }

        Ok(NextStep::conclude(format!(
            "I've read {} messages from {}; factual signal {}, emotional signal {}.",
            report.message_count,
            report.participants_phrase(),
            report.fact_score,
            report.emotion_score
        )))
    }
}

fn search_query(sentence: &str) -> String {
    sentence
        .split_whitespace()
        .filter(|word| !word.starts_with("<@"))
        .take(MAX_QUERY_WORDS)
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(['.', '!', '?'])
        .to_owned()
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use betweenus_core::domain::evidence::{Action, EvidenceLog, Observation};
    use betweenus_core::domain::invocation::{ConversationScope, Invocation};
    use serde_json::json;

    use super::{parse_step, HeuristicReasoner, LlmReasoner, NextStep, Reasoner};
    use crate::llm::fakes::ScriptedLlm;

    fn invocation() -> Invocation {
        Invocation::new(ConversationScope("C1".to_owned()), "U7").with_history_limit(30)
    }

    fn history(lines: &[(&str, &str)]) -> Observation {
        let messages = lines
            .iter()
            .map(|(author, text)| {
                json!({ "author": author, "text": text, "timestamp": "2026-03-02T09:00:00Z" })
            })
            .collect::<Vec<_>>();
        Observation::Payload(json!({ "channel_id": "C1", "messages": messages }))
    }

    #[test]
    fn json_action_becomes_tool_step() {
        let step = parse_step(
            r#"{"thought": "need history", "action": {"tool": "fetch_history", "arguments": {"channel_id": "C1"}}}"#,
        );
        assert_eq!(step, NextStep::act("need history", "fetch_history", json!({ "channel_id": "C1" })));
    }

    #[test]
    fn conclusion_and_garbage_both_conclude() {
        assert_eq!(
            parse_step(r#"{"thought": "enough", "conclude": true}"#),
            NextStep::conclude("enough")
        );
        assert_eq!(
            parse_step("I think they disagree about dates."),
            NextStep::conclude("I think they disagree about dates.")
        );
        assert_eq!(parse_step("   "), NextStep::conclude("The model returned no reasoning."));
    }

    #[test]
    fn missing_arguments_default_to_empty_object() {
        assert_eq!(
            parse_step(r#"{"thought": "t", "action": {"tool": "mentioned_users"}}"#),
            NextStep::act("t", "mentioned_users", json!({}))
        );
    }

    #[tokio::test]
    async fn llm_reasoner_propagates_model_failure() {
        let reasoner = LlmReasoner::new(Arc::new(ScriptedLlm::failing()), "system", Vec::new());
        let result = reasoner.propose_next_step(&invocation(), &EvidenceLog::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn heuristic_reads_history_with_requested_limit_first() {
        let step = HeuristicReasoner::new(false)
            .propose_next_step(&invocation(), &EvidenceLog::new())
            .await
            .expect("step");
        assert_eq!(
            step,
            NextStep::act(
                "I need to read the recent messages in C1 first.",
                "fetch_history",
                json!({ "channel_id": "C1", "limit": 30 })
            )
        );
    }

    #[tokio::test]
    async fn heuristic_searches_claims_then_resolves_mentions_then_concludes() {
        let reasoner = HeuristicReasoner::new(true);
        let mut evidence = EvidenceLog::new();
        evidence.append(
            "read",
            Action::tool("fetch_history", json!({ "channel_id": "C1" })),
            history(&[("U1", "<@U2> the release is due Friday per the ticket.")]),
            1,
        );

        let step = reasoner.propose_next_step(&invocation(), &evidence).await.expect("search");
        let NextStep::Act { tool, arguments, .. } = step else {
            panic!("expected search step");
        };
        assert_eq!(tool, "web_search");
        assert_eq!(arguments["query"], "the release is due Friday per the ticket");

        evidence.append(
            "search",
            Action::tool("web_search", arguments),
            Observation::Payload(json!({ "query": "q", "results": [] })),
            1,
        );
        let step = reasoner.propose_next_step(&invocation(), &evidence).await.expect("mentions");
        let NextStep::Act { tool, arguments, .. } = step else {
            panic!("expected mention step");
        };
        assert_eq!(tool, "mentioned_users");

        evidence.append(
            "mentions",
            Action::tool("mentioned_users", arguments),
            Observation::Payload(json!({ "user_ids": ["U2"] })),
            1,
        );
        let step = reasoner.propose_next_step(&invocation(), &evidence).await.expect("user");
        assert_eq!(
            step,
            NextStep::act("Resolving the name of U2.", "user_info", json!({ "user_id": "U2" }))
        );

        evidence.append(
            "user",
            Action::tool("user_info", json!({ "user_id": "U2" })),
            Observation::Payload(json!({ "id": "U2", "name": "Ben" })),
            1,
        );
        let step = reasoner.propose_next_step(&invocation(), &evidence).await.expect("conclude");
        assert!(matches!(step, NextStep::Conclude { .. }));
    }

    #[tokio::test]
    async fn heuristic_concludes_when_history_is_empty() {
        let mut evidence = EvidenceLog::new();
        evidence.append(
            "read",
            Action::tool("fetch_history", json!({ "channel_id": "C1" })),
            history(&[]),
            1,
        );
        let step = HeuristicReasoner::new(true)
            .propose_next_step(&invocation(), &evidence)
            .await
            .expect("step");
        assert!(matches!(step, NextStep::Conclude { .. }));
    }
}
