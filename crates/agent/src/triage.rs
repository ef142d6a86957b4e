use std::sync::Arc;
use std::time::Duration;

use betweenus_core::config::TriageConfig;
use betweenus_core::domain::evidence::{Action, EvidenceLog, Observation};
use betweenus_core::domain::invocation::Invocation;
use betweenus_core::errors::{MediationError, ResourceKind, ToolError};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::reasoner::{NextStep, Reasoner};
use crate::tools::ToolRegistry;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopPolicy {
    pub max_cycles: u32,
    pub upstream_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for LoopPolicy {
    fn default() -> Self {
        Self { max_cycles: 6, upstream_retries: 1, retry_backoff: Duration::from_millis(250) }
    }
}

impl From<&TriageConfig> for LoopPolicy {
    fn from(config: &TriageConfig) -> Self {
        Self {
            max_cycles: config.max_cycles,
            upstream_retries: config.upstream_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// The reasoner judged the evidence sufficient (or could not continue).
    Concluded,
    /// The cycle cap was hit; classification proceeds on partial evidence.
    CycleCapReached,
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Concluded => "concluded",
            Self::CycleCapReached => "cycle_cap_reached",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TriageOutcome {
    pub evidence: EvidenceLog,
    pub termination: Termination,
}

enum LoopState {
    Thinking,
    Acting { thought: String, tool: String, arguments: Value },
    Concluding { thought: String },
    Done(Termination),
}

/// Evidence-gathering stage. Each invocation runs sequentially and suspends only on reasoner
/// and tool calls.
pub struct TriageLoop {
    reasoner: Arc<dyn Reasoner>,
    registry: Arc<ToolRegistry>,
    policy: LoopPolicy,
}

impl TriageLoop {
    pub fn new(reasoner: Arc<dyn Reasoner>, registry: Arc<ToolRegistry>, policy: LoopPolicy) -> Self {
        Self { reasoner, registry, policy }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> LoopPolicy {
        self.policy
    }

    pub async fn run(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> Result<TriageOutcome, MediationError> {
        let mut evidence = EvidenceLog::new();
        let mut state = LoopState::Thinking;
        let max_cycles = self.policy.max_cycles.max(1) as usize;

        loop {
            state = match state {
                LoopState::Thinking => {
                    if cancel.is_cancelled() {
                        info!(
                            event_name = "triage.cancelled",
                            invocation_id = %invocation.id.0,
                            cycle = evidence.len(),
                            "triage cancelled"
                        );
                        return Err(MediationError::Cancelled);
                    }
                    if evidence.len() >= max_cycles {
                        LoopState::Done(Termination::CycleCapReached)
                    } else {
                        match self.reasoner.propose_next_step(invocation, &evidence).await {
                            Ok(NextStep::Act { thought, tool, arguments }) => {
                                LoopState::Acting { thought, tool, arguments }
                            }
                            Ok(NextStep::Conclude { thought }) => LoopState::Concluding { thought },
                            Err(error) => {
                                warn!(
                                    event_name = "triage.reasoner_failed",
                                    invocation_id = %invocation.id.0,
                                    cycle = evidence.len() + 1,
                                    error = %error,
                                    "reasoner failed; concluding with gathered evidence"
                                );
                                LoopState::Concluding {
                                    thought: format!(
                                        "Reasoning was interrupted ({error}); continuing with the evidence gathered so far."
                                    ),
                                }
                            }
                        }
                    }
                }
                LoopState::Acting { thought, tool, arguments } => {
                    let (observation, attempts) = self.act(invocation, &tool, &arguments).await;
                    let target_missing = is_missing_target(invocation, &observation);
                    evidence.append(thought, Action::tool(tool, arguments), observation, attempts);

                    if let Some(error) = target_missing {
                        info!(
                            event_name = "triage.target_missing",
                            invocation_id = %invocation.id.0,
                            channel_id = invocation.target_scope().as_str(),
                            "target conversation not found"
                        );
                        return Err(error);
                    }
                    LoopState::Thinking
                }
                LoopState::Concluding { thought } => {
                    evidence.append(thought, Action::None, Observation::None, 0);
                    LoopState::Done(Termination::Concluded)
                }
                LoopState::Done(termination) => {
                    debug!(
                        event_name = "triage.done",
                        invocation_id = %invocation.id.0,
                        cycles = evidence.len(),
                        termination = termination.as_str(),
                        "triage finished"
                    );
                    return Ok(TriageOutcome { evidence, termination });
                }
            };
        }
    }

    /// Invokes one tool, re-attempting upstream failures up to the retry bound.
    async fn act(&self, invocation: &Invocation, tool: &str, arguments: &Value) -> (Observation, u32) {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.registry.invoke(tool, arguments).await {
                Ok(payload) => return (Observation::Payload(payload), attempts),
                Err(error) if error.is_retryable() && attempts <= self.policy.upstream_retries => {
                    warn!(
                        event_name = "triage.tool_retry",
                        invocation_id = %invocation.id.0,
                        tool,
                        attempt = attempts,
                        error = %error,
                        "retrying tool after upstream failure"
                    );
                    tokio::time::sleep(self.policy.retry_backoff).await;
                }
                Err(error) => {
                    warn!(
                        event_name = "triage.tool_failed",
                        invocation_id = %invocation.id.0,
                        tool,
                        attempts,
                        error_class = ?error.kind(),
                        error = %error,
                        "tool failure recorded as observation"
                    );
                    return (Observation::Failure(error), attempts);
                }
            }
        }
    }
}

fn is_missing_target(invocation: &Invocation, observation: &Observation) -> Option<MediationError> {
    match observation.failure() {
        Some(ToolError::NotFound { resource: ResourceKind::Conversation, id })
            if id == invocation.target_scope().as_str() =>
        {
            Some(MediationError::NotFound { resource: ResourceKind::Conversation, id: id.clone() })
        }
        _ => None,
    }
}
