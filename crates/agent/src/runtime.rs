use std::sync::Arc;

use betweenus_core::config::{AppConfig, ReasonerKind};
use betweenus_core::domain::classification::Classification;
use betweenus_core::domain::evidence::EvidenceLog;
use betweenus_core::domain::invocation::{Invocation, InvocationId};
use betweenus_core::domain::response::StructuredResponse;
use betweenus_core::errors::MediationError;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::assembler::{FormattedText, OutputAssembler};
use crate::classifier::{ConflictClassifier, LlmClassifier, SignalClassifier};
use crate::llm::{load_system_prompt, HttpLlmClient, LlmClient, LlmError};
use crate::reasoner::{HeuristicReasoner, LlmReasoner};
use crate::router::ResponseRouter;
use crate::strategies::LlmStrategy;
use crate::tools::ToolRegistry;
use crate::triage::{LoopPolicy, Termination, TriageLoop};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to compile output template: {0}")]
    Template(#[from] tera::Error),
    #[error("failed to configure language model: {0}")]
    Llm(#[from] LlmError),
}

/// Everything one invocation produced, for the connector and for diagnostics.
#[derive(Clone, Debug)]
pub struct MediationOutcome {
    pub invocation_id: InvocationId,
    pub classification: Classification,
    pub evidence: EvidenceLog,
    pub termination: Termination,
    pub response: StructuredResponse,
    pub formatted: FormattedText,
}

/// Triage, classification, routing and assembly for one invocation at a time. Shared read-only
/// across concurrent invocations.
pub struct MediationRuntime {
    triage: TriageLoop,
    classifier: Arc<dyn ConflictClassifier>,
    router: ResponseRouter,
    assembler: OutputAssembler,
}

impl MediationRuntime {
    pub fn new(
        triage: TriageLoop,
        classifier: Arc<dyn ConflictClassifier>,
        router: ResponseRouter,
        assembler: OutputAssembler,
    ) -> Self {
        Self { triage, classifier, router, assembler }
    }

    /// Deterministic engine: heuristic reasoner, signal classifier, template strategies.
    pub fn heuristic(registry: Arc<ToolRegistry>, policy: LoopPolicy) -> Result<Self, RuntimeError> {
        let reasoner = HeuristicReasoner::new(registry.contains("web_search"));
        Ok(Self::new(
            TriageLoop::new(Arc::new(reasoner), registry, policy),
            Arc::new(SignalClassifier::new()),
            ResponseRouter::default(),
            OutputAssembler::new()?,
        ))
    }

    /// Model-backed reasoner, classifier and strategies sharing one client.
    pub fn llm_backed(
        registry: Arc<ToolRegistry>,
        policy: LoopPolicy,
        llm: Arc<dyn LlmClient>,
        system_prompt: impl Into<String>,
    ) -> Result<Self, RuntimeError> {
        let system_prompt = system_prompt.into();
        let reasoner = LlmReasoner::new(llm.clone(), system_prompt.clone(), registry.contracts());
        Ok(Self::new(
            TriageLoop::new(Arc::new(reasoner), registry, policy),
            Arc::new(LlmClassifier::new(llm.clone(), system_prompt.clone())),
            ResponseRouter::new(
                Arc::new(LlmStrategy::analytical(llm.clone(), system_prompt.clone())),
                Arc::new(LlmStrategy::relational(llm, system_prompt)),
            ),
            OutputAssembler::new()?,
        ))
    }

    pub fn from_config(config: &AppConfig, registry: Arc<ToolRegistry>) -> Result<Self, RuntimeError> {
        let policy = LoopPolicy::from(&config.triage);
        match config.triage.reasoner {
            ReasonerKind::Heuristic => Self::heuristic(registry, policy),
            ReasonerKind::Llm => {
                let client = HttpLlmClient::from_config(&config.llm)?;
                let system_prompt = load_system_prompt(&config.llm)?;
                Self::llm_backed(registry, policy, Arc::new(client), system_prompt)
            }
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        self.triage.registry()
    }

    pub async fn mediate(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> Result<MediationOutcome, MediationError> {
        info!(
            event_name = "mediation.started",
            invocation_id = %invocation.id.0,
            channel_id = invocation.target_scope().as_str(),
            actor = %invocation.triggering_actor,
            "mediation started"
        );

        let outcome = self.triage.run(invocation, cancel).await?;
        ensure_live(invocation, cancel, "triage")?;

        let classification = self.classifier.classify(&outcome.evidence).await;
        ensure_live(invocation, cancel, "classification")?;
        info!(
            event_name = "mediation.classified",
            invocation_id = %invocation.id.0,
            label = classification.label.as_str(),
            fact_score = classification.fact_score,
            emotion_score = classification.emotion_score,
            cycles = outcome.evidence.len(),
            termination = outcome.termination.as_str(),
            "conflict classified"
        );

        let result = match self.router.route(&classification, &outcome.evidence).await {
            Ok(response) => self.assembler.assemble(&response).map(|formatted| (response, formatted)),
            Err(error) => Err(error),
        };
        // A superseded run posts nothing, even if synthesis failed meanwhile.
        ensure_live(invocation, cancel, "synthesis")?;
        let (response, formatted) = match result {
            Ok(parts) => parts,
            Err(error) => {
                warn!(
                    event_name = "mediation.failed",
                    invocation_id = %invocation.id.0,
                    error_class = error.error_class(),
                    error = %error,
                    "mediation failed"
                );
                return Err(error);
            }
        };

        info!(
            event_name = "mediation.completed",
            invocation_id = %invocation.id.0,
            strategy = response.strategy(),
            "mediation completed"
        );

        Ok(MediationOutcome {
            invocation_id: invocation.id.clone(),
            classification,
            evidence: outcome.evidence,
            termination: outcome.termination,
            response,
            formatted,
        })
    }
}

fn ensure_live(
    invocation: &Invocation,
    cancel: &CancellationToken,
    stage: &'static str,
) -> Result<(), MediationError> {
    if !cancel.is_cancelled() {
        return Ok(());
    }
    info!(
        event_name = "mediation.cancelled",
        invocation_id = %invocation.id.0,
        stage,
        "mediation cancelled after {stage}"
    );
    Err(MediationError::Cancelled)
}
