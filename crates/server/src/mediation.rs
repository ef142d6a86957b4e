use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use betweenus_agent::MediationRuntime;
use betweenus_slack::blocks::{failure_message, intervention_message, MessageTemplate};
use betweenus_slack::events::{EventContext, EventHandlerError, MentionService};
use betweenus_slack::mention::MentionRequest;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Runs one mediation per mention. A newer mention about the same conversation cancels the
/// older one, and cancelled runs post nothing.
#[derive(Clone)]
pub struct MediationService {
    runtime: Arc<MediationRuntime>,
    in_flight: Arc<Mutex<HashMap<String, InFlight>>>,
    tickets: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

struct InFlight {
    ticket: u64,
    cancel: CancellationToken,
}

impl MediationService {
    pub fn new(runtime: Arc<MediationRuntime>, shutdown: CancellationToken) -> Self {
        Self {
            runtime,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            tickets: Arc::new(AtomicU64::new(0)),
            shutdown,
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().map(|map| map.len()).unwrap_or_default()
    }

    fn begin(&self, target: &str) -> (u64, CancellationToken) {
        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
        let cancel = self.shutdown.child_token();
        let previous = match self.in_flight.lock() {
            Ok(mut map) => map.insert(target.to_owned(), InFlight { ticket, cancel: cancel.clone() }),
            Err(_) => None,
        };
        if let Some(previous) = previous {
            info!(
                event_name = "mediation.superseded",
                channel_id = target,
                "newer request supersedes in-flight mediation"
            );
            previous.cancel.cancel();
        }
        (ticket, cancel)
    }

    fn finish(&self, target: &str, ticket: u64) {
        if let Ok(mut map) = self.in_flight.lock() {
            if map.get(target).is_some_and(|entry| entry.ticket == ticket) {
                map.remove(target);
            }
        }
    }
}

#[async_trait]
impl MentionService for MediationService {
    async fn handle_mention(
        &self,
        request: MentionRequest,
        ctx: &EventContext,
    ) -> Result<Option<MessageTemplate>, EventHandlerError> {
        let target = request.target_channel().to_owned();
        let invocation = request.to_invocation();
        let (ticket, cancel) = self.begin(&target);

        let result = self.runtime.mediate(&invocation, &cancel).await;
        self.finish(&target, ticket);

        match result {
            Ok(outcome) => {
                Ok(Some(intervention_message(&outcome.formatted, outcome.classification.label)))
            }
            Err(error) => {
                warn!(
                    event_name = "mediation.not_delivered",
                    correlation_id = %ctx.correlation_id,
                    invocation_id = %invocation.id.0,
                    error_class = error.error_class(),
                    error = %error,
                    "mediation ended without an intervention"
                );
                Ok(error.user_message().map(|summary| failure_message(&summary, &ctx.correlation_id)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use betweenus_agent::{register_builtins, LoopPolicy, MediationRuntime, RegistryConfig, ToolRegistry};
    use betweenus_core::domain::conversation::{Message, UserProfile};
    use betweenus_core::domain::invocation::ConversationScope;
    use betweenus_core::errors::{ResourceKind, ToolError};
    use betweenus_core::sources::ConversationSource;
    use betweenus_slack::events::{EventContext, MentionService};
    use betweenus_slack::mention::MentionRequest;
    use chrono::Utc;
    use tokio::sync::Notify;
    use tokio_util::sync::CancellationToken;

    use super::MediationService;

    /// Channel transcripts in memory. The first history fetch of `gated` waits for `release`.
    #[derive(Default)]
    pub(crate) struct TranscriptSource {
        pub channels: HashMap<String, Vec<(String, String)>>,
        pub gated: Option<String>,
        pub entered: Notify,
        pub release: Notify,
        pub gated_calls: AtomicU32,
    }

    impl TranscriptSource {
        pub fn with_channel(mut self, channel: &str, lines: &[(&str, &str)]) -> Self {
            self.channels.insert(
                channel.to_owned(),
                lines.iter().map(|(author, text)| ((*author).to_owned(), (*text).to_owned())).collect(),
            );
            self
        }
    }

    #[async_trait]
    impl ConversationSource for TranscriptSource {
        async fn fetch_history(
            &self,
            scope: &ConversationScope,
            limit: u32,
        ) -> Result<Vec<Message>, ToolError> {
            if self.gated.as_deref() == Some(scope.as_str())
                && self.gated_calls.fetch_add(1, Ordering::SeqCst) == 0
            {
                self.entered.notify_one();
                self.release.notified().await;
            }
            let lines = self
                .channels
                .get(scope.as_str())
                .ok_or_else(|| ToolError::not_found(ResourceKind::Conversation, scope.as_str()))?;
            let skip = lines.len().saturating_sub(limit as usize);
            Ok(lines
                .iter()
                .skip(skip)
                .map(|(author, text)| Message {
                    author: author.clone(),
                    text: text.clone(),
                    timestamp: Utc::now(),
                })
                .collect())
        }

        async fn user_info(&self, user_id: &str) -> Result<UserProfile, ToolError> {
            Ok(UserProfile {
                id: user_id.to_owned(),
                name: user_id.to_lowercase(),
                real_name: None,
                display_name: None,
            })
        }

        async fn channel_members(&self, scope: &ConversationScope) -> Result<Vec<String>, ToolError> {
            let lines = self
                .channels
                .get(scope.as_str())
                .ok_or_else(|| ToolError::not_found(ResourceKind::Conversation, scope.as_str()))?;
            let mut members = lines.iter().map(|(author, _)| author.clone()).collect::<Vec<_>>();
            members.dedup();
            Ok(members)
        }

        async fn list_users(&self) -> Result<Vec<UserProfile>, ToolError> {
            Ok(Vec::new())
        }
    }

    pub(crate) fn runtime(source: Arc<TranscriptSource>) -> Arc<MediationRuntime> {
        let mut registry = ToolRegistry::new(RegistryConfig::default());
        register_builtins(&mut registry, source, None).expect("register");
        Arc::new(MediationRuntime::heuristic(Arc::new(registry), LoopPolicy::default()).expect("runtime"))
    }

    pub(crate) fn deadline_dispute() -> TranscriptSource {
        TranscriptSource::default().with_channel(
            "C1",
            &[
                ("U1", "The release deadline is Friday per the ticket."),
                ("U2", "No, the roadmap says the deadline is Monday."),
            ],
        )
    }

    fn request(channel: &str, text: &str) -> MentionRequest {
        MentionRequest {
            channel_id: channel.to_owned(),
            user_id: "U9".to_owned(),
            thread_ts: "1730000000.000100".to_owned(),
            text: text.to_owned(),
            explicit_channel: None,
            history_limit: None,
        }
    }

    fn context() -> EventContext {
        EventContext { correlation_id: "Ev1".to_owned() }
    }

    #[tokio::test]
    async fn completed_mediation_becomes_an_intervention() {
        let service = MediationService::new(runtime(Arc::new(deadline_dispute())), CancellationToken::new());

        let message = service
            .handle_mention(request("C1", "what is going on?"), &context())
            .await
            .expect("handled")
            .expect("message");

        assert!(message.fallback_text.contains("*Summary*"));
        assert_eq!(service.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn missing_channel_posts_a_failure_notice() {
        let service = MediationService::new(runtime(Arc::new(deadline_dispute())), CancellationToken::new());

        let message = service
            .handle_mention(request("C404", "what is going on?"), &context())
            .await
            .expect("handled")
            .expect("failure notice");

        assert!(message.fallback_text.contains("C404"));
    }

    #[tokio::test]
    async fn newer_mention_supersedes_in_flight_one() {
        let source = Arc::new(TranscriptSource { gated: Some("C1".to_owned()), ..deadline_dispute() });
        let service = MediationService::new(runtime(source.clone()), CancellationToken::new());

        let first = tokio::spawn({
            let service = service.clone();
            async move { service.handle_mention(request("C1", "first"), &context()).await }
        });
        source.entered.notified().await;

        let second = service.handle_mention(request("C1", "second"), &context()).await.expect("handled");
        assert!(second.is_some());

        source.release.notify_one();
        let first = first.await.expect("join").expect("handled");
        assert!(first.is_none(), "superseded mediation must post nothing");
        assert_eq!(service.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_cancels_mediations() {
        let shutdown = CancellationToken::new();
        let service = MediationService::new(runtime(Arc::new(deadline_dispute())), shutdown.clone());
        shutdown.cancel();

        let message = service.handle_mention(request("C1", "anyone?"), &context()).await.expect("handled");
        assert!(message.is_none());
    }
}
