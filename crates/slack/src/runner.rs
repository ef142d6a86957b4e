use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{EventContext, EventDispatcher, HandlerResult, SlackEnvelope, SlackEvent};
use crate::web::MessagePoster;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("event queue is full")]
    QueueFull,
    #[error("event queue is closed")]
    Closed,
}

/// Source of inbound envelopes. `Ok(None)` means the stream has ended.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError>;
}

/// In-process queue between HTTP ingress and the runner.
pub struct ChannelTransport {
    receiver: Mutex<mpsc::Receiver<SlackEnvelope>>,
}

#[derive(Clone)]
pub struct EnvelopeSender {
    sender: mpsc::Sender<SlackEnvelope>,
}

impl EnvelopeSender {
    /// Never waits; ingress must acknowledge Slack within its deadline.
    pub fn enqueue(&self, envelope: SlackEnvelope) -> Result<(), TransportError> {
        self.sender.try_send(envelope).map_err(|error| match error {
            mpsc::error::TrySendError::Full(_) => TransportError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }
}

pub fn channel_transport(capacity: usize) -> (EnvelopeSender, ChannelTransport) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (EnvelopeSender { sender }, ChannelTransport { receiver: Mutex::new(receiver) })
}

#[async_trait]
impl EventTransport for ChannelTransport {
    async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError> {
        Ok(self.receiver.lock().await.recv().await)
    }
}

/// Pumps envelopes from the transport and handles each one on its own task.
pub struct EventRunner {
    transport: Arc<dyn EventTransport>,
    dispatcher: Arc<EventDispatcher>,
    poster: Arc<dyn MessagePoster>,
}

impl EventRunner {
    pub fn new(
        transport: Arc<dyn EventTransport>,
        dispatcher: Arc<EventDispatcher>,
        poster: Arc<dyn MessagePoster>,
    ) -> Self {
        Self { transport, dispatcher, poster }
    }

    /// Runs until the transport closes or `shutdown` fires, then waits for in-flight handlers.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), TransportError> {
        let mut tasks = JoinSet::new();
        let result = loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(event_name = "ingress.slack.runner_stopping", "event runner shutting down");
                    break Ok(());
                }
                next = self.transport.next_envelope() => next,
            };

            match next {
                Ok(Some(envelope)) => {
                    info!(
                        event_name = "ingress.slack.envelope_received",
                        envelope_id = %envelope.envelope_id,
                        event_type = ?envelope.event.event_type(),
                        correlation_id = %envelope.envelope_id,
                        "received slack envelope"
                    );
                    let dispatcher = self.dispatcher.clone();
                    let poster = self.poster.clone();
                    tasks.spawn(async move { deliver(&dispatcher, poster.as_ref(), envelope).await });
                }
                Ok(None) => {
                    info!(event_name = "ingress.slack.stream_closed", "event stream closed");
                    break Ok(());
                }
                Err(error) => {
                    warn!(event_name = "ingress.slack.transport_failed", error = %error, "event transport failed");
                    break Err(error);
                }
            }

            while tasks.try_join_next().is_some() {}
        };

        while tasks.join_next().await.is_some() {}
        result
    }
}

async fn deliver(dispatcher: &EventDispatcher, poster: &dyn MessagePoster, envelope: SlackEnvelope) {
    let (channel_id, thread_ts) = reply_target(&envelope);
    let context = EventContext { correlation_id: envelope.envelope_id.clone() };

    let message = match dispatcher.dispatch(&envelope, &context).await {
        Ok(HandlerResult::Responded(message)) => message,
        Ok(HandlerResult::Processed | HandlerResult::Ignored) => {
            debug!(
                event_name = "ingress.slack.no_reply",
                correlation_id = %envelope.envelope_id,
                "envelope handled without a reply"
            );
            return;
        }
        Err(error) => {
            warn!(
                event_name = "ingress.slack.dispatch_failed",
                correlation_id = %envelope.envelope_id,
                error = %error,
                "event dispatch failed"
            );
            return;
        }
    };

    let Some(channel_id) = channel_id else {
        return;
    };
    if let Err(error) = poster.post_message(&channel_id, thread_ts.as_deref(), &message).await {
        warn!(
            event_name = "egress.slack.post_failed",
            correlation_id = %envelope.envelope_id,
            channel_id = %channel_id,
            error = %error,
            "failed to post reply"
        );
    } else {
        debug!(
            event_name = "egress.slack.posted",
            correlation_id = %envelope.envelope_id,
            channel_id = %channel_id,
            "reply posted"
        );
    }
}

fn reply_target(envelope: &SlackEnvelope) -> (Option<String>, Option<String>) {
    match &envelope.event {
        SlackEvent::AppMention(event) => {
            (Some(event.channel_id.clone()), Some(event.reply_thread_ts().to_owned()))
        }
        SlackEvent::Unsupported { .. } => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    use super::{channel_transport, EventRunner, EventTransport, TransportError};
    use crate::blocks::{failure_message, MessageTemplate};
    use crate::events::{
        mention_dispatcher, AppMentionEvent, EventContext, EventHandlerError, MentionService,
        SlackEnvelope, SlackEvent,
    };
    use crate::mention::{MentionParser, MentionRequest};
    use crate::web::{MessagePoster, SlackApiError};

    #[derive(Default)]
    struct RecordingPoster {
        posts: Mutex<Vec<(String, Option<String>, String)>>,
    }

    #[async_trait]
    impl MessagePoster for RecordingPoster {
        async fn post_message(
            &self,
            channel_id: &str,
            thread_ts: Option<&str>,
            message: &MessageTemplate,
        ) -> Result<(), SlackApiError> {
            self.posts.lock().await.push((
                channel_id.to_owned(),
                thread_ts.map(str::to_owned),
                message.fallback_text.clone(),
            ));
            Ok(())
        }
    }

    struct EchoService;

    #[async_trait]
    impl MentionService for EchoService {
        async fn handle_mention(
            &self,
            request: MentionRequest,
            ctx: &EventContext,
        ) -> Result<Option<MessageTemplate>, EventHandlerError> {
            if request.text == "quiet" {
                return Ok(None);
            }
            Ok(Some(failure_message(&request.text, &ctx.correlation_id)))
        }
    }

    struct ScriptedTransport {
        envelopes: Mutex<VecDeque<Result<Option<SlackEnvelope>, TransportError>>>,
    }

    #[async_trait]
    impl EventTransport for ScriptedTransport {
        async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError> {
            self.envelopes.lock().await.pop_front().unwrap_or(Ok(None))
        }
    }

    fn mention(id: &str, text: &str) -> SlackEnvelope {
        SlackEnvelope {
            envelope_id: id.to_owned(),
            event: SlackEvent::AppMention(AppMentionEvent {
                channel_id: "C1".to_owned(),
                user_id: "U7".to_owned(),
                text: format!("<@UBOT> {text}"),
                ts: format!("1730000000.{id}"),
                thread_ts: None,
            }),
        }
    }

    fn runner(transport: Arc<dyn EventTransport>, poster: Arc<RecordingPoster>) -> EventRunner {
        let dispatcher = mention_dispatcher(MentionParser::new(Some("UBOT".to_owned())), EchoService);
        EventRunner::new(transport, Arc::new(dispatcher), poster)
    }

    #[tokio::test]
    async fn replies_are_posted_in_thread_and_quiet_results_post_nothing() {
        let (sender, transport) = channel_transport(8);
        sender.enqueue(mention("1", "first")).expect("enqueue");
        sender.enqueue(mention("2", "quiet")).expect("enqueue");
        sender
            .enqueue(SlackEnvelope {
                envelope_id: "3".to_owned(),
                event: SlackEvent::Unsupported { event_type: "reaction_added".to_owned() },
            })
            .expect("enqueue");
        drop(sender);

        let poster = Arc::new(RecordingPoster::default());
        runner(Arc::new(transport), poster.clone()).run(CancellationToken::new()).await.expect("run");

        let posts = poster.posts.lock().await.clone();
        assert_eq!(posts, vec![("C1".to_owned(), Some("1730000000.1".to_owned()), "first".to_owned())]);
    }

    #[tokio::test]
    async fn transport_failure_stops_the_runner_after_draining() {
        let transport = Arc::new(ScriptedTransport {
            envelopes: Mutex::new(VecDeque::from(vec![
                Ok(Some(mention("1", "before failure"))),
                Err(TransportError::Receive("socket reset".to_owned())),
            ])),
        });
        let poster = Arc::new(RecordingPoster::default());

        let result = runner(transport, poster.clone()).run(CancellationToken::new()).await;
        assert_eq!(result, Err(TransportError::Receive("socket reset".to_owned())));
        assert_eq!(poster.posts.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn shutdown_stops_a_waiting_runner() {
        let (_sender, transport) = channel_transport(1);
        let shutdown = CancellationToken::new();
        let poster = Arc::new(RecordingPoster::default());
        let runner = runner(Arc::new(transport), poster);

        let handle = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { runner.run(shutdown).await })
        };
        shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle).await.expect("stopped");
        assert_eq!(result.expect("join"), Ok(()));
    }

    #[test]
    fn full_queue_is_reported_without_blocking() {
        let (sender, _transport) = channel_transport(1);
        sender.enqueue(mention("1", "a")).expect("first fits");
        assert_eq!(sender.enqueue(mention("2", "b")), Err(TransportError::QueueFull));
    }
}
