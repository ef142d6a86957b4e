use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::{
    blocks::{help_message, MessageTemplate},
    mention::{MentionParser, MentionRequest},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackEnvelope {
    pub envelope_id: String,
    pub event: SlackEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    AppMention(AppMentionEvent),
    Unsupported { event_type: String },
}

impl SlackEvent {
    pub fn event_type(&self) -> SlackEventType {
        match self {
            Self::AppMention(_) => SlackEventType::AppMention,
            Self::Unsupported { .. } => SlackEventType::Unsupported,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SlackEventType {
    AppMention,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AppMentionEvent {
    #[serde(rename = "channel")]
    pub channel_id: String,
    #[serde(rename = "user")]
    pub user_id: String,
    pub text: String,
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
}

impl AppMentionEvent {
    /// Replies go into the thread the mention belongs to, or start one under the mention.
    pub fn reply_thread_ts(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }
}

/// What an Events API request body turned out to be.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    UrlVerification { challenge: String },
    Callback(SlackEnvelope),
    Ignored { payload_type: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("request body is not a valid events payload: {0}")]
    Malformed(String),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawPayload {
    UrlVerification { challenge: String },
    EventCallback { event_id: String, event: Value },
    #[serde(other)]
    Other,
}

pub fn parse_inbound(body: &[u8]) -> Result<Inbound, EnvelopeError> {
    let payload: RawPayload =
        serde_json::from_slice(body).map_err(|error| EnvelopeError::Malformed(error.to_string()))?;

    Ok(match payload {
        RawPayload::UrlVerification { challenge } => Inbound::UrlVerification { challenge },
        RawPayload::EventCallback { event_id, event } => {
            Inbound::Callback(SlackEnvelope { envelope_id: event_id, event: parse_event(event) })
        }
        RawPayload::Other => Inbound::Ignored {
            payload_type: serde_json::from_slice::<Value>(body)
                .ok()
                .and_then(|value| value.get("type").and_then(Value::as_str).map(str::to_owned))
                .unwrap_or_else(|| "unknown".to_owned()),
        },
    })
}

fn parse_event(event: Value) -> SlackEvent {
    let event_type = event.get("type").and_then(Value::as_str).unwrap_or("unknown").to_owned();
    if event_type != "app_mention" || event.get("bot_id").is_some() {
        return SlackEvent::Unsupported { event_type };
    }
    match serde_json::from_value::<AppMentionEvent>(event) {
        Ok(mention) => SlackEvent::AppMention(mention),
        Err(_) => SlackEvent::Unsupported { event_type },
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(MessageTemplate),
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("mention handler failure: {0}")]
    Mention(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> SlackEventType;
    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<SlackEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Mediation entry point behind the mention handler. `Ok(None)` means nothing should be posted.
#[async_trait]
pub trait MentionService: Send + Sync {
    async fn handle_mention(
        &self,
        request: MentionRequest,
        ctx: &EventContext,
    ) -> Result<Option<MessageTemplate>, EventHandlerError>;
}

pub struct AppMentionHandler<S> {
    parser: MentionParser,
    service: S,
}

impl<S> AppMentionHandler<S>
where
    S: MentionService,
{
    pub fn new(parser: MentionParser, service: S) -> Self {
        Self { parser, service }
    }
}

#[async_trait]
impl<S> EventHandler for AppMentionHandler<S>
where
    S: MentionService + 'static,
{
    fn event_type(&self) -> SlackEventType {
        SlackEventType::AppMention
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::AppMention(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let request = self.parser.parse(event);
        if request.is_help() {
            return Ok(HandlerResult::Responded(help_message()));
        }

        let message = self.service.handle_mention(request, ctx).await?;
        Ok(match message {
            Some(message) => HandlerResult::Responded(message),
            None => HandlerResult::Processed,
        })
    }
}

pub fn mention_dispatcher<S>(parser: MentionParser, service: S) -> EventDispatcher
where
    S: MentionService + 'static,
{
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(AppMentionHandler::new(parser, service));
    dispatcher
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{
        mention_dispatcher, parse_inbound, EventContext, EventDispatcher, EventHandlerError,
        HandlerResult, Inbound, MentionService, SlackEnvelope, SlackEvent,
    };
    use crate::blocks::{failure_message, MessageTemplate};
    use crate::mention::{MentionParser, MentionRequest};

    #[derive(Default)]
    struct RecordingService {
        requests: Mutex<Vec<MentionRequest>>,
        silent: bool,
    }

    #[async_trait]
    impl MentionService for RecordingService {
        async fn handle_mention(
            &self,
            request: MentionRequest,
            ctx: &EventContext,
        ) -> Result<Option<MessageTemplate>, EventHandlerError> {
            self.requests.lock().expect("lock").push(request);
            if self.silent {
                return Ok(None);
            }
            Ok(Some(failure_message("recorded", &ctx.correlation_id)))
        }
    }

    fn mention_body(text: &str) -> String {
        serde_json::json!({
            "type": "event_callback",
            "event_id": "Ev1",
            "event": {
                "type": "app_mention",
                "user": "U7",
                "text": text,
                "ts": "1730000000.000100",
                "channel": "C1"
            }
        })
        .to_string()
    }

    fn envelope(body: &str) -> SlackEnvelope {
        match parse_inbound(body.as_bytes()).expect("parse") {
            Inbound::Callback(envelope) => envelope,
            other => panic!("expected callback, got {other:?}"),
        }
    }

    #[test]
    fn url_verification_carries_challenge() {
        let inbound =
            parse_inbound(br#"{"type":"url_verification","challenge":"abc","token":"t"}"#).expect("parse");
        assert_eq!(inbound, Inbound::UrlVerification { challenge: "abc".to_owned() });
    }

    #[test]
    fn app_mention_callback_is_parsed() {
        let envelope = envelope(&mention_body("<@UBOT> hi"));
        assert_eq!(envelope.envelope_id, "Ev1");
        let SlackEvent::AppMention(event) = envelope.event else {
            panic!("expected mention");
        };
        assert_eq!(event.channel_id, "C1");
        assert_eq!(event.reply_thread_ts(), "1730000000.000100");
    }

    #[test]
    fn bot_authored_and_other_events_are_unsupported() {
        let body = serde_json::json!({
            "type": "event_callback",
            "event_id": "Ev2",
            "event": { "type": "app_mention", "bot_id": "B1", "user": "U1", "text": "x", "ts": "1", "channel": "C1" }
        })
        .to_string();
        assert!(matches!(envelope(&body).event, SlackEvent::Unsupported { .. }));

        let body = r#"{"type":"event_callback","event_id":"Ev3","event":{"type":"reaction_added"}}"#;
        assert_eq!(
            envelope(body).event,
            SlackEvent::Unsupported { event_type: "reaction_added".to_owned() }
        );
    }

    #[test]
    fn unknown_payload_types_are_ignored_and_garbage_is_rejected() {
        assert_eq!(
            parse_inbound(br#"{"type":"app_rate_limited"}"#).expect("parse"),
            Inbound::Ignored { payload_type: "app_rate_limited".to_owned() }
        );
        assert!(parse_inbound(b"not json").is_err());
    }

    #[tokio::test]
    async fn dispatcher_routes_mentions_to_service() {
        let dispatcher = mention_dispatcher(
            MentionParser::new(Some("UBOT".to_owned())),
            RecordingService::default(),
        );
        let context = EventContext { correlation_id: "Ev1".to_owned() };

        let result = dispatcher
            .dispatch(&envelope(&mention_body("<@UBOT> what happened in <#C9|launch>?")), &context)
            .await
            .expect("dispatch");

        assert!(matches!(result, HandlerResult::Responded(message) if message.fallback_text == "recorded"));
    }

    #[tokio::test]
    async fn help_requests_skip_the_service() {
        let dispatcher = mention_dispatcher(
            MentionParser::new(Some("UBOT".to_owned())),
            RecordingService { silent: true, ..RecordingService::default() },
        );

        let result = dispatcher
            .dispatch(&envelope(&mention_body("<@UBOT> help")), &EventContext::default())
            .await
            .expect("dispatch");
        assert!(matches!(result, HandlerResult::Responded(message) if message.fallback_text.contains("BetweenUs")));

        let result = dispatcher
            .dispatch(&envelope(&mention_body("<@UBOT> look here")), &EventContext::default())
            .await
            .expect("dispatch");
        assert_eq!(result, HandlerResult::Processed);
    }

    #[tokio::test]
    async fn dispatcher_returns_ignored_when_no_handler_registered() {
        let dispatcher = EventDispatcher::default();
        let result = dispatcher
            .dispatch(&envelope(&mention_body("hi")), &EventContext::default())
            .await
            .expect("dispatch");
        assert_eq!(result, HandlerResult::Ignored);
        assert_eq!(dispatcher.handler_count(), 0);
    }
}
