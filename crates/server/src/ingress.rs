//! `POST /slack/events`: verify, acknowledge and queue. Mediation happens on the runner, never
//! inside the request.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use betweenus_slack::events::{parse_inbound, Inbound};
use betweenus_slack::runner::EnvelopeSender;
use betweenus_slack::signature::{SignatureVerifier, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use serde_json::json;
use tracing::{debug, info, warn};

pub const RETRY_REASON_HEADER: &str = "x-slack-retry-reason";

#[derive(Clone)]
pub struct IngressState {
    verifier: Arc<SignatureVerifier>,
    queue: EnvelopeSender,
}

impl IngressState {
    pub fn new(verifier: SignatureVerifier, queue: EnvelopeSender) -> Self {
        Self { verifier: Arc::new(verifier), queue }
    }
}

pub fn router(state: IngressState) -> Router {
    Router::new().route("/slack/events", post(slack_events)).with_state(state)
}

pub async fn slack_events(
    State(state): State<IngressState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(error) = state.verifier.verify_now(
        header(&headers, TIMESTAMP_HEADER),
        header(&headers, SIGNATURE_HEADER),
        &body,
    ) {
        warn!(event_name = "ingress.slack.signature_rejected", error = %error, "rejected unsigned request");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let inbound = match parse_inbound(&body) {
        Ok(inbound) => inbound,
        Err(error) => {
            warn!(event_name = "ingress.slack.malformed", error = %error, "rejected malformed payload");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match inbound {
        Inbound::UrlVerification { challenge } => {
            info!(event_name = "ingress.slack.url_verified", "answered url verification");
            Json(json!({ "challenge": challenge })).into_response()
        }
        Inbound::Callback(envelope) => {
            // A timeout retry means the original was most likely accepted already.
            if header(&headers, RETRY_REASON_HEADER) == Some("http_timeout") {
                info!(
                    event_name = "ingress.slack.retry_skipped",
                    correlation_id = %envelope.envelope_id,
                    "skipped timeout retry"
                );
                return StatusCode::OK.into_response();
            }
            let envelope_id = envelope.envelope_id.clone();
            match state.queue.enqueue(envelope) {
                Ok(()) => StatusCode::OK.into_response(),
                Err(error) => {
                    warn!(
                        event_name = "ingress.slack.enqueue_failed",
                        correlation_id = %envelope_id,
                        error = %error,
                        "could not queue event"
                    );
                    StatusCode::SERVICE_UNAVAILABLE.into_response()
                }
            }
        }
        Inbound::Ignored { payload_type } => {
            debug!(event_name = "ingress.slack.ignored", payload_type = %payload_type, "ignored payload");
            StatusCode::OK.into_response()
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use betweenus_slack::events::SlackEvent;
    use betweenus_slack::runner::{channel_transport, ChannelTransport, EventTransport};
    use betweenus_slack::signature::{SignatureVerifier, SIGNATURE_HEADER, TIMESTAMP_HEADER};
    use secrecy::SecretString;
    use tower::ServiceExt;

    use super::{router, IngressState, RETRY_REASON_HEADER};

    fn verifier() -> SignatureVerifier {
        SignatureVerifier::new(SecretString::from("ingress-test-secret".to_owned()))
    }

    fn app(capacity: usize) -> (Router, ChannelTransport) {
        let (queue, transport) = channel_transport(capacity);
        (router(IngressState::new(verifier(), queue)), transport)
    }

    fn signed(body: &str) -> Request<Body> {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = verifier().sign(&timestamp, body.as_bytes()).expect("sign");
        Request::builder()
            .method("POST")
            .uri("/slack/events")
            .header(TIMESTAMP_HEADER, timestamp)
            .header(SIGNATURE_HEADER, signature)
            .body(Body::from(body.to_owned()))
            .expect("request")
    }

    fn mention_body(event_id: &str) -> String {
        serde_json::json!({
            "type": "event_callback",
            "event_id": event_id,
            "event": {
                "type": "app_mention",
                "user": "U7",
                "text": "<@UBOT> what happened?",
                "ts": "1730000000.000100",
                "channel": "C1"
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn url_verification_echoes_the_challenge() {
        let (app, _transport) = app(4);
        let response = app
            .oneshot(signed(r#"{"type":"url_verification","challenge":"c-123","token":"t"}"#))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let value: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(value["challenge"], "c-123");
    }

    #[tokio::test]
    async fn signed_callback_is_acknowledged_and_queued() {
        let (app, transport) = app(4);
        let response = app.oneshot(signed(&mention_body("Ev1"))).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let envelope = transport.next_envelope().await.expect("receive").expect("queued");
        assert_eq!(envelope.envelope_id, "Ev1");
        assert!(matches!(envelope.event, SlackEvent::AppMention(_)));
    }

    #[tokio::test]
    async fn unsigned_and_tampered_requests_are_rejected() {
        let (app, _transport) = app(4);
        let unsigned = Request::builder()
            .method("POST")
            .uri("/slack/events")
            .body(Body::from(mention_body("Ev1")))
            .expect("request");
        let response = app.clone().oneshot(unsigned).await.expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let mut tampered = signed(&mention_body("Ev1"));
        *tampered.body_mut() = Body::from(mention_body("Ev2"));
        let response = app.oneshot(tampered).await.expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn timeout_retries_are_acknowledged_without_queueing() {
        let (app, _transport) = app(1);
        let mut retry = signed(&mention_body("Ev1"));
        retry.headers_mut().insert(RETRY_REASON_HEADER, "http_timeout".parse().expect("header"));
        assert_eq!(app.clone().oneshot(retry).await.expect("response").status(), StatusCode::OK);

        // The queue still has room for the next event.
        let response = app.oneshot(signed(&mention_body("Ev2"))).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn full_queue_asks_slack_to_retry() {
        let (app, _transport) = app(1);
        let first = app.clone().oneshot(signed(&mention_body("Ev1"))).await.expect("response");
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(signed(&mention_body("Ev2"))).await.expect("response");
        assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn malformed_body_is_a_bad_request() {
        let (app, _transport) = app(1);
        let response = app.oneshot(signed("not json")).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
