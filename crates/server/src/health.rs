use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    tools: Arc<Vec<String>>,
    bot_identified: bool,
}

impl HealthState {
    pub fn new(tools: impl IntoIterator<Item = impl Into<String>>, bot_identified: bool) -> Self {
        Self { tools: Arc::new(tools.into_iter().map(Into::into).collect()), bot_identified }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub slack: HealthCheck,
    pub tools: Vec<String>,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let service = if state.tools.is_empty() {
        HealthCheck { status: "degraded", detail: "no tools registered".to_string() }
    } else {
        HealthCheck {
            status: "ready",
            detail: format!("{} tools registered", state.tools.len()),
        }
    };
    let slack = if state.bot_identified {
        HealthCheck { status: "ready", detail: "bot identity resolved".to_string() }
    } else {
        HealthCheck {
            status: "degraded",
            detail: "auth.test failed at startup; mentions are matched by position".to_string(),
        }
    };
    let ready = service.status == "ready" && slack.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service,
        slack,
        tools: state.tools.as_ref().clone(),
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}
