mod bootstrap;
mod health;
mod ingress;
mod mediation;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use betweenus_core::config::{AppConfig, LoadOptions};
use betweenus_slack::events::mention_dispatcher;
use betweenus_slack::mention::MentionParser;
use betweenus_slack::runner::{channel_transport, EventRunner};
use betweenus_slack::signature::SignatureVerifier;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::health::HealthState;
use crate::ingress::IngressState;
use crate::mediation::MediationService;

const EVENT_QUEUE_CAPACITY: usize = 64;

fn init_logging(config: &AppConfig) {
    use betweenus_core::config::LogFormat::*;

    // RUST_LOG wins over the configured level.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let shutdown = CancellationToken::new();

    let service = MediationService::new(app.runtime.clone(), shutdown.child_token());
    let dispatcher = mention_dispatcher(MentionParser::new(app.bot_user_id.clone()), service);
    let (queue, transport) = channel_transport(EVENT_QUEUE_CAPACITY);
    let runner = EventRunner::new(Arc::new(transport), Arc::new(dispatcher), app.slack.clone());
    let runner_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { runner.run(shutdown).await }
    });

    let routes = ingress::router(IngressState::new(
        SignatureVerifier::new(app.config.slack.signing_secret.clone()),
        queue,
    ))
    .merge(health::router(HealthState::new(
        app.runtime.registry().names(),
        app.bot_user_id.is_some(),
    )));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "betweenus-server listening for slack events"
    );

    axum::serve(listener, routes).with_graceful_shutdown(wait_for_shutdown(shutdown.clone())).await?;

    info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "betweenus-server stopping"
    );
    shutdown.cancel();

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    match tokio::time::timeout(grace, runner_task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(error))) => {
            warn!(event_name = "system.server.runner_failed", error = %error, "event runner failed");
        }
        Ok(Err(error)) => {
            warn!(event_name = "system.server.runner_panicked", error = %error, "event runner panicked");
        }
        Err(_) => {
            warn!(
                event_name = "system.server.shutdown_timeout",
                grace_secs = grace.as_secs(),
                "in-flight mediations did not finish before the grace period"
            );
        }
    }

    Ok(())
}

async fn wait_for_shutdown(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(error) = result {
                warn!(event_name = "system.server.signal_failed", error = %error, "could not listen for ctrl-c");
                shutdown.cancelled().await;
            }
        }
        _ = shutdown.cancelled() => {}
    }
}
