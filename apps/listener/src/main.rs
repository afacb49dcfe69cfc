//! HassBridge listener daemon
//!
//! Connects to the hub's realtime socket, matches events against the rule
//! store and turns matches into Slack notifications, keeping the CLI's
//! OAuth token fresh in the background.

mod config;
mod logging;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tracing::{debug, error, info, warn};

use hassbridge_auth::{OAuthConfigResolver, TokenRefreshEngine};
use hassbridge_core::{
    branding, DomainEvent, EventBus, EventReceiver, NewSubscription, NotificationManager,
    NotificationMessage, NotificationSink, NotificationSource, SlackAdapter,
};
use hassbridge_hub::{HubClient, HubRestClient};
use hassbridge_pipeline::{
    attach_rule_source, route_events, sync_subscriptions, ClaudeCliExecutor, EventPipeline,
    EventProcessor, PromptBuilder,
};
use hassbridge_storage::{JsonCredentialStore, SubscriptionRegistry};

use crate::config::ListenerConfig;

/// How long in-flight notifications may finish after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

const CONNECTION_FAILED_MESSAGE: &str =
    "❌ *Event Listener*: hub connection failed, max reconnect attempts exceeded";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = ListenerConfig::from_env().context("invalid configuration")?;

    // Keep the guard alive for the entire program - dropping it stops file logging
    let _log_guard = logging::init_tracing(&config.log_dir);

    info!(
        "Starting {} listener v{}",
        branding::DISPLAY_NAME,
        env!("CARGO_PKG_VERSION")
    );
    info!(addon = config.environment.is_addon, "Logs directory: {}", config.log_dir.display());
    debug!(?config, "Configuration loaded");

    let bus = EventBus::new();
    tokio::spawn(audit_log(bus.subscribe()));

    // ── Notifications ────────────────────────────────────────────────────
    let notifier = Arc::new(NotificationManager::new().with_adapter(Arc::new(SlackAdapter::new(
        config.slack_bot_token.clone(),
        config.slack_default_channel.clone(),
    ))));
    if notifier.configured_channels().is_empty() {
        warn!("No notification channel configured; notifications will be dropped");
    }

    // ── Token lifecycle ──────────────────────────────────────────────────
    let store = Arc::new(JsonCredentialStore::new(config.environment.credentials_path()));
    let resolver = Arc::new(OAuthConfigResolver::new(&config.environment.claude_path));
    let tokens = TokenRefreshEngine::builder(store, resolver)
        .with_notifier(notifier.clone())
        .with_events(bus.sender())
        .with_relogin_hint(config.relogin_hint())
        .build();
    tokens.start();

    // ── Rules ────────────────────────────────────────────────────────────
    let registry = Arc::new(
        SubscriptionRegistry::open_with_events(&config.environment.subscriptions_path, bus.sender())
            .await
            .context("failed to open subscription store")?,
    );
    ensure_default_rule(&registry).await?;

    // ── Pipeline ─────────────────────────────────────────────────────────
    let executor = ClaudeCliExecutor::new(&config.environment.claude_path)
        .with_config_dir(&config.environment.claude_config_dir)
        .with_timeout(config.claude_timeout);
    let processor = EventProcessor::new(Arc::new(tokens.clone()), Arc::new(executor), notifier.clone())
        .with_automation_lookup(Arc::new(HubRestClient::new(&config.hub)))
        .with_prompt_builder(PromptBuilder::new(&config.language));
    let pipeline =
        EventPipeline::new(registry.clone(), Arc::new(processor)).with_events(bus.sender());

    // ── Hub connection ───────────────────────────────────────────────────
    let hub = HubClient::new(&config.hub).with_events(bus.sender());
    attach_rule_source(&hub, registry.clone());
    route_events(&hub, pipeline.clone());
    {
        let notifier = notifier.clone();
        hub.on_connection_failed(move || {
            let notifier = notifier.clone();
            tokio::spawn(async move {
                notifier
                    .notify(NotificationMessage::markdown(
                        CONNECTION_FAILED_MESSAGE,
                        NotificationSource::Event,
                    ))
                    .await;
            });
        });
    }

    hub.connect().await.context("failed to connect to hub")?;
    sync_subscriptions(&hub, registry.as_ref());

    {
        let hub = hub.clone();
        registry
            .start_watching(move |rules| {
                sync_subscriptions(&hub, &rules.to_vec());
            })
            .context("failed to watch subscription store")?;
    }

    info!(
        rules = registry.list_enabled().len(),
        event_types = hub.subscribed_types().len(),
        "{} listener running",
        branding::DISPLAY_NAME
    );

    shutdown_signal().await;

    info!("Shutting down...");
    tokens.stop();
    registry.stop_watching();
    hub.disconnect().await;
    if tokio::time::timeout(SHUTDOWN_GRACE, pipeline.wait_idle())
        .await
        .is_err()
    {
        warn!(
            active = pipeline.active(),
            queued = pipeline.queue_len(),
            "Shutdown grace period elapsed with work pending"
        );
    }
    info!("Shutdown complete");
    Ok(())
}

/// Seed the store with one rule announcing triggered automations
async fn ensure_default_rule(registry: &SubscriptionRegistry) -> anyhow::Result<()> {
    if !registry.list().is_empty() {
        return Ok(());
    }
    let rule = registry
        .create(
            NewSubscription::new("Automation notifications", "automation_triggered")
                .with_description(
                    "When an automation is triggered, briefly tell me which automation ran \
                     and what it does.",
                ),
        )
        .await
        .context("failed to create default rule")?;
    info!(rule = %rule.name, id = %rule.id, "Created default rule");
    Ok(())
}

async fn audit_log(mut events: EventReceiver) {
    while let Some(event) = events.recv().await {
        let payload = serde_json::to_string(&event).unwrap_or_default();
        match &event {
            DomainEvent::HubConnectionFailed { .. } | DomainEvent::HubAuthFailed { .. } => {
                error!(kind = event.type_name(), %payload, "[EventBus] Domain event")
            }
            _ if event.is_alert() => {
                warn!(kind = event.type_name(), %payload, "[EventBus] Domain event")
            }
            _ => debug!(kind = event.type_name(), %payload, "[EventBus] Domain event"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
