//! Per-task processing
//!
//! One matched (event, rule) pair becomes at most one notification. The
//! token is checked before any prompt runs; an execution failure that looks
//! like an expired token gets exactly one refresh and one retry.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use hassbridge_core::{
    EventSubscription, HubEvent, NotificationMessage, NotificationSink, NotificationSource,
    TokenProvider,
};
use hassbridge_hub::AutomationLookup;

use crate::executor::{ExecutionError, PromptExecutor};
use crate::pipeline::TaskHandler;
use crate::prompt::PromptBuilder;
use crate::queue::QueuedTask;

pub struct EventProcessor {
    tokens: Arc<dyn TokenProvider>,
    executor: Arc<dyn PromptExecutor>,
    notifier: Arc<dyn NotificationSink>,
    automations: Option<Arc<dyn AutomationLookup>>,
    prompts: PromptBuilder,
}

impl EventProcessor {
    pub fn new(
        tokens: Arc<dyn TokenProvider>,
        executor: Arc<dyn PromptExecutor>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            tokens,
            executor,
            notifier,
            automations: None,
            prompts: PromptBuilder::default(),
        }
    }

    /// Look up automation configs for `automation_triggered` prompts
    pub fn with_automation_lookup(mut self, lookup: Arc<dyn AutomationLookup>) -> Self {
        self.automations = Some(lookup);
        self
    }

    pub fn with_prompt_builder(mut self, prompts: PromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }

    /// Process one matched event; returns whether a notification was generated
    pub async fn process(&self, event: &HubEvent, rule: &EventSubscription) -> bool {
        info!(
            event_type = %event.event_type,
            rule = %rule.name,
            entity_id = event.entity_id().unwrap_or("-"),
            "[Pipeline] Processing event"
        );

        let token = self.tokens.ensure_valid_token().await;
        if !token.success && token.needs_relogin {
            error!(rule = %rule.name, message = %token.message, "[Pipeline] Token needs re-login, skipping");
            self.notify_failure(rule, None, "token expired, re-login required")
                .await;
            return false;
        }
        if !token.success {
            warn!(message = %token.message, "[Pipeline] Token check failed, continuing anyway");
        }

        let prompt = self.build_prompt(event, rule).await;

        let mut result = self.executor.execute(&prompt).await;
        if let Err(e) = &result {
            if e.looks_like_expired_token() {
                info!(rule = %rule.name, "[Pipeline] Token rejected during execution, refreshing once");
                let refresh = self.tokens.refresh_token().await;
                if refresh.success {
                    result = self.executor.execute(&prompt).await;
                } else {
                    warn!(message = %refresh.message, "[Pipeline] Refresh before retry failed");
                }
            }
        }

        match result {
            Ok(text) => {
                let message = NotificationMessage::markdown(text, NotificationSource::Event)
                    .with_metadata("eventType", event.event_type.clone())
                    .with_metadata("subscriptionName", rule.name.clone());
                let results = self.notifier.notify(message).await;
                let delivered = results.iter().filter(|r| r.success).count();
                info!(
                    rule = %rule.name,
                    delivered,
                    channels = results.len(),
                    "[Pipeline] Notification sent"
                );
                true
            }
            Err(e) => {
                error!(rule = %rule.name, event_type = %event.event_type, error = %e, "[Pipeline] Generation failed");
                self.notify_failure(rule, Some(event), &failure_reason(&e)).await;
                false
            }
        }
    }

    async fn build_prompt(&self, event: &HubEvent, rule: &EventSubscription) -> String {
        let automation = match (&self.automations, event.event_type.as_str(), event.entity_id()) {
            (Some(lookup), "automation_triggered", Some(entity_id)) => {
                lookup.automation_config(entity_id).await
            }
            _ => None,
        };
        debug!(has_automation = automation.is_some(), "[Pipeline] Building prompt");
        self.prompts.build(event, rule, automation.as_ref())
    }

    async fn notify_failure(&self, rule: &EventSubscription, event: Option<&HubEvent>, reason: &str) {
        let mut text = format!("❌ *Event notification failed*\n*Rule*: {}", rule.name);
        if let Some(event) = event {
            text.push_str(&format!("\n*Event*: {}", event.event_type));
        }
        text.push_str(&format!("\n*Error*: {}", reason));

        let message = NotificationMessage::markdown(text, NotificationSource::Event)
            .with_metadata("subscriptionName", rule.name.clone());
        self.notifier.notify(message).await;
    }
}

fn failure_reason(error: &ExecutionError) -> String {
    if error.looks_like_expired_token() {
        "token expired, re-login required".to_string()
    } else {
        error.to_string()
    }
}

#[async_trait]
impl TaskHandler for EventProcessor {
    async fn handle(&self, task: QueuedTask) -> bool {
        self.process(&task.event, &task.rule).await
    }
}
