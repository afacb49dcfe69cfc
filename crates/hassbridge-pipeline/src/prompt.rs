//! Prompt text for the notification generator

use chrono::{Local, Utc};
use serde_json::Value;

use hassbridge_core::{EventSubscription, HubEvent};
use hassbridge_hub::AutomationConfig;

pub const DEFAULT_LANGUAGE: &str = "Traditional Chinese";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    language: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_LANGUAGE)
    }
}

impl PromptBuilder {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Build the prompt for one matched event.
    ///
    /// `automation` is the stored automation config, when the event is an
    /// `automation_triggered` and the hub lookup found it.
    pub fn build(
        &self,
        event: &HubEvent,
        rule: &EventSubscription,
        automation: Option<&AutomationConfig>,
    ) -> String {
        let fired = event
            .time_fired
            .unwrap_or_else(Utc::now)
            .with_timezone(&Local)
            .format(TIME_FORMAT);

        let mut lines = vec![
            "A smart home event just occurred.".to_string(),
            format!("Event type: {}", event.event_type),
            format!("Time: {}", fired),
        ];

        match event.event_type.as_str() {
            "automation_triggered" => automation_lines(event, automation, &mut lines),
            "state_changed" => state_change_lines(event, &mut lines),
            _ => lines.push(format!("Event data: {}", pretty(&Value::Object(event.data.clone())))),
        }

        lines.push(String::new());
        lines.push(format!("User request: {}", rule.description));
        lines.push(String::new());
        lines.push(format!(
            "Reply in {} with only the concise notification message, suitable for sending \
             to Slack. Do not add any explanation.",
            self.language
        ));

        lines.join("\n")
    }
}

fn automation_lines(event: &HubEvent, automation: Option<&AutomationConfig>, lines: &mut Vec<String>) {
    lines.push(format!("Automation: {}", event.entity_id().unwrap_or("unknown")));
    if let Some(name) = event.data_str("name") {
        lines.push(format!("Automation name: {}", name));
    }
    if let Some(source) = event.data_str("source") {
        lines.push(format!("Trigger source: {}", source));
    }
    let Some(config) = automation else {
        return;
    };
    if let Some(actions) = &config.actions {
        lines.push(format!("Automation actions: {}", pretty(actions)));
    }
    if let Some(description) = config.description.as_deref().filter(|d| !d.is_empty()) {
        lines.push(format!("Automation description: {}", description));
    }
}

fn state_change_lines(event: &HubEvent, lines: &mut Vec<String>) {
    lines.push(format!("Entity: {}", event.entity_id().unwrap_or("unknown")));

    let state_of = |key: &str| {
        event
            .data
            .get(key)
            .and_then(|s| s.get("state"))
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string()
    };
    lines.push(format!("State: {} → {}", state_of("old_state"), state_of("new_state")));

    let friendly_name = event
        .data
        .get("new_state")
        .and_then(|s| s.get("attributes"))
        .and_then(|a| a.get("friendly_name"))
        .and_then(Value::as_str);
    if let Some(name) = friendly_name {
        lines.push(format!("Name: {}", name));
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
