//! Keeping hub subscriptions in line with the enabled rules

use std::sync::Arc;

use tracing::info;

use hassbridge_core::RuleSource;
use hassbridge_hub::HubClient;

use crate::pipeline::EventPipeline;

/// Make `rules` the hub client's source of event types to resubscribe
/// after a reconnect
pub fn attach_rule_source(hub: &HubClient, rules: Arc<dyn RuleSource>) {
    hub.set_event_type_source(move || rules.active_event_types());
}

/// Subscribe every event type used by an enabled rule that the hub client
/// is not subscribed to yet. Returns the newly subscribed types.
pub fn sync_subscriptions(hub: &HubClient, rules: &dyn RuleSource) -> Vec<String> {
    let active = rules.active_event_types();
    let added = hub.sync_event_types(&active);
    info!(
        active = active.len(),
        added = added.len(),
        "[Pipeline] Subscriptions synced"
    );
    added
}

/// Feed every hub event into `pipeline`
pub fn route_events(hub: &HubClient, pipeline: EventPipeline) {
    hub.on_event(move |event| {
        pipeline.handle_event(event);
    });
}
