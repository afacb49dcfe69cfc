//! Handshake, subscriptions and event dispatch

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use tests::async_helpers::{wait_until, DEFAULT_TIMEOUT};
use tests::events::wait_for_event;
use tests::hub::HUB_TOKEN;
use tests::{DomainEvent, FakeHub, HubEvent};

use hassbridge_core::EventBus;
use hassbridge_hub::{HubClient, HubError};

#[tokio::test]
async fn test_connect_authenticates_and_reports() {
    let hub = FakeHub::start().await;
    let bus = EventBus::new();
    let mut rx = bus.subscribe();
    let client = HubClient::with_url(hub.ws_url(), HUB_TOKEN).with_events(bus.sender());

    client.connect().await.unwrap();
    assert!(client.is_connected());
    assert!(wait_until(DEFAULT_TIMEOUT, || hub.connections() == 1).await);

    let connected = wait_for_event(&mut rx, DEFAULT_TIMEOUT, |e| {
        matches!(e, DomainEvent::HubConnected { .. })
    })
    .await;
    assert_eq!(connected, Some(DomainEvent::HubConnected { url: hub.ws_url() }));

    // connecting again is a no-op
    client.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hub.connections(), 1);

    client.disconnect().await;
}

#[tokio::test]
async fn test_rejected_token_is_terminal() {
    let hub = FakeHub::start().await;
    let bus = EventBus::new();
    let mut rx = bus.subscribe();
    let client = HubClient::with_url(hub.ws_url(), "wrong-token").with_events(bus.sender());

    let failures = Arc::new(AtomicUsize::new(0));
    let counter = failures.clone();
    client.on_auth_failed(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, HubError::AuthInvalid(ref m) if m.contains("Invalid access token")));
    assert!(!client.is_connected());
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert_eq!(hub.connections(), 0);

    let event = wait_for_event(&mut rx, DEFAULT_TIMEOUT, |e| {
        matches!(e, DomainEvent::HubAuthFailed { .. })
    })
    .await;
    assert!(event.is_some());
}

#[tokio::test]
async fn test_subscribe_frames_carry_event_type_and_unique_ids() {
    let hub = FakeHub::start().await;
    let client = HubClient::with_url(hub.ws_url(), HUB_TOKEN);
    client.connect().await.unwrap();

    let first = client.subscribe_events("automation_triggered");
    let second = client.subscribe_events("state_changed");
    assert!(second > first);

    assert!(wait_until(DEFAULT_TIMEOUT, || hub.subscriptions_on(1).len() == 2).await);
    assert_eq!(
        hub.subscriptions_on(1),
        vec!["automation_triggered".to_string(), "state_changed".to_string()]
    );

    let ids: Vec<u64> = hub
        .frames()
        .iter()
        .filter(|f| f.frame["type"] == "subscribe_events")
        .filter_map(|f| f.frame["id"].as_u64())
        .collect();
    assert_eq!(ids, vec![first, second]);

    client.unsubscribe_events(first);
    assert!(
        wait_until(DEFAULT_TIMEOUT, || {
            hub.frames().iter().any(|f| {
                f.frame["type"] == "unsubscribe_events" && f.frame["subscription"] == json!(first)
            })
        })
        .await
    );
    assert_eq!(
        client.subscribed_types(),
        BTreeSet::from(["state_changed".to_string()])
    );

    client.disconnect().await;
}

#[tokio::test]
async fn test_pushed_events_reach_every_observer() {
    let hub = FakeHub::start().await;
    let client = HubClient::with_url(hub.ws_url(), HUB_TOKEN);

    let received: Arc<Mutex<Vec<HubEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    client.on_event(move |event| sink.lock().push(event.clone()));
    client.on_event(|_| panic!("observer failure"));

    client.connect().await.unwrap();
    assert!(wait_until(DEFAULT_TIMEOUT, || hub.connections() == 1).await);

    hub.push_event(
        "automation_triggered",
        json!({ "entity_id": "automation.night_lights", "name": "Night lights" }),
    );
    hub.push_raw(json!({ "type": "no_such_frame" }));
    hub.push_event("state_changed", json!({ "entity_id": "light.porch" }));

    assert!(wait_until(DEFAULT_TIMEOUT, || received.lock().len() == 2).await);
    let events = received.lock().clone();
    assert_eq!(events[0].event_type, "automation_triggered");
    assert_eq!(events[0].entity_id(), Some("automation.night_lights"));
    assert_eq!(events[0].origin.as_deref(), Some("LOCAL"));
    assert_eq!(events[1].event_type, "state_changed");
    assert!(client.is_connected());

    client.disconnect().await;
}
