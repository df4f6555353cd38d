use std::time::Duration;

use beacon_push_client::ConnectionState;
use beacon_push_client::PushClient;
use beacon_push_client::PushConfig;
use beacon_push_client::PushError;
use beacon_push_client::PushEvent;
use pretty_assertions::assert_eq;
use push_test_support::MockBroker;
use push_test_support::refused_address;
use push_test_support::wait_until;

use super::WAIT;
use super::config_for;
use super::next_event;
use super::wait_for_event;

#[tokio::test]
async fn dropped_connection_reconnects_and_resets_attempts() {
    let broker = MockBroker::start().await;
    let client = PushClient::new(config_for(broker.address()));
    let mut events = client.subscribe_events();
    client.connect("tok").await.unwrap();
    assert_eq!(next_event(&mut events).await, PushEvent::Connected);

    broker.drop_connections();

    assert!(matches!(
        next_event(&mut events).await,
        PushEvent::ConnectionError(_)
    ));
    assert!(matches!(
        next_event(&mut events).await,
        PushEvent::Reconnecting { attempt: 1, .. }
    ));
    assert_eq!(next_event(&mut events).await, PushEvent::Connected);
    assert_eq!(client.state(), ConnectionState::Connected);
    assert_eq!(client.reconnect_attempts(), 0);
    assert_eq!(broker.connection_count(), 2);
    assert!(wait_until(WAIT, || broker.subscriptions().len() == 6).await);
}

#[tokio::test]
async fn retries_stop_after_the_attempt_cap() {
    let client = PushClient::new(PushConfig {
        max_reconnect_attempts: 2,
        reconnect_delay: Duration::from_millis(20),
        ..config_for(refused_address().await)
    });
    let mut events = client.subscribe_events();

    let err = client.connect("tok").await.unwrap_err();
    assert!(matches!(err, PushError::Connect { .. }), "{err}");

    let exhausted = wait_for_event(&mut events, |e| {
        matches!(e, PushEvent::ReconnectExhausted { .. })
    })
    .await;
    assert_eq!(exhausted, PushEvent::ReconnectExhausted { attempts: 2 });
    assert!(client.is_exhausted());
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // The health check does not restart an exhausted client.
    client.ensure_connected("tok").await.unwrap();
    assert!(client.is_exhausted());
    assert_eq!(client.reconnect_attempts(), 2);

    // An explicit connect starts a fresh budget.
    assert!(client.connect("tok").await.is_err());
    assert!(!client.is_exhausted());
    assert_eq!(client.reconnect_attempts(), 1);
    client.disconnect().await;
}

#[tokio::test]
async fn zero_attempt_budget_gives_up_immediately() {
    let client = PushClient::new(PushConfig {
        max_reconnect_attempts: 0,
        ..config_for(refused_address().await)
    });
    let mut events = client.subscribe_events();

    assert!(client.connect("tok").await.is_err());

    assert!(matches!(
        next_event(&mut events).await,
        PushEvent::ConnectionError(_)
    ));
    assert_eq!(
        next_event(&mut events).await,
        PushEvent::ReconnectExhausted { attempts: 0 }
    );
}

#[tokio::test]
async fn disconnect_cancels_pending_reconnect() {
    let client = PushClient::new(PushConfig {
        reconnect_delay: Duration::from_millis(150),
        ..config_for(refused_address().await)
    });
    let mut events = client.subscribe_events();

    assert!(client.connect("tok").await.is_err());
    assert_eq!(client.reconnect_attempts(), 1);
    client.disconnect().await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    let errors = seen
        .iter()
        .filter(|e| matches!(e, PushEvent::ConnectionError(_)))
        .count();
    assert_eq!(errors, 1, "{seen:?}");
    assert_eq!(client.reconnect_attempts(), 0);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn ensure_connected_restores_a_healthy_connection() {
    let broker = MockBroker::start().await;
    let client = PushClient::new(config_for(broker.address()));

    client.ensure_connected("tok").await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);

    client.ensure_connected("tok").await.unwrap();
    assert_eq!(broker.connection_count(), 1);
}
