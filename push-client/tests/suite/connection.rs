use beacon_push_client::ConnectionState;
use beacon_push_client::PushClient;
use beacon_push_client::PushConfig;
use beacon_push_client::PushError;
use beacon_push_client::PushEvent;
use beacon_push_client::frame::Command;
use pretty_assertions::assert_eq;
use push_test_support::MockBroker;
use push_test_support::REJECTED_TOKEN;
use push_test_support::wait_until;

use super::WAIT;
use super::config_for;
use super::next_event;

#[tokio::test]
async fn concurrent_connects_open_one_connection() {
    let broker = MockBroker::start().await;
    let client = PushClient::new(config_for(broker.address()));

    let (first, second) = tokio::join!(client.connect("tok"), client.connect("tok"));
    first.unwrap();
    second.unwrap();
    client.connect("tok").await.unwrap();

    assert_eq!(client.state(), ConnectionState::Connected);
    assert!(wait_until(WAIT, || broker.subscriptions().len() == 3).await);
    assert_eq!(broker.connection_count(), 1);
}

#[tokio::test]
async fn handshake_authenticates_and_subscribes_to_three_topics() {
    let broker = MockBroker::start().await;
    let client = PushClient::new(config_for(broker.address()));

    client.connect("tok-123").await.unwrap();
    assert!(wait_until(WAIT, || broker.subscriptions().len() == 3).await);

    let connect = &broker.connect_frames()[0];
    assert_eq!(connect.command, Command::Connect);
    assert_eq!(connect.get("accept-version"), Some("1.2"));
    assert_eq!(connect.get("host"), Some("127.0.0.1"));
    assert_eq!(connect.get("Authorization"), Some("Bearer tok-123"));

    let defaults = PushConfig::default();
    assert_eq!(
        broker.subscriptions(),
        vec![
            (
                "sub-notifications".to_string(),
                defaults.notifications_topic.clone()
            ),
            (
                "sub-unread-count".to_string(),
                defaults.unread_count_topic.clone()
            ),
            ("sub-broadcast".to_string(), defaults.broadcast_topic.clone()),
        ]
    );
    for subscribe in broker.received(Command::Subscribe) {
        assert_eq!(subscribe.get("ack"), Some("auto"));
    }
}

#[tokio::test]
async fn state_moves_through_connecting_to_connected() {
    let broker = MockBroker::start().await;
    let client = PushClient::new(config_for(broker.address()));
    let mut state = client.state_receiver();
    let mut events = client.subscribe_events();
    assert_eq!(*state.borrow_and_update(), ConnectionState::Disconnected);

    client.connect("tok").await.unwrap();

    assert!(state.has_changed().unwrap());
    assert_eq!(*state.borrow_and_update(), ConnectionState::Connected);
    assert_eq!(next_event(&mut events).await, PushEvent::Connected);
}

#[tokio::test]
async fn disconnect_closes_connection_and_is_repeatable() {
    let broker = MockBroker::start().await;
    let client = PushClient::new(config_for(broker.address()));
    let mut events = client.subscribe_events();

    client.connect("tok").await.unwrap();
    client.disconnect().await;
    client.disconnect().await;

    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(wait_until(WAIT, || broker.received(Command::Disconnect).len() == 1).await);
    assert_eq!(next_event(&mut events).await, PushEvent::Connected);
    assert_eq!(next_event(&mut events).await, PushEvent::Disconnected);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn disconnect_when_never_connected_is_a_no_op() {
    let client = PushClient::new(PushConfig::default());
    let mut events = client.subscribe_events();

    client.disconnect().await;

    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn rejected_token_reports_error_and_schedules_retry() {
    let broker = MockBroker::start().await;
    let client = PushClient::new(config_for(broker.address()));
    let mut events = client.subscribe_events();

    let err = client.connect(REJECTED_TOKEN).await.unwrap_err();

    assert!(matches!(err, PushError::Rejected(ref msg) if msg == "invalid token"), "{err}");
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(matches!(
        next_event(&mut events).await,
        PushEvent::ConnectionError(_)
    ));
    assert!(matches!(
        next_event(&mut events).await,
        PushEvent::Reconnecting {
            attempt: 1,
            max_attempts: 3,
            ..
        }
    ));
    client.disconnect().await;
}
