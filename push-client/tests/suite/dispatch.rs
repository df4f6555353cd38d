use std::sync::Arc;
use std::sync::Mutex;

use beacon_push_client::ConnectionState;
use beacon_push_client::EventCategory;
use beacon_push_client::PushClient;
use beacon_push_client::PushEvent;
use beacon_push_client::PushMessage;
use beacon_push_client::Topic;
use pretty_assertions::assert_eq;
use push_test_support::MockBroker;
use push_test_support::wait_until;

use super::WAIT;
use super::config_for;
use super::wait_for_event;

type Seen = Arc<Mutex<Vec<String>>>;

fn record_into(seen: &Seen, label: &'static str) -> impl Fn(&PushMessage) + Send + Sync + 'static {
    let seen = Arc::clone(seen);
    move |message| {
        let detail = match message.notification() {
            Some(n) => n.id.clone().unwrap_or_default(),
            None => message.unread_count().unwrap_or_default().to_string(),
        };
        seen.lock().unwrap().push(format!("{label}:{detail}"));
    }
}

async fn connected_client(broker: &MockBroker) -> PushClient {
    let client = PushClient::new(config_for(broker.address()));
    client.connect("tok").await.unwrap();
    assert!(wait_until(WAIT, || broker.subscriptions().len() == 3).await);
    client
}

#[tokio::test]
async fn messages_reach_category_then_wildcard_listeners_in_order() {
    let broker = MockBroker::start().await;
    let client = connected_client(&broker).await;
    let seen: Seen = Arc::default();
    let registry = client.registry();
    let _all = registry.add_listener(EventCategory::All, record_into(&seen, "all"));
    let _comments =
        registry.add_listener(EventCategory::CommentAdded, record_into(&seen, "comment"));
    let _counts = registry.add_listener(EventCategory::UnreadCount, record_into(&seen, "count"));

    broker.send_message(
        Topic::Notifications.subscription_id(),
        r#"{"id":"n1","title":"T","content":"C","type":"COMMENT_ADDED"}"#,
    );
    broker.send_message(
        Topic::Broadcast.subscription_id(),
        r#"{"id":"n2","title":"Maintenance","content":"Tonight"}"#,
    );
    broker.send_message(Topic::UnreadCount.subscription_id(), r#"{"unreadCount":5}"#);

    assert!(wait_until(WAIT, || seen.lock().unwrap().len() == 5).await);
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["comment:n1", "all:n1", "all:n2", "count:5", "all:5"]
    );
}

#[tokio::test]
async fn removed_listener_stops_receiving() {
    let broker = MockBroker::start().await;
    let client = connected_client(&broker).await;
    let seen: Seen = Arc::default();
    let handle = client
        .registry()
        .add_listener(EventCategory::System, record_into(&seen, "system"));
    let _all = client
        .registry()
        .add_listener(EventCategory::All, record_into(&seen, "all"));

    broker.send_message("sub-notifications", r#"{"id":"a","title":"T","content":"C"}"#);
    assert!(wait_until(WAIT, || seen.lock().unwrap().len() == 2).await);

    assert!(client.registry().remove_listener(handle));
    broker.send_message("sub-notifications", r#"{"id":"b","title":"T","content":"C"}"#);
    assert!(wait_until(WAIT, || seen.lock().unwrap().len() == 3).await);

    assert_eq!(*seen.lock().unwrap(), vec!["system:a", "all:a", "all:b"]);
}

#[tokio::test]
async fn malformed_payload_is_dropped_without_losing_the_connection() {
    let broker = MockBroker::start().await;
    let client = connected_client(&broker).await;
    let mut events = client.subscribe_events();
    let seen: Seen = Arc::default();
    let _all = client
        .registry()
        .add_listener(EventCategory::All, record_into(&seen, "all"));
    let _boom = client
        .registry()
        .add_listener(EventCategory::System, |_| panic!("listener bug"));

    broker.send_message("sub-notifications", "{not json");
    broker.send_message("sub-unknown", r#"{"id":"x"}"#);
    broker.send_message("sub-notifications", r#"{"id":"ok","title":"T","content":"C"}"#);

    let rejected = wait_for_event(&mut events, |e| matches!(e, PushEvent::FrameRejected(_))).await;
    assert!(matches!(rejected, PushEvent::FrameRejected(ref reason) if reason.contains("JSON")));
    assert!(wait_until(WAIT, || seen.lock().unwrap().len() == 1).await);
    assert_eq!(*seen.lock().unwrap(), vec!["all:ok"]);
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn unknown_subscription_is_reported_as_rejected_frame() {
    let broker = MockBroker::start().await;
    let client = connected_client(&broker).await;
    let mut events = client.subscribe_events();
    let seen: Seen = Arc::default();
    let _all = client
        .registry()
        .add_listener(EventCategory::All, record_into(&seen, "all"));

    broker.send_message("sub-unknown", r#"{"id":"x"}"#);

    let rejected = wait_for_event(&mut events, |e| matches!(e, PushEvent::FrameRejected(_))).await;
    assert_eq!(
        rejected,
        PushEvent::FrameRejected("message for unknown subscription \"sub-unknown\"".to_string())
    );
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(client.state(), ConnectionState::Connected);
}
