mod connection;
mod dispatch;
mod reconnect;

use std::time::Duration;

use beacon_push_client::PushConfig;
use beacon_push_client::PushEvent;
use tokio::sync::broadcast;

pub(crate) const WAIT: Duration = Duration::from_secs(3);

pub(crate) fn config_for(address: String) -> PushConfig {
    PushConfig {
        address,
        connect_timeout: Duration::from_secs(2),
        reconnect_delay: Duration::from_millis(50),
        max_reconnect_attempts: 3,
        ..PushConfig::default()
    }
}

pub(crate) async fn next_event(events: &mut broadcast::Receiver<PushEvent>) -> PushEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for push event")
        .expect("event channel closed")
}

/// Skip events until one matches.
pub(crate) async fn wait_for_event(
    events: &mut broadcast::Receiver<PushEvent>,
    mut predicate: impl FnMut(&PushEvent) -> bool,
) -> PushEvent {
    loop {
        let event = next_event(events).await;
        if predicate(&event) {
            return event;
        }
    }
}
