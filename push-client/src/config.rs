use std::time::Duration;

use crate::frame::DEFAULT_MAX_FRAME_LEN;
use crate::inbound::Topic;

/// Settings for one [`PushClient`](crate::PushClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushConfig {
    /// Broker `host:port`.
    pub address: String,
    /// Value of the CONNECT `host` header; the address host when unset.
    pub virtual_host: Option<String>,
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: usize,
    /// Desired outgoing heart-beat interval; zero disables it.
    pub heartbeat_send: Duration,
    /// Desired incoming heart-beat interval; zero disables the read deadline.
    pub heartbeat_receive: Duration,
    pub notifications_topic: String,
    pub unread_count_topic: String,
    pub broadcast_topic: String,
    pub max_frame_len: usize,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:61613".to_string(),
            virtual_host: None,
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(3),
            max_reconnect_attempts: 5,
            heartbeat_send: Duration::from_secs(10),
            heartbeat_receive: Duration::from_secs(10),
            notifications_topic: "/user/queue/notifications".to_string(),
            unread_count_topic: "/user/queue/unread-count".to_string(),
            broadcast_topic: "/topic/notifications".to_string(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl PushConfig {
    pub fn destination(&self, topic: Topic) -> &str {
        match topic {
            Topic::Notifications => &self.notifications_topic,
            Topic::UnreadCount => &self.unread_count_topic,
            Topic::Broadcast => &self.broadcast_topic,
        }
    }

    pub(crate) fn host_header(&self) -> &str {
        match &self.virtual_host {
            Some(host) => host,
            None => self
                .address
                .rsplit_once(':')
                .map_or(self.address.as_str(), |(host, _)| host),
        }
    }
}
