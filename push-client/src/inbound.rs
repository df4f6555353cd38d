//! Decoding of MESSAGE bodies into typed push messages.

use beacon_protocol::NotificationCategory;
use beacon_protocol::PushNotification;
use beacon_protocol::parse_unread_count;
use serde_json::Value;
use strum_macros::Display;

/// Subscribed destinations. Each maps to a fixed STOMP subscription id so a
/// MESSAGE frame can be routed back without string matching on destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Topic {
    Notifications,
    UnreadCount,
    Broadcast,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::Notifications, Topic::UnreadCount, Topic::Broadcast];

    pub fn subscription_id(self) -> &'static str {
        match self {
            Topic::Notifications => "sub-notifications",
            Topic::UnreadCount => "sub-unread-count",
            Topic::Broadcast => "sub-broadcast",
        }
    }

    pub fn from_subscription_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.subscription_id() == id)
    }
}

/// Listener key. `All` receives every message regardless of its category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EventCategory {
    ProjectUpdated,
    CommentAdded,
    UserUpdate,
    Assignment,
    System,
    UnreadCount,
    All,
}

impl From<NotificationCategory> for EventCategory {
    fn from(category: NotificationCategory) -> Self {
        match category {
            NotificationCategory::ProjectUpdated => EventCategory::ProjectUpdated,
            NotificationCategory::CommentAdded => EventCategory::CommentAdded,
            NotificationCategory::UserUpdate => EventCategory::UserUpdate,
            NotificationCategory::Assignment => EventCategory::Assignment,
            NotificationCategory::System => EventCategory::System,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushPayload {
    Notification(PushNotification),
    UnreadCount(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    pub topic: Topic,
    pub category: EventCategory,
    pub payload: PushPayload,
}

impl PushMessage {
    pub fn notification(&self) -> Option<&PushNotification> {
        match &self.payload {
            PushPayload::Notification(notification) => Some(notification),
            PushPayload::UnreadCount(_) => None,
        }
    }

    pub fn unread_count(&self) -> Option<u64> {
        match self.payload {
            PushPayload::UnreadCount(count) => Some(count),
            PushPayload::Notification(_) => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InboundError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("unread count payload not understood: {0}")]
    BadCount(String),

    #[error("message for unknown subscription {0:?}")]
    UnknownSubscription(String),
}

/// Parse a MESSAGE body received on `topic`.
///
/// Field-level validation of notifications is left to the consumer; this
/// only rejects bodies that cannot be read at all.
pub fn decode_message(topic: Topic, body: &[u8]) -> Result<PushMessage, InboundError> {
    let value: Value = serde_json::from_slice(body)?;
    match topic {
        Topic::UnreadCount => {
            let count =
                parse_unread_count(&value).ok_or_else(|| InboundError::BadCount(value.to_string()))?;
            Ok(PushMessage {
                topic,
                category: EventCategory::UnreadCount,
                payload: PushPayload::UnreadCount(count),
            })
        }
        Topic::Notifications | Topic::Broadcast => {
            if !value.is_object() {
                return Err(InboundError::NotAnObject);
            }
            let notification: PushNotification = serde_json::from_value(value)?;
            Ok(PushMessage {
                topic,
                category: notification.category().into(),
                payload: PushPayload::Notification(notification),
            })
        }
    }
}
