use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use strum_macros::Display;

use crate::notification::NotificationCategory;
use crate::notification::NotificationRecord;
use crate::notification::Priority;
use crate::wire;

/// Connection lifecycle of the push transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Why a pushed notification was not accepted into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidPush {
    #[error("push is missing an id")]
    MissingId,
    #[error("push is missing a title")]
    MissingTitle,
    #[error("push is missing content")]
    MissingContent,
}

/// A notification as delivered over the push transport.
///
/// Only `id`, `title` and `content` are required; everything else has a
/// default applied in [`PushNotification::into_record`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushNotification {
    #[serde(default, deserialize_with = "wire::opt_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub read: Option<bool>,
    #[serde(default, deserialize_with = "wire::opt_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

impl PushNotification {
    /// Category from the explicit `type` field, then `messageType`.
    pub fn category(&self) -> NotificationCategory {
        self.kind
            .as_deref()
            .or(self.message_type.as_deref())
            .and_then(NotificationCategory::from_wire)
            .unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), InvalidPush> {
        if is_blank(self.id.as_deref()) {
            return Err(InvalidPush::MissingId);
        }
        if is_blank(self.title.as_deref()) {
            return Err(InvalidPush::MissingTitle);
        }
        if is_blank(self.content.as_deref()) {
            return Err(InvalidPush::MissingContent);
        }
        Ok(())
    }

    /// Build a store record, filling in defaults for everything optional.
    pub fn into_record(self, now: DateTime<Utc>) -> Result<NotificationRecord, InvalidPush> {
        self.validate()?;
        let category = self.category();
        Ok(NotificationRecord {
            id: self.id.unwrap_or_default(),
            title: self.title.unwrap_or_default(),
            content: self.content.unwrap_or_default(),
            category,
            priority: self.priority.unwrap_or_default(),
            metadata: self
                .metadata
                .map(wire::metadata_from_value)
                .unwrap_or_default(),
            read: self.read.unwrap_or(false),
            created_at: self.created_at.unwrap_or(now),
        })
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|s| s.trim().is_empty())
}

/// Extract an unread count from the shapes the backend uses: a bare number,
/// `{"count": n}` or `{"unreadCount": n}`.
pub fn parse_unread_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Object(map) => map
            .get("unreadCount")
            .or_else(|| map.get("count"))
            .and_then(parse_unread_count),
        _ => None,
    }
}
