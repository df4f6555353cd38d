use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use strum_macros::Display;
use strum_macros::EnumString;

use crate::wire;

/// Free-form key/value bag attached to a notification by the server.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// What a notification is about.
///
/// Parsing is lenient: case is ignored and `-` or spaces are accepted in
/// place of `_`. Unknown values fall back to [`NotificationCategory::System`]
/// so that one unexpected type never fails a whole page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum NotificationCategory {
    ProjectUpdated,
    CommentAdded,
    UserUpdate,
    Assignment,
    #[default]
    System,
}

impl NotificationCategory {
    pub const ALL: [NotificationCategory; 5] = [
        NotificationCategory::ProjectUpdated,
        NotificationCategory::CommentAdded,
        NotificationCategory::UserUpdate,
        NotificationCategory::Assignment,
        NotificationCategory::System,
    ];

    /// Parse a category as it appears in a `type`/`messageType` field.
    pub fn from_wire(raw: &str) -> Option<Self> {
        let normalized = raw.trim().replace(['-', ' '], "_");
        normalized.parse().ok()
    }
}

impl<'de> Deserialize<'de> for NotificationCategory {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw
            .as_deref()
            .and_then(NotificationCategory::from_wire)
            .unwrap_or_default())
    }
}

/// Urgency of a notification. Defaults to `MEDIUM`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    Serialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw
            .as_deref()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or_default())
    }
}

/// A notification as the server stores it.
///
/// The client never creates these on its own behalf; it only reads them and
/// flips `read` once the server has confirmed the change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    #[serde(deserialize_with = "wire::id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default)]
    pub category: NotificationCategory,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, deserialize_with = "wire::metadata")]
    pub metadata: Metadata,
    #[serde(default)]
    pub read: bool,
    #[serde(default = "Utc::now", deserialize_with = "wire::timestamp")]
    pub created_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn is_unread(&self) -> bool {
        !self.read
    }
}
