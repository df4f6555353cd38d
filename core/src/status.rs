//! Transient, user-facing status messages.

use beacon_push_client::PushEvent;
use serde::Serialize;
use strum_macros::Display;

use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StatusLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusMessage {
    pub level: StatusLevel,
    pub text: String,
}

impl StatusMessage {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            level: StatusLevel::Info,
            text: text.into(),
        }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self {
            level: StatusLevel::Warning,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: StatusLevel::Error,
            text: text.into(),
        }
    }

    /// Rejected frames are diagnostics only and map to `None`.
    pub fn from_push_event(event: &PushEvent) -> Option<Self> {
        let message = match event {
            PushEvent::Connected => Self::info("Connected to real-time notifications"),
            PushEvent::Disconnected => Self::info("Disconnected from real-time notifications"),
            PushEvent::ConnectionError(reason) => {
                Self::warning(format!("Notification connection error: {reason}"))
            }
            PushEvent::Reconnecting {
                attempt,
                max_attempts,
                delay,
            } => Self::info(format!(
                "Reconnecting in {:.1}s (attempt {attempt}/{max_attempts})",
                delay.as_secs_f64()
            )),
            PushEvent::ReconnectExhausted { .. } => Self::error(
                "Could not reach the notification service. Refresh to try again.",
            ),
            PushEvent::FrameRejected(_) => return None,
        };
        Some(message)
    }

    /// Scoped to the action that failed, e.g. "Failed to mark as read".
    pub fn from_store_error(err: &StoreError) -> Self {
        Self::error(format!("Failed to {}", err.action))
    }
}

impl std::fmt::Display for StatusMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.level, self.text)
    }
}
