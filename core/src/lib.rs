//! Notification store, reconciliation and session lifecycle.
//!
//! [`NotificationStore`] is the single source of truth for a user's
//! notifications and unread count. [`NotificationSession`] connects it to the
//! REST API and the push transport for the lifetime of one login.

pub mod config_loader;
mod session;
mod status;
mod store;

pub use config_loader::BeaconConfig;
pub use config_loader::ConfigError;
pub use config_loader::ConfigLoader;
pub use config_loader::SessionSettings;
pub use session::Credentials;
pub use session::NotificationSession;
pub use session::SessionError;
pub use status::StatusLevel;
pub use status::StatusMessage;
pub use store::FetchOutcome;
pub use store::NotificationStore;
pub use store::PushOutcome;
pub use store::StoreAction;
pub use store::StoreError;
pub use store::StoreSummary;
