//! Wire and domain types shared by the notification pipeline.
//!
//! Everything the REST client, the push client and the store exchange lives
//! here so that the three sides agree on one shape for a notification.

pub mod notification;
pub mod page;
pub mod push;
mod wire;

pub use notification::Metadata;
pub use notification::NotificationCategory;
pub use notification::NotificationRecord;
pub use notification::Priority;
pub use page::Page;
pub use page::PageInfo;
pub use push::ConnectionState;
pub use push::InvalidPush;
pub use push::PushNotification;
pub use push::parse_unread_count;
pub use wire::parse_timestamp;
