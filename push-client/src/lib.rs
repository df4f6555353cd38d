//! Push side of the notification pipeline.
//!
//! [`PushClient`] keeps at most one STOMP connection to the broker, subscribes
//! to the per-user and broadcast topics, and hands every decoded message to a
//! [`ListenerRegistry`]. Connection problems are retried a bounded number of
//! times with a fixed delay and reported as [`PushEvent`]s.

mod client;
mod config;
mod connection;
mod error;
pub mod frame;
mod inbound;
mod registry;

pub use client::PushClient;
pub use client::PushEvent;
pub use config::PushConfig;
pub use connection::Heartbeat;
pub use connection::negotiate_heartbeat;
pub use error::PushError;
pub use inbound::EventCategory;
pub use inbound::InboundError;
pub use inbound::PushMessage;
pub use inbound::PushPayload;
pub use inbound::Topic;
pub use inbound::decode_message;
pub use registry::DispatchReport;
pub use registry::ListenerHandle;
pub use registry::ListenerRegistry;

pub use beacon_protocol::ConnectionState;
