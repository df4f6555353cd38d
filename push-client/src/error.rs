use std::time::Duration;

use crate::frame::FrameError;

/// Errors from establishing or running a push connection.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("push broker did not answer within {0:?}")]
    Timeout(Duration),

    /// The broker answered CONNECT with an ERROR frame.
    #[error("push broker rejected the connection: {0}")]
    Rejected(String),

    #[error("push protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("push connection closed by broker")]
    Closed,

    /// `disconnect()` ran while the handshake was in flight.
    #[error("connect aborted by disconnect")]
    Aborted,
}
