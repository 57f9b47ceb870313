//! Link Error Types

use thiserror::Error;

use crate::protocol::VariantKind;

/// Failures raised at the worker boundary.
///
/// None of these escape the [`ConnectionManager`](crate::ConnectionManager);
/// workers log them and turn them into `Notice` events plus a role change.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("failed to open {variant} endpoint: {source}")]
    EndpointCreationFailed {
        variant: VariantKind,
        #[source]
        source: std::io::Error,
    },

    #[error("accept failed on {variant} endpoint: {source}")]
    AcceptFailed {
        variant: VariantKind,
        #[source]
        source: std::io::Error,
    },

    #[error("dial to {peer} failed: {source}")]
    DialFailed {
        peer: String,
        #[source]
        source: std::io::Error,
    },

    #[error("dial to {peer} timed out after {timeout:?}")]
    DialTimedOut {
        peer: String,
        timeout: std::time::Duration,
    },

    #[error("write failed: {0}")]
    WriteFailed(#[source] std::io::Error),

    #[error("read failed: {0}")]
    ReadFailed(#[source] std::io::Error),

    #[error("connection lost: peer closed the stream")]
    ConnectionLost,

    #[error("link is not connected")]
    NotConnected,

    #[error("no service configured for variant {0}")]
    UnknownVariant(VariantKind),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for link-level operations
pub type LinkResult<T> = std::result::Result<T, LinkError>;
