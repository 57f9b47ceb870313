//! Tether Library
//!
//! Connection-lifecycle manager for a single duplex byte-stream link over a
//! socket-like transport. One role at a time (idle, listening, connecting,
//! connected), one listener per service variant, at most one dialer and at
//! most one data pump.

pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod protocol;
pub mod shutdown;
pub mod transport;

pub use config::Config;
pub use connection::ConnectionManager;
pub use error::{LinkError, LinkResult};
pub use event::{EventSink, LinkEvent};
pub use protocol::{PeerAddress, PeerInfo, Role, ServiceVariant, VariantKind};
pub use shutdown::ShutdownCoordinator;
pub use transport::{Link, Transport};

/// Common error type for configuration and the binary
pub type Result<T> = anyhow::Result<T>;
