//! Transport Capability
//!
//! The manager never builds sockets itself. It asks a [`Transport`] for a
//! passive endpoint per service variant and for outbound links, and treats
//! whatever comes back as an opaque duplex byte stream.

pub mod memory;
pub mod tcp;

pub use memory::{DialPlan, MemoryTransport};
pub use tcp::TcpTransport;

use std::fmt;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::LinkResult;
use crate::protocol::{PeerAddress, PeerInfo, ServiceVariant, VariantKind};

/// Combined trait for async read + write
pub trait AsyncReadWrite: AsyncRead + AsyncWrite {}

impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}

/// Type-erased duplex stream handed between workers
pub type Stream = Box<dyn AsyncReadWrite + Unpin + Send>;

/// An established link: the stream plus who is on the other end and which
/// service variant produced it.
pub struct Link {
    pub stream: Stream,
    pub peer: PeerInfo,
    pub variant: VariantKind,
}

impl Link {
    pub fn new<S>(stream: S, peer: PeerInfo, variant: VariantKind) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            stream: Box::new(stream),
            peer,
            variant,
        }
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("peer", &self.peer)
            .field("variant", &self.variant)
            .finish_non_exhaustive()
    }
}

/// Factory for passive endpoints and outbound links
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the passive endpoint advertised for `service`
    async fn listen(&self, service: &ServiceVariant) -> LinkResult<Box<dyn Listener>>;

    /// Open a link to `peer` using `service`
    ///
    /// The returned future may be dropped at any point to abandon the attempt.
    async fn dial(&self, peer: &PeerAddress, service: &ServiceVariant) -> LinkResult<Link>;
}

/// Passive endpoint accepting inbound links
#[async_trait]
pub trait Listener: Send {
    /// Wait for the next inbound link. Must be cancel safe.
    async fn accept(&mut self) -> LinkResult<Link>;

    /// Release the endpoint
    async fn close(&mut self) -> LinkResult<()> {
        Ok(())
    }
}
