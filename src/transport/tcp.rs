//! TCP stand-in transport
//!
//! Each service variant listens on its own socket address; peers are dialed
//! by `host:port`. The service UUID has no meaning on TCP and is only logged.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use super::{Link, Listener, Transport};
use crate::config::TransportConfig;
use crate::error::{LinkError, LinkResult};
use crate::protocol::{PeerAddress, PeerInfo, ServiceVariant, VariantKind};

/// Transport that carries links over plain TCP
pub struct TcpTransport {
    bindings: BTreeMap<VariantKind, SocketAddr>,
    bound: Arc<Mutex<BTreeMap<VariantKind, SocketAddr>>>,
}

impl TcpTransport {
    pub fn new(bindings: BTreeMap<VariantKind, SocketAddr>) -> Self {
        Self {
            bindings,
            bound: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.bindings())
    }

    /// Address the variant's endpoint is actually bound to, once listening
    pub fn bound_addr(&self, variant: VariantKind) -> Option<SocketAddr> {
        self.bound.lock().get(&variant).copied()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn listen(&self, service: &ServiceVariant) -> LinkResult<Box<dyn Listener>> {
        let addr = self
            .bindings
            .get(&service.kind)
            .copied()
            .ok_or(LinkError::UnknownVariant(service.kind))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| LinkError::EndpointCreationFailed {
                variant: service.kind,
                source,
            })?;
        let local_addr = listener.local_addr()?;

        info!(
            variant = %service.kind,
            service = %service.name,
            uuid = %service.uuid,
            "Listening on {}", local_addr
        );
        self.bound.lock().insert(service.kind, local_addr);

        Ok(Box::new(TcpLinkListener {
            listener: Some(listener),
            variant: service.kind,
            bound: Arc::clone(&self.bound),
        }))
    }

    async fn dial(&self, peer: &PeerAddress, service: &ServiceVariant) -> LinkResult<Link> {
        debug!(variant = %service.kind, uuid = %service.uuid, "Dialing {}", peer);

        let stream = TcpStream::connect(peer.as_str())
            .await
            .map_err(|source| LinkError::DialFailed {
                peer: peer.to_string(),
                source,
            })?;
        let _ = stream.set_nodelay(true);

        Ok(Link::new(stream, PeerInfo::new(peer.clone()), service.kind))
    }
}

struct TcpLinkListener {
    listener: Option<TcpListener>,
    variant: VariantKind,
    bound: Arc<Mutex<BTreeMap<VariantKind, SocketAddr>>>,
}

#[async_trait]
impl Listener for TcpLinkListener {
    async fn accept(&mut self) -> LinkResult<Link> {
        let variant = self.variant;
        let listener = self.listener.as_ref().ok_or_else(|| LinkError::AcceptFailed {
            variant,
            source: std::io::Error::new(std::io::ErrorKind::NotConnected, "endpoint closed"),
        })?;

        let (stream, addr) = listener
            .accept()
            .await
            .map_err(|source| LinkError::AcceptFailed { variant, source })?;
        let _ = stream.set_nodelay(true);

        debug!(variant = %variant, "Accepted inbound link from {}", addr);
        Ok(Link::new(stream, PeerInfo::new(addr.to_string()), variant))
    }

    async fn close(&mut self) -> LinkResult<()> {
        if self.listener.take().is_some() {
            self.bound.lock().remove(&self.variant);
            debug!(variant = %self.variant, "Closed TCP endpoint");
        }
        Ok(())
    }
}
