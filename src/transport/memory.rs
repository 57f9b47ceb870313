//! In-process transport
//!
//! Links are `tokio::io::duplex` pairs. The local half goes to the manager and
//! the remote half is handed to whoever plays the peer, which makes the whole
//! lifecycle drivable without sockets.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::{mpsc, Notify};
use tracing::debug;

use super::{Link, Listener, Transport};
use crate::error::{LinkError, LinkResult};
use crate::protocol::{PeerAddress, PeerInfo, ServiceVariant, VariantKind};

const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// What a dial to a given peer should do
#[derive(Debug, Clone)]
pub enum DialPlan {
    /// Succeed, optionally reporting a display name for the peer
    Connect { name: Option<String> },
    /// Fail immediately with the given error kind
    Fail(io::ErrorKind),
    /// Never complete; only cancellation ends the attempt
    Hang,
}

#[derive(Default)]
struct Registry {
    listeners: BTreeMap<VariantKind, mpsc::UnboundedSender<Link>>,
    failing_listen: BTreeSet<VariantKind>,
    listen_calls: BTreeMap<VariantKind, usize>,
    dial_plans: HashMap<PeerAddress, DialPlan>,
    remotes: HashMap<PeerAddress, VecDeque<DuplexStream>>,
    write_faults: HashMap<PeerAddress, Arc<AtomicBool>>,
    dial_calls: usize,
}

impl Registry {
    fn write_fault(&mut self, peer: &PeerAddress) -> Arc<AtomicBool> {
        Arc::clone(self.write_faults.entry(peer.clone()).or_default())
    }
}

/// Transport whose links live entirely inside the process
#[derive(Clone)]
pub struct MemoryTransport {
    registry: Arc<Mutex<Registry>>,
    remote_ready: Arc<Notify>,
    pipe_capacity: usize,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::with_pipe_capacity(DEFAULT_PIPE_CAPACITY)
    }

    pub fn with_pipe_capacity(pipe_capacity: usize) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            remote_ready: Arc::new(Notify::new()),
            pipe_capacity,
        }
    }

    /// Decide how dials to `peer` behave. Unplanned peers refuse the connection.
    pub fn plan_dial(&self, peer: impl Into<PeerAddress>, plan: DialPlan) {
        self.registry.lock().dial_plans.insert(peer.into(), plan);
    }

    /// Make `listen` fail for `variant` until cleared
    pub fn fail_listen(&self, variant: VariantKind, fail: bool) {
        let mut registry = self.registry.lock();
        if fail {
            registry.failing_listen.insert(variant);
        } else {
            registry.failing_listen.remove(&variant);
        }
    }

    /// Break the live endpoint for `variant`; its next accept reports an error
    pub fn break_endpoint(&self, variant: VariantKind) {
        self.registry.lock().listeners.remove(&variant);
    }

    /// Make writes on the local half of every link with `peer` fail with
    /// `BrokenPipe` while `broken` is set. Reads are unaffected.
    pub fn break_writes(&self, peer: impl Into<PeerAddress>, broken: bool) {
        let peer = peer.into();
        self.registry
            .lock()
            .write_fault(&peer)
            .store(broken, Ordering::SeqCst);
    }

    /// Whether an endpoint for `variant` is open and has an owner
    pub fn is_listening(&self, variant: VariantKind) -> bool {
        self.registry
            .lock()
            .listeners
            .get(&variant)
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    pub fn listen_calls(&self, variant: VariantKind) -> usize {
        self.registry
            .lock()
            .listen_calls
            .get(&variant)
            .copied()
            .unwrap_or(0)
    }

    pub fn dial_calls(&self) -> usize {
        self.registry.lock().dial_calls
    }

    /// Simulate an inbound connection on `variant`, returning the peer's half
    pub fn inject(&self, variant: VariantKind, peer: PeerInfo) -> io::Result<DuplexStream> {
        let (tx, write_fault) = {
            let mut registry = self.registry.lock();
            let tx = registry.listeners.get(&variant).cloned().ok_or_else(|| {
                io::Error::new(io::ErrorKind::ConnectionRefused, "no endpoint for variant")
            })?;
            (tx, registry.write_fault(&peer.address))
        };

        let (local, remote) = tokio::io::duplex(self.pipe_capacity);
        let local = MemoryStream {
            inner: local,
            write_fault,
        };
        tx.send(Link::new(local, peer, variant))
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "endpoint closed"))?;
        Ok(remote)
    }

    /// Take the peer's half of a completed dial, if one is waiting
    pub fn take_remote(&self, peer: &PeerAddress) -> Option<DuplexStream> {
        self.registry
            .lock()
            .remotes
            .get_mut(peer)
            .and_then(|queue| queue.pop_front())
    }

    /// Wait for the peer's half of the next completed dial to `peer`
    pub async fn next_remote(&self, peer: &PeerAddress) -> DuplexStream {
        loop {
            let ready = self.remote_ready.notified();
            if let Some(remote) = self.take_remote(peer) {
                return remote;
            }
            ready.await;
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn listen(&self, service: &ServiceVariant) -> LinkResult<Box<dyn Listener>> {
        let mut registry = self.registry.lock();
        *registry.listen_calls.entry(service.kind).or_insert(0) += 1;

        if registry.failing_listen.contains(&service.kind) {
            return Err(LinkError::EndpointCreationFailed {
                variant: service.kind,
                source: io::Error::new(io::ErrorKind::AddrInUse, "endpoint unavailable"),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        registry.listeners.insert(service.kind, tx);
        debug!(variant = %service.kind, "Opened in-memory endpoint");

        Ok(Box::new(MemoryListener {
            variant: service.kind,
            inbound: rx,
        }))
    }

    async fn dial(&self, peer: &PeerAddress, service: &ServiceVariant) -> LinkResult<Link> {
        let plan = {
            let mut registry = self.registry.lock();
            registry.dial_calls += 1;
            registry.dial_plans.get(peer).cloned()
        };

        match plan.unwrap_or(DialPlan::Fail(io::ErrorKind::ConnectionRefused)) {
            DialPlan::Connect { name } => {
                let (local, remote) = tokio::io::duplex(self.pipe_capacity);
                let write_fault = {
                    let mut registry = self.registry.lock();
                    registry
                        .remotes
                        .entry(peer.clone())
                        .or_default()
                        .push_back(remote);
                    registry.write_fault(peer)
                };
                self.remote_ready.notify_waiters();

                let local = MemoryStream {
                    inner: local,
                    write_fault,
                };

                let info = PeerInfo {
                    address: peer.clone(),
                    name,
                };
                Ok(Link::new(local, info, service.kind))
            }
            DialPlan::Fail(kind) => Err(LinkError::DialFailed {
                peer: peer.to_string(),
                source: io::Error::new(kind, "scripted dial failure"),
            }),
            DialPlan::Hang => std::future::pending().await,
        }
    }
}

struct MemoryListener {
    variant: VariantKind,
    inbound: mpsc::UnboundedReceiver<Link>,
}

#[async_trait]
impl Listener for MemoryListener {
    async fn accept(&mut self) -> LinkResult<Link> {
        self.inbound.recv().await.ok_or_else(|| LinkError::AcceptFailed {
            variant: self.variant,
            source: io::Error::new(io::ErrorKind::BrokenPipe, "endpoint torn down"),
        })
    }

    async fn close(&mut self) -> LinkResult<()> {
        self.inbound.close();
        Ok(())
    }
}

/// Local half of an in-memory link
struct MemoryStream {
    inner: DuplexStream,
    write_fault: Arc<AtomicBool>,
}

impl MemoryStream {
    fn check_writable(&self) -> io::Result<()> {
        if self.write_fault.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write side broken"));
        }
        Ok(())
    }
}

impl AsyncRead for MemoryStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for MemoryStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if let Err(e) = self.check_writable() {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
