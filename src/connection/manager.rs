//! Connection Manager Implementation
//!
//! The manager is the only writer of the role and of the worker slots. Every
//! transition runs under one lock, and events for a transition are emitted
//! before that lock is released, so consumers see them in transition order.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::dialer::Dialer;
use super::listener::ListenerWorker;
use super::pump::{DataPump, PumpSettings};
use super::session::SessionSnapshot;
use super::worker::WorkerId;
use crate::config::Config;
use crate::error::{LinkError, LinkResult};
use crate::event::{EventSink, LinkEvent};
use crate::protocol::{PeerAddress, Role, VariantKind};
use crate::transport::{Link, Transport};
use crate::Result;

/// Which worker a handoff or failure report comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A link produced outside the manager's own workers
    External,
    Listener(WorkerId),
    Dialer(WorkerId),
    Pump(WorkerId),
}

/// Lifetime totals kept alongside the role
#[derive(Debug, Default)]
struct Counters {
    sessions_established: AtomicU64,
    dial_failures: AtomicU64,
    connections_lost: AtomicU64,
    links_rejected: AtomicU64,
}

/// Serializable snapshot of the manager
#[derive(Debug, Clone, Serialize)]
pub struct LinkStats {
    pub role: Role,
    pub session: Option<SessionSnapshot>,
    pub sessions_established: u64,
    pub dial_failures: u64,
    pub connections_lost: u64,
    pub links_rejected: u64,
}

/// Workers currently held in the manager's slots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCensus {
    pub listeners: Vec<VariantKind>,
    pub dialer: Option<PeerAddress>,
    pub pump: bool,
}

struct LinkState {
    role: Role,
    listeners: BTreeMap<VariantKind, ListenerWorker>,
    dialer: Option<Dialer>,
    pump: Option<DataPump>,
    /// Cancelled listeners, kept so their successor can wait for the endpoint
    retired_listeners: BTreeMap<VariantKind, JoinHandle<()>>,
    retired: Vec<JoinHandle<()>>,
}

impl LinkState {
    fn new() -> Self {
        Self {
            role: Role::Idle,
            listeners: BTreeMap::new(),
            dialer: None,
            pump: None,
            retired_listeners: BTreeMap::new(),
            retired: Vec::new(),
        }
    }

    fn prune_retired(&mut self) {
        self.retired.retain(|task| !task.is_finished());
        self.retired_listeners.retain(|_, task| !task.is_finished());
    }

    fn cancel_dialer(&mut self) {
        if let Some(dialer) = self.dialer.take() {
            self.retired.push(dialer.cancel());
        }
    }

    fn cancel_pump(&mut self) {
        if let Some(pump) = self.pump.take() {
            self.retired.push(pump.cancel());
        }
    }

    fn retire_listener(&mut self, listener: ListenerWorker) {
        let variant = listener.variant();
        let task = listener.cancel();
        if let Some(older) = self.retired_listeners.insert(variant, task) {
            self.retired.push(older);
        }
    }

    fn cancel_listeners(&mut self) {
        let listeners = std::mem::take(&mut self.listeners);
        for (_, listener) in listeners {
            self.retire_listener(listener);
        }
    }
}

struct Shared {
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    events: Arc<dyn EventSink>,
    state: Mutex<LinkState>,
    next_worker_id: AtomicU64,
    counters: Counters,
}

/// Owns the link's role and the listener, dialer and data pump workers.
///
/// Cloning yields another handle on the same manager. All lifecycle methods
/// must be called from within a tokio runtime.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

/// Weak handle given to workers so they never keep the manager alive
#[derive(Clone)]
pub struct ManagerHandle(Weak<Shared>);

impl ManagerHandle {
    pub fn on_connected(&self, origin: Origin, link: Link) -> bool {
        match self.0.upgrade() {
            Some(shared) => ConnectionManager { shared }.complete(origin, link),
            None => false,
        }
    }

    pub fn report_failure(&self, origin: Origin, message: &str) {
        if let Some(shared) = self.0.upgrade() {
            ConnectionManager { shared }.report_failure(origin, message);
        }
    }
}

impl ConnectionManager {
    /// Create an idle manager. No worker runs until [`start`](Self::start).
    pub fn new(
        config: Arc<Config>,
        transport: Arc<dyn Transport>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                transport,
                events,
                state: Mutex::new(LinkState::new()),
                next_worker_id: AtomicU64::new(1),
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.shared.config
    }

    pub fn role(&self) -> Role {
        self.shared.state.lock().role
    }

    /// Enter Listening: drop any dial or live link and make sure every
    /// configured variant has a running listener.
    pub fn start(&self) {
        let mut state = self.shared.state.lock();
        info!("Starting link manager");
        self.start_locked(&mut state);
    }

    /// Dial `peer` using the service configured for `variant`.
    ///
    /// Listeners keep running, so an inbound link may still win the race.
    pub fn connect(&self, peer: impl Into<PeerAddress>, variant: VariantKind) -> LinkResult<()> {
        let peer = peer.into();
        let service = self
            .shared
            .config
            .service(variant)
            .cloned()
            .ok_or(LinkError::UnknownVariant(variant))?;

        let mut state = self.shared.state.lock();
        info!(peer = %peer, variant = %variant, "Connecting");

        state.prune_retired();
        state.cancel_dialer();
        state.cancel_pump();

        let dialer = Dialer::spawn(
            self.next_worker_id(),
            peer,
            service,
            Arc::clone(&self.shared.transport),
            self.shared.config.link.dial_timeout,
            self.handle(),
        );
        state.dialer = Some(dialer);
        self.transition(&mut state, Role::Connecting);
        Ok(())
    }

    /// Install `link` as the live connection.
    ///
    /// Only the first caller while Listening or Connecting wins; any other
    /// link is closed without further effect. Returns whether `link` was
    /// installed.
    pub fn on_connected(&self, link: Link) -> bool {
        self.complete(Origin::External, link)
    }

    /// Cancel every worker and go Idle
    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        info!("Stopping link manager");

        state.prune_retired();
        state.cancel_dialer();
        state.cancel_pump();
        state.cancel_listeners();
        self.transition(&mut state, Role::Idle);
    }

    /// Write `bytes` to the live link.
    ///
    /// Silently dropped unless Connected. The transition lock is released
    /// before the write starts. Returns whether the bytes were written.
    pub async fn send(&self, bytes: impl Into<Bytes>) -> bool {
        let writer = {
            let state = self.shared.state.lock();
            if state.role != Role::Connected {
                return false;
            }
            state.pump.as_ref().map(|pump| pump.writer())
        };

        match writer {
            Some(writer) => writer.write(bytes.into()).await.is_ok(),
            None => false,
        }
    }

    /// Stop, then wait up to `timeout` for every cancelled worker to exit
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        self.stop();

        let tasks: Vec<JoinHandle<()>> = {
            let mut state = self.shared.state.lock();
            let mut tasks = std::mem::take(&mut state.retired);
            tasks.extend(std::mem::take(&mut state.retired_listeners).into_values());
            tasks
        };

        info!("Waiting for {} workers to exit (timeout: {:?})", tasks.len(), timeout);
        let drained = tokio::time::timeout(timeout, async move {
            for task in tasks {
                let _ = task.await;
            }
        })
        .await;

        match drained {
            Ok(()) => info!("All link workers exited"),
            Err(_) => warn!("Shutdown timeout reached after {:?} with workers still running", timeout),
        }
        Ok(())
    }

    pub fn stats(&self) -> LinkStats {
        let state = self.shared.state.lock();
        let counters = &self.shared.counters;

        LinkStats {
            role: state.role,
            session: state.pump.as_ref().map(|pump| pump.session().snapshot()),
            sessions_established: counters.sessions_established.load(Ordering::Relaxed),
            dial_failures: counters.dial_failures.load(Ordering::Relaxed),
            connections_lost: counters.connections_lost.load(Ordering::Relaxed),
            links_rejected: counters.links_rejected.load(Ordering::Relaxed),
        }
    }

    pub fn workers(&self) -> WorkerCensus {
        let state = self.shared.state.lock();
        WorkerCensus {
            listeners: state
                .listeners
                .iter()
                .filter(|(_, listener)| !listener.is_finished())
                .map(|(variant, _)| *variant)
                .collect(),
            dialer: state.dialer.as_ref().map(|dialer| dialer.peer().clone()),
            pump: state.pump.is_some(),
        }
    }

    fn handle(&self) -> ManagerHandle {
        ManagerHandle(Arc::downgrade(&self.shared))
    }

    fn next_worker_id(&self) -> WorkerId {
        self.shared.next_worker_id.fetch_add(1, Ordering::Relaxed)
    }

    fn transition(&self, state: &mut LinkState, role: Role) {
        debug!("Role {} -> {}", state.role, role);
        state.role = role;
        self.shared.events.emit(LinkEvent::RoleChanged(role));
    }

    fn start_locked(&self, state: &mut LinkState) {
        state.prune_retired();
        state.cancel_dialer();
        state.cancel_pump();
        self.transition(state, Role::Listening);

        for service in &self.shared.config.services {
            let predecessor = match state.listeners.remove(&service.kind) {
                Some(listener) if !listener.is_finished() => {
                    state.listeners.insert(service.kind, listener);
                    continue;
                }
                Some(exited) => {
                    debug!(variant = %service.kind, "Re-provisioning exited listener");
                    Some(exited.cancel())
                }
                None => state.retired_listeners.remove(&service.kind),
            };

            let listener = ListenerWorker::spawn(
                self.next_worker_id(),
                service.clone(),
                Arc::clone(&self.shared.transport),
                self.handle(),
                predecessor,
            );
            state.listeners.insert(service.kind, listener);
        }
    }

    fn is_current(state: &LinkState, origin: Origin) -> bool {
        match origin {
            Origin::External => true,
            Origin::Listener(id) => state.listeners.values().any(|l| l.id() == id),
            Origin::Dialer(id) => state.dialer.as_ref().map(|d| d.id()) == Some(id),
            Origin::Pump(id) => state.pump.as_ref().map(|p| p.id()) == Some(id),
        }
    }

    pub(crate) fn complete(&self, origin: Origin, link: Link) -> bool {
        let mut state = self.shared.state.lock();

        if !state.role.accepts_link() || !Self::is_current(&state, origin) {
            debug!(
                role = %state.role,
                peer = %link.peer.address,
                "Discarding link that lost the race"
            );
            self.shared.counters.links_rejected.fetch_add(1, Ordering::Relaxed);
            drop(link);
            return false;
        }

        info!(
            peer = %link.peer.address,
            variant = %link.variant,
            "Link established"
        );

        if let Origin::Dialer(_) = origin {
            state.dialer.take();
        }
        state.prune_retired();
        state.cancel_dialer();
        state.cancel_pump();
        state.cancel_listeners();

        let peer_name = link.peer.display_name();
        self.transition(&mut state, Role::Connected);
        self.shared.events.emit(LinkEvent::PeerIdentified(peer_name));

        let pump = DataPump::spawn(
            self.next_worker_id(),
            link,
            PumpSettings::from(&self.shared.config.link),
            Arc::clone(&self.shared.events),
            self.handle(),
        );
        state.pump = Some(pump);
        self.shared
            .counters
            .sessions_established
            .fetch_add(1, Ordering::Relaxed);
        true
    }

    pub(crate) fn report_failure(&self, origin: Origin, message: &str) {
        let mut state = self.shared.state.lock();

        if !Self::is_current(&state, origin) {
            debug!(?origin, "Ignoring failure from superseded worker: {}", message);
            return;
        }

        match origin {
            Origin::Dialer(_) => {
                self.shared.counters.dial_failures.fetch_add(1, Ordering::Relaxed);
            }
            Origin::Pump(_) => {
                self.shared.counters.connections_lost.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }

        warn!("{}", message);
        self.shared.events.emit(LinkEvent::Notice(message.to_string()));
        self.start_locked(&mut state);
    }
}
