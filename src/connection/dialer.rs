//! Dialer Worker

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::manager::{ManagerHandle, Origin};
use super::worker::{CancelSignal, WorkerHandle, WorkerId};
use crate::error::LinkError;
use crate::protocol::{PeerAddress, ServiceVariant, NOTICE_DIAL_FAILED};
use crate::transport::Transport;

/// One outbound connection attempt to a fixed peer
pub struct Dialer {
    worker: WorkerHandle,
    peer: PeerAddress,
}

impl Dialer {
    pub fn spawn(
        id: WorkerId,
        peer: PeerAddress,
        service: ServiceVariant,
        transport: Arc<dyn Transport>,
        dial_timeout: Duration,
        manager: ManagerHandle,
    ) -> Self {
        let task_peer = peer.clone();
        let worker = WorkerHandle::spawn(id, "dialer", move |cancel| {
            run(id, task_peer, service, transport, dial_timeout, manager, cancel)
        });

        Self { worker, peer }
    }

    pub fn id(&self) -> WorkerId {
        self.worker.id()
    }

    pub fn peer(&self) -> &PeerAddress {
        &self.peer
    }

    /// Abandon the attempt. A cancelled dialer never reports back.
    pub fn cancel(self) -> JoinHandle<()> {
        self.worker.cancel()
    }
}

#[instrument(name = "dialer", skip_all, fields(worker = id, peer = %peer, variant = %service.kind))]
async fn run(
    id: WorkerId,
    peer: PeerAddress,
    service: ServiceVariant,
    transport: Arc<dyn Transport>,
    dial_timeout: Duration,
    manager: ManagerHandle,
    mut cancel: CancelSignal,
) {
    info!("Dialing peer");

    let attempt = tokio::time::timeout(dial_timeout, transport.dial(&peer, &service));
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("Dial abandoned");
            return;
        }
        outcome = attempt => outcome,
    };

    let error = match outcome {
        Ok(Ok(link)) => {
            info!("Dial succeeded");
            if !manager.on_connected(Origin::Dialer(id), link) {
                debug!("Dialed link was not installed");
            }
            return;
        }
        Ok(Err(e)) => e,
        Err(_) => LinkError::DialTimedOut {
            peer: peer.to_string(),
            timeout: dial_timeout,
        },
    };

    warn!("Dial failed: {}", error);
    manager.report_failure(Origin::Dialer(id), NOTICE_DIAL_FAILED);
}
