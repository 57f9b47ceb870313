//! Listener Worker
//!
//! One per advertised service variant. Accepts until cancelled, which the
//! manager does as soon as any link is installed.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use super::manager::{ManagerHandle, Origin};
use super::worker::{CancelSignal, WorkerHandle, WorkerId};
use crate::protocol::{ServiceVariant, VariantKind};
use crate::transport::Transport;

pub struct ListenerWorker {
    worker: WorkerHandle,
    variant: VariantKind,
}

impl ListenerWorker {
    /// Spawn a listener for `service`.
    ///
    /// `predecessor` is the cancelled listener for the same variant, if any;
    /// the endpoint is only opened once it has released its own.
    pub fn spawn(
        id: WorkerId,
        service: ServiceVariant,
        transport: Arc<dyn Transport>,
        manager: ManagerHandle,
        predecessor: Option<JoinHandle<()>>,
    ) -> Self {
        let variant = service.kind;
        let worker = WorkerHandle::spawn(id, "listener", move |cancel| {
            run(id, service, transport, manager, predecessor, cancel)
        });

        Self { worker, variant }
    }

    pub fn id(&self) -> WorkerId {
        self.worker.id()
    }

    pub fn variant(&self) -> VariantKind {
        self.variant
    }

    /// Whether the accept loop has ended, either inert or after an accept error
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    pub fn cancel(self) -> JoinHandle<()> {
        self.worker.cancel()
    }
}

#[instrument(name = "listener", skip_all, fields(worker = id, variant = %service.kind))]
async fn run(
    id: WorkerId,
    service: ServiceVariant,
    transport: Arc<dyn Transport>,
    manager: ManagerHandle,
    predecessor: Option<JoinHandle<()>>,
    mut cancel: CancelSignal,
) {
    if let Some(previous) = predecessor {
        let _ = previous.await;
    }

    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        opened = transport.listen(&service) => opened,
    };

    let mut endpoint = match opened {
        Ok(endpoint) => endpoint,
        Err(e) => {
            error!("Listener is inert: {}", e);
            return;
        }
    };

    info!(service = %service.name, "Accepting inbound links");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Listener cancelled");
                break;
            }
            accepted = endpoint.accept() => match accepted {
                Ok(link) => {
                    let peer = link.peer.address.clone();
                    if manager.on_connected(Origin::Listener(id), link) {
                        info!("Inbound link from {} installed", peer);
                    } else {
                        debug!("Closed inbound link from {}", peer);
                    }
                }
                Err(e) => {
                    error!("Accept failed, listener exiting: {}", e);
                    break;
                }
            }
        }
    }

    if let Err(e) = endpoint.close().await {
        debug!("Failed to close endpoint: {}", e);
    }
}
