//! Cancellable worker tasks

use std::future::Future;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

/// Identifies one worker instance for the lifetime of the manager
pub type WorkerId = u64;

/// Receiving side of a worker's cancellation signal
pub struct CancelSignal {
    rx: broadcast::Receiver<()>,
}

impl CancelSignal {
    /// Resolves once the owner cancels the worker or drops its handle
    pub async fn cancelled(&mut self) {
        let _ = self.rx.recv().await;
    }
}

/// Owner's handle on a spawned worker task
pub struct WorkerHandle {
    id: WorkerId,
    name: &'static str,
    cancel_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Spawn `task_fn` on the runtime, handing it the cancellation signal
    pub fn spawn<F, Fut>(id: WorkerId, name: &'static str, task_fn: F) -> Self
    where
        F: FnOnce(CancelSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (cancel_tx, rx) = broadcast::channel(1);
        let fut = task_fn(CancelSignal { rx });

        let task = tokio::spawn(async move {
            debug!(worker = id, "Starting {} worker", name);
            fut.await;
            debug!(worker = id, "{} worker exited", name);
        });

        Self {
            id,
            name,
            cancel_tx,
            task,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the worker to release its resource and exit.
    ///
    /// Returns the task so the caller can await its termination; the worker
    /// is not guaranteed to have stopped when this returns.
    pub fn cancel(self) -> JoinHandle<()> {
        debug!(worker = self.id, "Cancelling {} worker", self.name);
        let _ = self.cancel_tx.send(());
        self.task
    }
}
