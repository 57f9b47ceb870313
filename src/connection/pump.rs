//! Data Pump Worker
//!
//! Owns the live link once the manager is connected: reads it into the line
//! accumulator and serialises writes coming from `send`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::manager::{ManagerHandle, Origin};
use super::session::LinkSession;
use super::worker::{CancelSignal, WorkerHandle, WorkerId};
use crate::config::LinkConfig;
use crate::error::{LinkError, LinkResult};
use crate::event::{EventSink, LinkEvent};
use crate::protocol::{LineAccumulator, NOTICE_CONNECTION_LOST, NOTICE_WRITE_FAILED};
use crate::transport::{Link, Stream};

/// Read-side tuning taken from [`LinkConfig`]
#[derive(Debug, Clone, Copy)]
pub struct PumpSettings {
    pub read_chunk_size: usize,
    pub frame_capacity: usize,
    pub pace_interval: Duration,
}

impl From<&LinkConfig> for PumpSettings {
    fn from(config: &LinkConfig) -> Self {
        Self {
            read_chunk_size: config.read_chunk_size,
            frame_capacity: config.frame_capacity,
            pace_interval: config.pace_interval,
        }
    }
}

/// Shared write side of the live link.
///
/// Closing it aborts any write in progress and drops the write half, so a
/// peer that stops reading can never hold up cancellation.
#[derive(Clone)]
pub struct PumpWriter {
    half: Arc<AsyncMutex<Option<WriteHalf<Stream>>>>,
    closed: Arc<watch::Sender<bool>>,
    session: Arc<LinkSession>,
    events: Arc<dyn EventSink>,
}

impl PumpWriter {
    /// Write `bytes` in full; acknowledge through the sink only on success.
    ///
    /// A write abandoned because the link is closing returns
    /// [`LinkError::NotConnected`] and emits nothing.
    pub async fn write(&self, bytes: Bytes) -> LinkResult<()> {
        let mut closed = self.closed.subscribe();
        let result = tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => Err(LinkError::NotConnected),
            result = self.write_locked(&bytes) => result,
        };

        match result {
            Ok(()) => {
                self.session.record_write(bytes.len());
                self.events.emit(LinkEvent::OutboundAck(bytes));
                Ok(())
            }
            Err(LinkError::NotConnected) => {
                debug!(session_id = %self.session.session_id, "Write abandoned, link is closing");
                self.discard();
                Err(LinkError::NotConnected)
            }
            Err(e) => {
                warn!(session_id = %self.session.session_id, "Write failed: {}", e);
                self.events.emit(LinkEvent::Notice(NOTICE_WRITE_FAILED.to_string()));
                Err(e)
            }
        }
    }

    async fn write_locked(&self, bytes: &[u8]) -> LinkResult<()> {
        let mut half = self.half.lock().await;
        let writer = half.as_mut().ok_or(LinkError::NotConnected)?;
        writer.write_all(bytes).await.map_err(LinkError::WriteFailed)?;
        writer.flush().await.map_err(LinkError::WriteFailed)
    }

    /// Abort in-flight writes and drop the write half if it is free
    fn detach(&self) {
        self.closed.send_replace(true);
        self.discard();
    }

    fn discard(&self) {
        if let Ok(mut half) = self.half.try_lock() {
            half.take();
        }
    }

    async fn close(&self) {
        self.closed.send_replace(true);
        if let Some(mut writer) = self.half.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }
}

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

/// Manager-side handle on the installed data pump
pub struct DataPump {
    worker: WorkerHandle,
    writer: PumpWriter,
    session: Arc<LinkSession>,
}

enum PumpExit {
    Cancelled,
    Failed(LinkError),
}

impl DataPump {
    pub fn spawn(
        id: WorkerId,
        link: Link,
        settings: PumpSettings,
        events: Arc<dyn EventSink>,
        manager: ManagerHandle,
    ) -> Self {
        let Link {
            stream,
            peer,
            variant,
        } = link;
        let session = Arc::new(LinkSession::new(peer, variant));
        let (reader, writer) = tokio::io::split(stream);

        let (closed, _) = watch::channel(false);
        let writer = PumpWriter {
            half: Arc::new(AsyncMutex::new(Some(writer))),
            closed: Arc::new(closed),
            session: Arc::clone(&session),
            events: Arc::clone(&events),
        };

        let task_writer = writer.clone();
        let task_session = Arc::clone(&session);
        let worker = WorkerHandle::spawn(id, "data pump", move |cancel| {
            run(id, reader, task_writer, task_session, settings, events, manager, cancel)
        });

        Self {
            worker,
            writer,
            session,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.worker.id()
    }

    pub fn writer(&self) -> PumpWriter {
        self.writer.clone()
    }

    pub fn session(&self) -> &Arc<LinkSession> {
        &self.session
    }

    pub fn cancel(self) -> JoinHandle<()> {
        self.writer.detach();
        self.worker.cancel()
    }
}

#[allow(clippy::too_many_arguments)]
#[instrument(
    name = "data_pump",
    skip_all,
    fields(worker = id, session_id = %session.session_id, peer = %session.peer.address)
)]
async fn run(
    id: WorkerId,
    mut reader: ReadHalf<Stream>,
    writer: PumpWriter,
    session: Arc<LinkSession>,
    settings: PumpSettings,
    events: Arc<dyn EventSink>,
    manager: ManagerHandle,
    mut cancel: CancelSignal,
) {
    info!(variant = %session.variant, "Data pump started");

    let mut lines = LineAccumulator::new(settings.frame_capacity);
    let mut buf = vec![0u8; settings.read_chunk_size.max(1)];

    let exit = loop {
        if !settings.pace_interval.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break PumpExit::Cancelled,
                _ = tokio::time::sleep(settings.pace_interval) => {}
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break PumpExit::Cancelled,
            read = reader.read(&mut buf) => match read {
                Ok(0) => break PumpExit::Failed(LinkError::ConnectionLost),
                Ok(n) => {
                    session.record_read(n);
                    for frame in lines.push(&buf[..n]) {
                        session.record_frame();
                        events.emit(LinkEvent::InboundFrame(frame));
                    }
                }
                Err(e) => break PumpExit::Failed(LinkError::ReadFailed(e)),
            }
        }
    };

    drop(reader);
    writer.close().await;
    if lines.truncated() > 0 {
        debug!(truncated = lines.truncated(), "Dropped bytes from oversized lines");
    }
    session.log_stats();

    match exit {
        PumpExit::Cancelled => debug!("Data pump cancelled"),
        PumpExit::Failed(e) => {
            warn!("Link failed: {}", e);
            manager.report_failure(Origin::Pump(id), NOTICE_CONNECTION_LOST);
        }
    }
}
