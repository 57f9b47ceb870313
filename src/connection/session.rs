//! Link Session

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime};

use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::protocol::{PeerInfo, VariantKind};

/// Traffic accounting for one installed data pump
#[derive(Debug)]
pub struct LinkSession {
    pub session_id: String,
    pub peer: PeerInfo,
    pub variant: VariantKind,
    pub start_time: Instant,
    started_at: SystemTime,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    frames_in: AtomicU64,
    writes: AtomicU64,
}

/// Point-in-time view of a [`LinkSession`]
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub peer: String,
    pub variant: VariantKind,
    pub started_at: SystemTime,
    pub duration_ms: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub frames_in: u64,
    pub writes: u64,
}

impl LinkSession {
    pub fn new(peer: PeerInfo, variant: VariantKind) -> Self {
        let session_id = Uuid::new_v4().to_string();
        debug!("Creating link session {} ({} via {})", session_id, peer.address, variant);

        Self {
            session_id,
            peer,
            variant,
            start_time: Instant::now(),
            started_at: SystemTime::now(),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            frames_in: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    pub fn bytes_in(&self) -> u64 {
        self.bytes_in.load(Ordering::Relaxed)
    }

    pub fn bytes_out(&self) -> u64 {
        self.bytes_out.load(Ordering::Relaxed)
    }

    pub fn frames_in(&self) -> u64 {
        self.frames_in.load(Ordering::Relaxed)
    }

    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    pub fn record_read(&self, bytes: usize) {
        self.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_frame(&self) {
        self.frames_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self, bytes: usize) {
        self.bytes_out.fetch_add(bytes as u64, Ordering::Relaxed);
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            peer: self.peer.display_name(),
            variant: self.variant,
            started_at: self.started_at,
            duration_ms: self.duration().as_millis() as u64,
            bytes_in: self.bytes_in(),
            bytes_out: self.bytes_out(),
            frames_in: self.frames_in(),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        info!(
            session_id = %self.session_id,
            peer = %self.peer.address,
            variant = %self.variant,
            duration_ms = self.duration().as_millis() as u64,
            bytes_in = self.bytes_in(),
            bytes_out = self.bytes_out(),
            frames_in = self.frames_in(),
            "Link session ended"
        );
    }
}
