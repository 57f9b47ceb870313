//! Newline-delimited inbound framing

use bytes::{Bytes, BytesMut};

use super::constants::LINE_TERMINATOR;

/// Accumulates inbound bytes across reads and cuts them into lines.
///
/// A frame always ends with [`LINE_TERMINATOR`] and is never longer than the
/// configured capacity. Content past the capacity is dropped until the next
/// terminator arrives; the terminator itself always fits.
#[derive(Debug)]
pub struct LineAccumulator {
    buf: BytesMut,
    capacity: usize,
    truncated: u64,
}

impl LineAccumulator {
    /// Create an accumulator holding at most `capacity` bytes per frame.
    /// A capacity below 2 is raised to 2 so a frame can hold one byte plus its terminator.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
            truncated: 0,
        }
    }

    /// Feed one read's worth of bytes, returning every frame it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        let mut frames = Vec::new();

        for &byte in chunk {
            if byte == LINE_TERMINATOR {
                self.buf.extend_from_slice(&[byte]);
                frames.push(self.buf.split().freeze());
                continue;
            }

            if self.buf.len() + 1 < self.capacity {
                self.buf.extend_from_slice(&[byte]);
            } else {
                self.truncated += 1;
            }
        }

        frames
    }

    /// Bytes waiting for a terminator
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Total bytes dropped because a line outgrew the capacity
    pub fn truncated(&self) -> u64 {
        self.truncated
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
