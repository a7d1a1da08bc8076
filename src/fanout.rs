use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::queue::BoundedQueue;
use crate::table::SessionTable;

/// One encoded media sample, copied out of the producer's buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Bytes,
}

impl Frame {
    /// `None` for an empty buffer; such samples are dropped at ingestion.
    pub fn copy_from(data: &[u8]) -> Option<Self> {
        if data.is_empty() {
            return None;
        }
        Some(Self {
            data: Bytes::copy_from_slice(data),
        })
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Broadcasts every ingested frame to all live sessions.
pub struct MediaFanoutLoop {
    frames: Arc<BoundedQueue<Frame>>,
    table: Arc<SessionTable>,
    terminate: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl MediaFanoutLoop {
    pub fn new(
        frames: Arc<BoundedQueue<Frame>>,
        table: Arc<SessionTable>,
        terminate: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            frames,
            table,
            terminate,
            poll_interval,
        }
    }

    pub fn run(&self) {
        log::info!("Launching multimedia thread...");
        while !self.terminate.load(Ordering::Acquire) {
            if let Some(frame) = self.frames.pop_for(self.poll_interval) {
                self.fan_out(&frame);
            }
        }
        log::info!("Multimedia thread exiting");
    }

    /// Send `frame` to every session in a snapshot of the table. A session
    /// that fails only misses this frame.
    pub fn fan_out(&self, frame: &Frame) -> FanoutReport {
        let mut report = FanoutReport::default();
        for session in self.table.snapshot() {
            match session.send_media(frame.data()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    log::trace!("Frame skipped for {}: {}", session.id(), e);
                    report.failed += 1;
                }
            }
        }
        report
    }
}
