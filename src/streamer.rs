use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::config::{StreamerConfig, FRAME_QUEUE_CAPACITY, SIGNAL_QUEUE_CAPACITY};
use crate::error::Result;
use crate::fanout::{Frame, MediaFanoutLoop};
use crate::peer::PeerConnector;
use crate::queue::{BoundedQueue, Overflow};
use crate::signal::SignalingLoop;
use crate::table::SessionTable;
use crate::transport::{EventQueue, SignalingTransport};

/// The streaming server: session table, frame queue and the two loops.
///
/// Lock order: the session table lock is never held while a session's own
/// lock is taken, so neither loop can deadlock against the other or against
/// peer engine callbacks.
pub struct Server {
    terminate: Arc<AtomicBool>,
    transport: Arc<dyn SignalingTransport>,
    table: Arc<SessionTable>,
    frames: Arc<BoundedQueue<Frame>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Server {
    /// Wire the queues and start the signaling and fan-out threads.
    pub fn start(
        config: StreamerConfig,
        transport: Arc<dyn SignalingTransport>,
        connector: Arc<dyn PeerConnector>,
    ) -> Result<Self> {
        let terminate = Arc::new(AtomicBool::new(false));
        let table = Arc::new(SessionTable::new());
        // live media: never stall the producer, drop the newest frame instead
        let frames = Arc::new(BoundedQueue::new(FRAME_QUEUE_CAPACITY, Overflow::DropNewest));
        let events = Arc::new(EventQueue::new(
            SIGNAL_QUEUE_CAPACITY,
            Overflow::Block(config.signal_push_timeout),
        ));

        let fanout = MediaFanoutLoop::new(
            frames.clone(),
            table.clone(),
            terminate.clone(),
            config.poll_interval,
        );
        let signaling = SignalingLoop::new(
            config,
            table.clone(),
            connector,
            transport.clone(),
            events,
            terminate.clone(),
        );

        let mut threads = Vec::with_capacity(2);
        threads.push(
            thread::Builder::new()
                .name("signaling".into())
                .spawn(move || signaling.run())?,
        );
        let fanout_thread = thread::Builder::new()
            .name("fanout".into())
            .spawn(move || fanout.run());
        match fanout_thread {
            Ok(handle) => threads.push(handle),
            Err(e) => {
                terminate.store(true, Ordering::Release);
                transport.close();
                for handle in threads {
                    let _ = handle.join();
                }
                return Err(e.into());
            }
        }

        Ok(Self {
            terminate,
            transport,
            table,
            frames,
            threads: Mutex::new(threads),
        })
    }

    /// Copy one encoded sample into the frame queue.
    ///
    /// Empty samples are ignored. Returns `false` if nothing was queued.
    pub fn submit_frame(&self, data: &[u8]) -> bool {
        let Some(frame) = Frame::copy_from(data) else {
            return false;
        };
        if self.frames.push(frame).is_err() {
            log::debug!("Frame queue full, dropping {} byte frame", data.len());
            return false;
        }
        true
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.table.ids()
    }

    pub fn session_count(&self) -> usize {
        self.table.len()
    }

    pub fn pending_frames(&self) -> usize {
        self.frames.len()
    }

    /// Flag shared with the loops; set once shutdown begins.
    pub fn terminate_flag(&self) -> Arc<AtomicBool> {
        self.terminate.clone()
    }

    pub fn is_terminating(&self) -> bool {
        self.terminate.load(Ordering::Acquire)
    }

    /// Stop both loops, close the transport and release every session.
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        let threads = std::mem::take(&mut *self.threads.lock());
        if self.terminate.swap(true, Ordering::AcqRel) && threads.is_empty() {
            return;
        }

        log::info!("Shutting down streamer");
        self.transport.close();
        for handle in threads {
            let name = handle.thread().name().unwrap_or("worker").to_owned();
            if handle.join().is_err() {
                log::error!("{} thread panicked", name);
            }
        }
        for session in self.table.drain() {
            session.close();
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}
