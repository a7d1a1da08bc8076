//! Stand-ins for the peer engine and signaling transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::peer::{PeerConfig, PeerConnector, PeerHandle};
use crate::session::SessionEvents;
use crate::transport::{EventQueue, SignalingTransport, TransportEvent};

/// Everything one fake peer was asked to do.
#[derive(Default)]
pub struct PeerLog {
    pub config: Mutex<PeerConfig>,
    pub answers: Mutex<Vec<String>>,
    pub samples: Mutex<Vec<Bytes>>,
    closes: AtomicUsize,
    fail_sends: AtomicBool,
}

impl PeerLog {
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

struct FakePeer {
    log: Arc<PeerLog>,
}

impl PeerHandle for FakePeer {
    fn set_remote_answer(&self, sdp: &str) -> Result<()> {
        self.log.answers.lock().push(sdp.to_owned());
        Ok(())
    }

    fn send_sample(&self, data: &Bytes) -> Result<()> {
        if self.log.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::PeerClosed);
        }
        self.log.samples.lock().push(data.clone());
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.log.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeConnector {
    peers: Mutex<HashMap<String, (SessionEvents, Arc<PeerLog>)>>,
    connects: AtomicUsize,
    fail_connects: AtomicBool,
}

impl FakeConnector {
    pub fn events(&self, id: &str) -> Option<SessionEvents> {
        self.peers.lock().get(id).map(|(events, _)| events.clone())
    }

    pub fn log(&self, id: &str) -> Option<Arc<PeerLog>> {
        self.peers.lock().get(id).map(|(_, log)| log.clone())
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn fail_connects(&self, fail: bool) {
        self.fail_connects.store(fail, Ordering::SeqCst);
    }
}

impl PeerConnector for FakeConnector {
    fn connect(&self, config: PeerConfig, events: SessionEvents) -> Result<Box<dyn PeerHandle>> {
        if self.fail_connects.load(Ordering::SeqCst) {
            return Err(Error::PeerClosed);
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        let log = Arc::new(PeerLog {
            config: Mutex::new(config),
            ..Default::default()
        });
        self.peers
            .lock()
            .insert(events.id().to_owned(), (events, log.clone()));
        Ok(Box::new(FakePeer { log }))
    }
}

#[derive(Default)]
pub struct FakeTransport {
    sent: Mutex<Vec<String>>,
    events: Mutex<Option<Arc<EventQueue>>>,
    connected: AtomicBool,
    opens: AtomicUsize,
    closes: AtomicUsize,
}

impl FakeTransport {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Deliver a text frame as if the signaling server sent it.
    pub fn inject(&self, text: &str) {
        if let Some(events) = self.events.lock().as_ref() {
            events
                .push(TransportEvent::Message(text.to_owned()))
                .expect("signaling queue full");
        }
    }

    /// Drop the connection without reporting it, as if the Closed event
    /// was lost.
    pub fn lose_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Simulate the server dropping the connection.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(events) = self.events.lock().as_ref() {
            events
                .push(TransportEvent::Closed)
                .expect("signaling queue full");
        }
    }
}

impl SignalingTransport for FakeTransport {
    fn open(&self, events: Arc<EventQueue>) -> Result<()> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        *self.events.lock() = Some(events);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn send(&self, text: String) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.sent.lock().push(text);
        Ok(())
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.is_connected()
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
