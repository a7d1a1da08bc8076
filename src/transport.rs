use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::queue::BoundedQueue;

/// Something the signaling transport has to report to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message(String),
    Closed,
}

pub type EventQueue = BoundedQueue<TransportEvent>;

/// Bidirectional text channel to the signaling server.
///
/// After `open`, inbound text and the eventual closure of the connection are
/// pushed into `events`. A connection closed through `close` reports nothing.
/// The `Closed` event is best effort; `is_open` is authoritative.
pub trait SignalingTransport: Send + Sync {
    fn open(&self, events: Arc<EventQueue>) -> Result<()>;
    fn send(&self, text: String) -> Result<()>;
    fn close(&self);
    /// True from `open` until the connection ends or is closed.
    fn is_open(&self) -> bool;
}

struct Connection {
    generation: u64,
    tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

/// WebSocket signaling transport.
pub struct WsTransport {
    url: String,
    handle: Handle,
    conn: Arc<Mutex<Option<Connection>>>,
    generation: AtomicU64,
}

impl WsTransport {
    pub fn new(url: impl Into<String>, handle: Handle) -> Self {
        Self {
            url: url.into(),
            handle,
            conn: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        }
    }
}

impl SignalingTransport for WsTransport {
    fn open(&self, events: Arc<EventQueue>) -> Result<()> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let previous = self.conn.lock().replace(Connection {
            generation,
            tx,
            cancel: cancel.clone(),
        });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }

        let url = self.url.clone();
        let conn = self.conn.clone();
        log::info!("Opening signaling connection to {}", url);
        self.handle.spawn(async move {
            if let Err(e) = run_connection(&url, rx, &events, &cancel).await {
                log::error!("WebSocket failed: {}", e);
            }

            // only the live connection may report closure
            let current = {
                let mut conn = conn.lock();
                if conn.as_ref().map(|c| c.generation) == Some(generation) {
                    conn.take();
                    true
                } else {
                    false
                }
            };
            if current {
                log::info!("WebSocket closed");
                forward(&events, TransportEvent::Closed);
            }
        });
        Ok(())
    }

    fn send(&self, text: String) -> Result<()> {
        match self.conn.lock().as_ref() {
            Some(conn) => conn.tx.send(text).map_err(|_| Error::NotConnected),
            None => Err(Error::NotConnected),
        }
    }

    fn close(&self) {
        if let Some(conn) = self.conn.lock().take() {
            conn.cancel.cancel();
        }
    }

    fn is_open(&self) -> bool {
        self.conn.lock().is_some()
    }
}

async fn run_connection(
    url: &str,
    mut rx: mpsc::UnboundedReceiver<String>,
    events: &EventQueue,
    cancel: &CancellationToken,
) -> Result<()> {
    let (ws_stream, _) = tokio::select! {
        res = connect_async(url) => res?,
        _ = cancel.cancelled() => return Ok(()),
    };
    log::info!("WebSocket connected, signaling ready");
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            out = rx.recv() => match out {
                Some(text) => write.send(Message::Text(text)).await?,
                None => break,
            },
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => forward(events, TransportEvent::Message(text)),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
    Ok(())
}

fn forward(events: &EventQueue, event: TransportEvent) {
    let pushed = match Handle::try_current() {
        Ok(_) => tokio::task::block_in_place(|| events.push(event)),
        Err(_) => events.push(event),
    };
    if pushed.is_err() {
        log::warn!("Signaling queue full, dropping inbound event");
    }
}
