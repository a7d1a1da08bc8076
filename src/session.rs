use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::config::SESSION_QUEUE_CAPACITY;
use crate::error::{Error, Result};
use crate::message::{Description, Outbound};
use crate::peer::{PeerConfig, PeerConnector, PeerHandle, PeerState};
use crate::queue::{BoundedQueue, Overflow};

/// Negotiation lifecycle of one remote viewer, derived from peer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Negotiating,
    Open,
    Closing,
    Closed,
}

impl From<PeerState> for SessionState {
    fn from(state: PeerState) -> Self {
        match state {
            PeerState::New | PeerState::Connecting => SessionState::Negotiating,
            PeerState::Connected => SessionState::Open,
            PeerState::Disconnected | PeerState::Failed => SessionState::Closing,
            PeerState::Closed => SessionState::Closed,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct Lifecycle {
    state: SessionState,
    quit_requested: bool,
}

struct Shared {
    id: String,
    lifecycle: Mutex<Lifecycle>,
    inbox: BoundedQueue<String>,
    outbox: BoundedQueue<Outbound>,
}

/// Notification sink handed to the peer engine.
///
/// Called from the engine's own threads. It only touches the session's
/// lifecycle lock and outbox, never the peer handle.
#[derive(Clone)]
pub struct SessionEvents {
    shared: Arc<Shared>,
}

impl SessionEvents {
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn state_changed(&self, state: PeerState) {
        log::info!("Peer {} state: {}", self.shared.id, state);

        let quit = {
            let mut lifecycle = self.shared.lifecycle.lock();
            if lifecycle.state != SessionState::Closed {
                lifecycle.state = state.into();
            }
            let quit = state.is_terminal() && !lifecycle.quit_requested;
            if quit {
                lifecycle.quit_requested = true;
            }
            quit
        };

        // a full outbox loses the marker but not the request, see `teardown_requested`
        if quit && self.shared.outbox.push(Outbound::Quit).is_err() {
            log::warn!("Outbox of {} is full, teardown marker dropped", self.shared.id);
        }
    }

    /// ICE gathering finished; queue the complete local description.
    pub fn gathering_complete(&self, sdp_type: &str, sdp: &str) {
        log::info!("Gathering complete for {}", self.shared.id);

        let description = Description {
            id: &self.shared.id,
            r#type: sdp_type,
            sdp,
        };
        let payload = match description.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("Failed to encode description for {}: {}", self.shared.id, e);
                return;
            }
        };
        if self.shared.outbox.push(Outbound::Signal(payload)).is_err() {
            log::warn!("Outbox of {} is full, local description dropped", self.shared.id);
        }
    }
}

/// One remote viewer: negotiation mailboxes plus its peer handle.
pub struct Session {
    shared: Arc<Shared>,
    peer: Mutex<Option<Box<dyn PeerHandle>>>,
}

impl Session {
    /// Allocate a peer handle for `id` and start local description generation.
    ///
    /// `push_timeout` bounds how long either mailbox blocks a producer when
    /// full.
    pub fn create(
        id: impl Into<String>,
        stun_server: Option<&str>,
        connector: &dyn PeerConnector,
        push_timeout: Duration,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            id: id.into(),
            lifecycle: Mutex::new(Lifecycle {
                state: SessionState::Negotiating,
                quit_requested: false,
            }),
            inbox: BoundedQueue::new(SESSION_QUEUE_CAPACITY, Overflow::Block(push_timeout)),
            outbox: BoundedQueue::new(SESSION_QUEUE_CAPACITY, Overflow::Block(push_timeout)),
        });

        let events = SessionEvents {
            shared: shared.clone(),
        };
        let peer = connector.connect(PeerConfig::with_stun(stun_server), events)?;

        Ok(Self {
            shared,
            peer: Mutex::new(Some(peer)),
        })
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn state(&self) -> SessionState {
        self.shared.lifecycle.lock().state
    }

    /// Queue a remote answer; `negotiate` applies it to the peer handle.
    pub fn submit_remote_answer(&self, sdp: String) -> Result<()> {
        self.shared.inbox.push(sdp).map_err(|_| Error::QueueFull)
    }

    /// Number of remote answers waiting for the negotiation step.
    pub fn pending_answers(&self) -> usize {
        self.shared.inbox.len()
    }

    /// Apply every queued remote answer. Returns how many were accepted.
    pub fn negotiate(&self) -> usize {
        let mut applied = 0;
        while let Some(sdp) = self.shared.inbox.try_pop() {
            let guard = self.peer.lock();
            let Some(peer) = guard.as_ref() else {
                log::debug!("Dropping answer for closed session {}", self.shared.id);
                continue;
            };
            match peer.set_remote_answer(&sdp) {
                Ok(()) => applied += 1,
                Err(e) => log::warn!("Failed to apply answer for {}: {}", self.shared.id, e),
            }
        }
        applied
    }

    /// The peer reached a terminal state and the session should be retired,
    /// whether or not its `Quit` marker made it into the outbox.
    pub fn teardown_requested(&self) -> bool {
        let lifecycle = self.shared.lifecycle.lock();
        lifecycle.quit_requested
            && matches!(lifecycle.state, SessionState::Closing | SessionState::Closed)
    }

    pub fn poll_outbound(&self, timeout: Duration) -> Option<Outbound> {
        self.shared.outbox.pop_for(timeout)
    }

    /// Forward one encoded frame on the session's video track.
    pub fn send_media(&self, data: &Bytes) -> Result<()> {
        match self.peer.lock().as_ref() {
            Some(peer) => peer.send_sample(data),
            None => Err(Error::PeerClosed),
        }
    }

    /// Release the peer handle. Only the first call does anything.
    pub fn close(&self) -> bool {
        {
            let mut lifecycle = self.shared.lifecycle.lock();
            lifecycle.state = SessionState::Closed;
            // the engine reports Closed while shutting down; nobody drains it
            lifecycle.quit_requested = true;
        }

        let Some(peer) = self.peer.lock().take() else {
            return false;
        };
        if let Err(e) = peer.close() {
            log::warn!("Error while closing peer {}: {}", self.shared.id, e);
        }
        log::info!("Peer {} released", self.shared.id);
        true
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
