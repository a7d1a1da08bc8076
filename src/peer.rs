use std::fmt;

use bytes::Bytes;

use crate::error::Result;
use crate::session::SessionEvents;

/// Transport-level connection state as reported by the peer engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerState {
    /// States after which the viewer is considered gone.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PeerState::Disconnected | PeerState::Failed | PeerState::Closed
        )
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PeerState::New => "new",
            PeerState::Connecting => "connecting",
            PeerState::Connected => "connected",
            PeerState::Disconnected => "disconnected",
            PeerState::Failed => "failed",
            PeerState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Settings for one peer connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerConfig {
    pub ice_servers: Vec<String>,
}

impl PeerConfig {
    /// Build a config from an optional STUN hint; an empty hint means none.
    pub fn with_stun(stun_server: Option<&str>) -> Self {
        let ice_servers = stun_server
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| vec![s.to_owned()])
            .unwrap_or_default();
        Self { ice_servers }
    }
}

/// Exclusively owned handle to one transport-level peer connection.
///
/// Implementations report asynchronous state and gathering changes through
/// the `SessionEvents` they were created with.
pub trait PeerHandle: Send + Sync {
    fn set_remote_answer(&self, sdp: &str) -> Result<()>;
    /// Write one encoded sample on the single outbound video track.
    fn send_sample(&self, data: &Bytes) -> Result<()>;
    fn close(&self) -> Result<()>;
}

/// Factory for peer handles. The handle must already have its outbound
/// track attached and local description generation started when returned.
pub trait PeerConnector: Send + Sync {
    fn connect(&self, config: PeerConfig, events: SessionEvents) -> Result<Box<dyn PeerHandle>>;
}
