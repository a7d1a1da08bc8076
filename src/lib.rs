//! WebRTC streaming server core.
//!
//! Remote viewers ask for a stream over a shared signaling channel; each gets
//! its own [`Session`] and peer connection, and every encoded frame handed to
//! [`Server::submit_frame`] is fanned out to all of them.

pub mod config;
pub mod error;
pub mod fanout;
pub mod message;
pub mod peer;
pub mod producer;
pub mod queue;
pub mod rtc;
pub mod session;
pub mod signal;
pub mod streamer;
pub mod table;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use config::StreamerConfig;
pub use error::{Error, Result};
pub use fanout::{FanoutReport, Frame, MediaFanoutLoop};
pub use peer::{PeerConfig, PeerConnector, PeerHandle, PeerState};
pub use queue::{BoundedQueue, Overflow};
pub use rtc::RtcConnector;
pub use session::{Session, SessionEvents, SessionState};
pub use signal::{Dispatch, SignalingLoop};
pub use streamer::Server;
pub use table::SessionTable;
pub use transport::{SignalingTransport, TransportEvent, WsTransport};
