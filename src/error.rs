use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("webrtc error: {0}")]
    Webrtc(#[from] webrtc::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("signaling transport is not connected")]
    NotConnected,

    #[error("peer connection already closed")]
    PeerClosed,

    #[error("queue full, item dropped")]
    QueueFull,
}

pub type Result<T> = std::result::Result<T, Error>;
