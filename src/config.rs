use std::time::Duration;

/// Capacity of each session's inbox and outbox.
pub const SESSION_QUEUE_CAPACITY: usize = 32;
/// Capacity of the shared signaling inbound queue.
pub const SIGNAL_QUEUE_CAPACITY: usize = 256;
/// Capacity of the frame ingestion queue.
pub const FRAME_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct StreamerConfig {
    pub signaling_url: String,
    /// STUN server handed to every new peer connection.
    pub stun_server: Option<String>,
    /// Pause before reopening a signaling transport that closed on its own.
    pub reconnect_delay: Duration,
    /// Longest a background loop waits on its input queue per iteration.
    pub poll_interval: Duration,
    /// How long the signaling loop waits on each session's outbox.
    pub outbound_poll: Duration,
    /// Upper bound on a blocking push into a signaling queue.
    pub signal_push_timeout: Duration,
    /// Duration stamped on every video sample.
    pub sample_duration: Duration,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://127.0.0.1:8000/server".into(),
            stun_server: None,
            reconnect_delay: Duration::from_millis(500),
            poll_interval: Duration::from_millis(50),
            outbound_poll: Duration::ZERO,
            signal_push_timeout: Duration::from_millis(500),
            sample_duration: Duration::from_millis(33),
        }
    }
}
