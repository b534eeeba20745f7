use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use super::recognize::RecognitionResult;

/// Error types for recognize stream operations
///
/// Every variant is `Clone` so errors can travel on the broadcast event
/// surface alongside the other side-channel events.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Malformed message ({reason}): {raw}")]
    MalformedMessage { raw: String, reason: String },
    #[error("Unrecognized message: {raw}")]
    UnrecognizedMessage { raw: String },
    #[error("Unexpected binary message ({len} bytes)")]
    UnexpectedBinary { len: usize },
    #[error("Service error: {message}")]
    Service { message: String, raw: String },
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Write after end of input")]
    WriteAfterEnd,
    #[error("Session closed")]
    Closed,
}

/// Named side-channel event kinds raised by a recognize stream.
///
/// Output text is not one of these; it flows on the readable side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Listening,
    Message,
    Results,
    Result,
    Error,
    Close,
    Stop,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::Connect,
        EventKind::Listening,
        EventKind::Message,
        EventKind::Results,
        EventKind::Result,
        EventKind::Error,
        EventKind::Close,
        EventKind::Stop,
    ];

    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Listening => "listening",
            Self::Message => "message",
            Self::Results => "results",
            Self::Result => "result",
            Self::Error => "error",
            Self::Close => "close",
            Self::Stop => "stop",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side-channel event raised by a recognize stream
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The handshake has been sent over a freshly opened transport.
    Connect,
    /// The service reported it is ready to accept audio.
    Listening,
    /// Every successfully decoded inbound frame.
    Message(Value),
    /// The whole results array of one update.
    Results(Vec<RecognitionResult>),
    /// One entry of a results update.
    Result(RecognitionResult),
    Error(StreamError),
    Close { code: u16, reason: String },
    Stop,
}

impl StreamEvent {
    #[inline]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connect => EventKind::Connect,
            Self::Listening => EventKind::Listening,
            Self::Message(_) => EventKind::Message,
            Self::Results(_) => EventKind::Results,
            Self::Result(_) => EventKind::Result,
            Self::Error(_) => EventKind::Error,
            Self::Close { .. } => EventKind::Close,
            Self::Stop => EventKind::Stop,
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.kind().as_str()
    }
}

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique [`EventSource::source_id`].
pub(crate) fn next_source_id() -> u64 {
    NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Anything that raises side-channel events and can be attached to an
/// [`crate::core::events::EventAggregator`].
pub trait EventSource {
    /// Process-unique identifier of this source.
    fn source_id(&self) -> u64;

    /// Subscribe to the events raised from now on.
    fn subscribe(&self) -> tokio::sync::broadcast::Receiver<StreamEvent>;
}
