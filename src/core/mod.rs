pub mod events;
pub mod stt;
pub mod transport;

// Re-export commonly used types for convenience
pub use events::{EventAggregator, collapse, collapse_text};

pub use stt::{
    EventKind, EventSource, ReadMode, RecognitionResult, RecognizeConfig, RecognizeStream,
    StreamError, StreamEvent, TranscriptStream,
};

pub use transport::{
    Frame, Transport, TransportConnection, TransportEvent, TransportRequest, TransportSink,
    WebSocketTransport,
};
