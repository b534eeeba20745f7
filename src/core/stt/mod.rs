mod base;
pub mod recognize;

// Re-export public types and traits
pub use base::{EventKind, EventSource, StreamError, StreamEvent};
pub(crate) use base::next_source_id;

// Re-export the recognize session adapter
pub use recognize::{
    Alternative, ClientMessage, ReadMode, RecognitionResult, RecognizeConfig, RecognizeStream,
    ServerMessage, StartParams, TranscriptStream,
};
