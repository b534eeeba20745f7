//! Streaming recognize session over a WebSocket.
//!
//! This module provides the session adapter for the recognize protocol:
//!
//! - Lazy connection with content-type inference from the first chunk
//! - One opening handshake and at most one stop message per session
//! - No audio before the service reports it is listening
//! - Ordered writes with buffered-byte backpressure
//! - Finalized transcripts on a readable stream, everything else as events
//!
//! # Architecture
//!
//! - [`config`]: Session configuration, URL and handshake construction
//! - [`content_type`]: Magic-number content-type inference
//! - `messages`: Inbound and outbound protocol messages
//! - `client`: The public [`RecognizeStream`] handle
//! - `session`: The task that owns all session state

mod client;
pub mod config;
pub mod content_type;
mod messages;
mod session;

#[cfg(test)]
mod tests;

pub use client::{RecognizeStream, TranscriptStream};
pub use config::{ReadMode, RecognizeConfig};
pub use messages::{
    Alternative, ClientMessage, RecognitionResult, ServerMessage, StartParams,
};
