//! Transport collaborator consumed by the recognize stream.
//!
//! The session adapter treats the socket as an opaque, push-based message
//! channel: it opens a connection, enqueues frames without waiting, reads
//! the outstanding byte count for flow control, and receives lifecycle and
//! message notifications as [`TransportEvent`]s on a channel.
//!
//! [`WebSocketTransport`] is the production implementation over
//! tokio-tungstenite.

mod websocket;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::core::stt::StreamError;

pub use websocket::WebSocketTransport;

/// Outbound frame handed to a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    /// Payload size in bytes, used for buffered-amount accounting.
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Notification pushed by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open,
    Text(String),
    Binary(Bytes),
    Error(String),
    /// Always the last event of a connection.
    Close { code: u16, reason: String },
}

/// Connection parameters for [`Transport::open`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

/// Sending half of an open (or opening) connection.
pub trait TransportSink: Send + Sync {
    /// Enqueue a frame without waiting for it to reach the network.
    fn send(&self, frame: Frame) -> Result<(), StreamError>;

    /// Begin closing the connection. A `Close` event follows.
    fn close(&self);

    /// Bytes enqueued by [`TransportSink::send`] that have not been written yet.
    fn buffered_amount(&self) -> usize;
}

/// A connection handed back by [`Transport::open`].
pub struct TransportConnection {
    pub sink: Box<dyn TransportSink>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens connections. Opening never blocks: progress, failure and
/// inbound traffic are all reported through the connection's event channel.
pub trait Transport: Send + Sync {
    fn open(&self, request: TransportRequest) -> TransportConnection;
}
