//! WebSocket transport over tokio-tungstenite.
//!
//! Each opened connection runs as one spawned task that owns the socket:
//! - Unbounded channel for outbound frames (the session applies its own
//!   flow control through [`TransportSink::buffered_amount`])
//! - Atomic counter of enqueued-but-unwritten bytes
//! - Unbounded channel for [`TransportEvent`]s back to the session

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info, warn};

use super::{Frame, Transport, TransportConnection, TransportEvent, TransportRequest, TransportSink};
use crate::core::stt::StreamError;

/// Close code reported when the connection ends without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code reported when a close frame carried no status.
const NO_STATUS_RECEIVED: u16 = 1005;

enum Outbound {
    Frame(Frame),
    Close,
}

/// Production [`Transport`] backed by tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    connect_timeout: Duration,
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override how long the opening handshake may take before the
    /// connection is reported as failed.
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

impl Transport for WebSocketTransport {
    fn open(&self, request: TransportRequest) -> TransportConnection {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<TransportEvent>();
        let buffered = Arc::new(AtomicUsize::new(0));

        tokio::spawn(run_connection(
            request,
            self.connect_timeout,
            outbound_rx,
            buffered.clone(),
            event_tx,
        ));

        TransportConnection {
            sink: Box::new(WebSocketSink {
                outbound_tx,
                buffered,
            }),
            events: event_rx,
        }
    }
}

struct WebSocketSink {
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    buffered: Arc<AtomicUsize>,
}

impl TransportSink for WebSocketSink {
    fn send(&self, frame: Frame) -> Result<(), StreamError> {
        let len = frame.len();
        self.buffered.fetch_add(len, Ordering::SeqCst);
        if self.outbound_tx.send(Outbound::Frame(frame)).is_err() {
            self.buffered.fetch_sub(len, Ordering::SeqCst);
            return Err(StreamError::Transport(
                "WebSocket connection is closed".to_string(),
            ));
        }
        Ok(())
    }

    fn close(&self) {
        let _ = self.outbound_tx.send(Outbound::Close);
    }

    fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }
}

fn build_client_request(request: &TransportRequest) -> Result<Request, StreamError> {
    let mut client_request = request
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| StreamError::ConnectionFailed(format!("Invalid WebSocket URL: {e}")))?;

    for (name, value) in &request.headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            StreamError::ConfigurationError(format!("Invalid header name '{name}': {e}"))
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            StreamError::ConfigurationError(format!("Invalid value for header '{name}': {e}"))
        })?;
        client_request.headers_mut().insert(name, value);
    }

    Ok(client_request)
}

fn fail(events: &mpsc::UnboundedSender<TransportEvent>, err: StreamError) {
    error!("{}", err);
    let _ = events.send(TransportEvent::Error(err.to_string()));
    let _ = events.send(TransportEvent::Close {
        code: ABNORMAL_CLOSURE,
        reason: err.to_string(),
    });
}

async fn run_connection(
    request: TransportRequest,
    connect_timeout: Duration,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    buffered: Arc<AtomicUsize>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let client_request = match build_client_request(&request) {
        Ok(client_request) => client_request,
        Err(e) => {
            fail(&events, e);
            return;
        }
    };

    let ws_stream = match timeout(connect_timeout, connect_async(client_request)).await {
        Ok(Ok((ws_stream, _))) => ws_stream,
        Ok(Err(e)) => {
            fail(
                &events,
                StreamError::ConnectionFailed(format!("Failed to connect: {e}")),
            );
            return;
        }
        Err(_) => {
            fail(
                &events,
                StreamError::ConnectionFailed("Connection timeout".to_string()),
            );
            return;
        }
    };

    info!("Connected to recognize WebSocket");
    let _ = events.send(TransportEvent::Open);

    let (mut ws_sink, mut ws_stream) = ws_stream.split();
    let mut close_code = ABNORMAL_CLOSURE;
    let mut close_reason = String::new();
    let mut closing = false;

    loop {
        tokio::select! {
            outbound = outbound_rx.recv(), if !closing => {
                match outbound {
                    Some(Outbound::Frame(frame)) => {
                        let len = frame.len();
                        let message = match frame {
                            Frame::Text(text) => Message::Text(text.into()),
                            Frame::Binary(data) => Message::Binary(data),
                        };
                        let sent = ws_sink.send(message).await;
                        buffered.fetch_sub(len, Ordering::SeqCst);
                        if let Err(e) = sent {
                            let err = StreamError::Transport(format!(
                                "Failed to send WebSocket message: {e}"
                            ));
                            error!("{}", err);
                            let _ = events.send(TransportEvent::Error(err.to_string()));
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        debug!("Closing recognize WebSocket");
                        closing = true;
                        if let Err(e) = ws_sink.close().await {
                            warn!("Failed to send close frame: {}", e);
                            break;
                        }
                    }
                }
            }

            message = ws_stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        let _ = events.send(TransportEvent::Text(text.as_str().to_owned()));
                    }
                    Some(Ok(Message::Binary(data))) => {
                        let _ = events.send(TransportEvent::Binary(data));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!("WebSocket connection closed: {:?}", frame);
                        match frame {
                            Some(frame) => {
                                close_code = u16::from(frame.code);
                                close_reason = frame.reason.as_str().to_owned();
                            }
                            None => close_code = NO_STATUS_RECEIVED,
                        }
                    }
                    Some(Ok(_)) => {
                        // Ping/Pong are answered by tungstenite itself
                    }
                    Some(Err(e)) => {
                        let err = StreamError::Transport(format!("WebSocket error: {e}"));
                        error!("{}", err);
                        let _ = events.send(TransportEvent::Error(err.to_string()));
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    let _ = events.send(TransportEvent::Close {
        code: close_code,
        reason: close_reason,
    });
}
