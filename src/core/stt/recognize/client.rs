//! Public recognize stream handle.
//!
//! [`RecognizeStream`] is a thin handle over the session task spawned in
//! [`RecognizeStream::new`]: audio goes in through [`RecognizeStream::write`],
//! finalized transcripts come out of the [`TranscriptStream`], and
//! everything else is raised as a [`StreamEvent`] on the broadcast surface.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::debug;

use super::config::RecognizeConfig;
use super::session::{Command, Session};
use crate::core::stt::base::{EventSource, StreamError, StreamEvent, next_source_id};
use crate::core::transport::{Transport, WebSocketTransport};

/// Streaming speech recognition over one transport session.
///
/// Constructing the stream does not connect; the first [`write`] opens
/// the transport, sends the handshake and waits for the service to start
/// listening before any audio is transmitted.
///
/// # Example
///
/// ```rust,no_run
/// use futures::StreamExt;
/// use recognize_stream::{RecognizeConfig, RecognizeStream, StreamEvent};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = RecognizeConfig {
///         token: Some("your-token".to_string()),
///         ..Default::default()
///     };
///
///     let mut stream = RecognizeStream::with_websocket(config)?;
///     let mut events = stream.subscribe();
///     let mut transcripts = stream.take_transcripts().unwrap();
///
///     tokio::spawn(async move {
///         while let Ok(event) = events.recv().await {
///             if let StreamEvent::Error(e) = event {
///                 eprintln!("recognize error: {e}");
///             }
///         }
///     });
///
///     stream.write(std::fs::read("audio.wav")?).await?;
///     stream.end();
///
///     while let Some(text) = transcripts.next().await {
///         println!("{text}");
///     }
///     Ok(())
/// }
/// ```
///
/// [`write`]: RecognizeStream::write
pub struct RecognizeStream {
    id: u64,
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<StreamEvent>,
    transcripts: Option<TranscriptStream>,
}

impl RecognizeStream {
    /// Create a stream over the given transport.
    ///
    /// Must be called inside a tokio runtime; the session task is spawned
    /// immediately but stays idle until the first write.
    pub fn new(config: RecognizeConfig, transport: Arc<dyn Transport>) -> Result<Self, StreamError> {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        let (output_tx, output_rx) = mpsc::unbounded_channel();

        let session = Session::new(config, transport, event_tx.clone(), output_tx);
        tokio::spawn(session.run(command_rx));

        Ok(Self {
            id: next_source_id(),
            commands: command_tx,
            events: event_tx,
            transcripts: Some(TranscriptStream { rx: output_rx }),
        })
    }

    /// Create a stream over a [`WebSocketTransport`].
    pub fn with_websocket(config: RecognizeConfig) -> Result<Self, StreamError> {
        Self::new(config, Arc::new(WebSocketTransport::new()))
    }

    /// Submit one audio chunk.
    ///
    /// Resolves once the chunk has been handed to the transport and the
    /// transport's buffered byte count is at or below the high-water mark.
    /// Chunks are transmitted in submission order.
    pub async fn write(&self, chunk: impl Into<Bytes>) -> Result<(), StreamError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.commands
            .send(Command::Write {
                chunk: chunk.into(),
                ack: ack_tx,
            })
            .map_err(|_| StreamError::Closed)?;
        ack_rx.await.map_err(|_| StreamError::Closed)?
    }

    /// Signal end of input. The stop message follows the last queued write.
    pub fn end(&self) {
        self.finish();
    }

    /// Send the stop message (once), after any queued writes.
    pub fn finish(&self) {
        self.send(Command::Finish);
    }

    /// Raise a `stop` event and stop the session.
    ///
    /// A hard stop closes the transport immediately without the stop
    /// handshake, so the service may not flush pending results.
    pub fn stop(&self, hard: bool) {
        self.send(Command::Stop { hard });
    }

    /// Subscribe to side-channel events raised from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    /// Take the readable side. Returns `None` after the first call.
    pub fn take_transcripts(&mut self) -> Option<TranscriptStream> {
        self.transcripts.take()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Recognize session already finished");
        }
    }
}

impl EventSource for RecognizeStream {
    fn source_id(&self) -> u64 {
        self.id
    }

    fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }
}

/// Readable side of a [`RecognizeStream`]: finalized transcripts in order.
///
/// Ends (yields `None`) once the session's output is over.
#[derive(Debug)]
pub struct TranscriptStream {
    rx: mpsc::UnboundedReceiver<String>,
}

impl Stream for TranscriptStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
impl TranscriptStream {
    pub(crate) fn from_receiver(rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self { rx }
    }
}
