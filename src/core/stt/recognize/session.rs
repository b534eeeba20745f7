//! Session actor for the recognize protocol.
//!
//! One spawned task owns every piece of mutable session state (the
//! `connected`, `listening` and `finished` flags, the write queue, the
//! transport sink). The public handle only sends [`Command`]s, so state is
//! never touched from two places at once.
//!
//! The event loop multiplexes three inputs:
//! - Commands from the handle (writes, finish, stop)
//! - Events from the transport (open, frames, error, close)
//! - A backpressure ticker, active only while a write waits for the
//!   transport's buffered byte count to fall to the high-water mark

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::config::{ReadMode, RecognizeConfig};
use super::content_type;
use super::messages::{ClientMessage, ServerMessage};
use crate::core::stt::base::{StreamError, StreamEvent};
use crate::core::transport::{Frame, Transport, TransportEvent, TransportRequest, TransportSink};

pub(crate) type WriteAck = oneshot::Sender<Result<(), StreamError>>;

pub(crate) enum Command {
    Write { chunk: Bytes, ack: WriteAck },
    /// Graceful end of input; takes effect once queued writes complete.
    Finish,
    Stop { hard: bool },
}

struct PendingWrite {
    chunk: Bytes,
    ack: WriteAck,
}

pub(crate) struct Session {
    config: RecognizeConfig,
    transport: Arc<dyn Transport>,
    events: broadcast::Sender<StreamEvent>,
    output: Option<mpsc::UnboundedSender<String>>,
    sink: Option<Box<dyn TransportSink>>,

    /// Lazy connection has been started.
    connect_requested: bool,
    /// The handshake has been sent.
    connected: bool,
    /// The service is ready to accept audio.
    listening: bool,
    /// The stop message has been sent or scheduled.
    finished: bool,

    /// Stop message waits for the transport to open.
    stop_pending: bool,
    /// Finish waits for queued writes to drain.
    finish_pending: bool,
    /// No further writes are accepted.
    input_closed: bool,
    /// Hard stop requested; the handshake is never sent.
    aborted: bool,
    /// The transport reported close.
    closed: bool,
    /// The transport reported an error; the session is over even if no
    /// close follows.
    failed: bool,

    pending: VecDeque<PendingWrite>,
    in_flight: Option<WriteAck>,
}

impl Session {
    pub(crate) fn new(
        config: RecognizeConfig,
        transport: Arc<dyn Transport>,
        events: broadcast::Sender<StreamEvent>,
        output: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            config,
            transport,
            events,
            output: Some(output),
            sink: None,
            connect_requested: false,
            connected: false,
            listening: false,
            finished: false,
            stop_pending: false,
            finish_pending: false,
            input_closed: false,
            aborted: false,
            closed: false,
            failed: false,
            pending: VecDeque::new(),
            in_flight: None,
        }
    }

    /// Drive the session until every handle is gone and the transport is
    /// closed (or was never opened).
    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut transport_events: Option<mpsc::UnboundedReceiver<TransportEvent>> = None;
        let mut handles_alive = true;

        loop {
            tokio::select! {
                command = commands.recv(), if handles_alive => {
                    match command {
                        Some(command) => {
                            if let Some(events) = self.handle_command(command) {
                                transport_events = Some(events);
                            }
                        }
                        None => {
                            handles_alive = false;
                            self.on_handles_dropped();
                        }
                    }
                }

                event = next_transport_event(&mut transport_events) => {
                    match event {
                        Some(event) => self.handle_transport_event(event),
                        None => {
                            debug!("Transport event channel closed");
                            transport_events = None;
                            if !self.closed {
                                self.on_close(1006, String::new());
                            }
                        }
                    }
                }

                _ = ticker.tick(), if self.in_flight.is_some() => {
                    self.poll_backpressure();
                }
            }

            if !handles_alive && (self.closed || self.failed || transport_events.is_none()) {
                break;
            }
        }

        debug!("Recognize session task finished");
    }

    // =========================================================================
    // Commands
    // =========================================================================

    fn handle_command(
        &mut self,
        command: Command,
    ) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        match command {
            Command::Write { chunk, ack } => {
                if self.input_closed {
                    let _ = ack.send(Err(StreamError::WriteAfterEnd));
                    return None;
                }
                if self.closed || self.failed {
                    let _ = ack.send(Err(StreamError::Closed));
                    return None;
                }

                let events = if self.connect_requested {
                    None
                } else {
                    self.connect(&chunk)
                };

                self.pending.push_back(PendingWrite { chunk, ack });
                if self.closed {
                    self.fail_pending(StreamError::Closed);
                } else {
                    self.pump();
                }
                events
            }
            Command::Finish => {
                self.input_closed = true;
                self.request_finish();
                None
            }
            Command::Stop { hard } => {
                self.emit(StreamEvent::Stop);
                self.input_closed = true;
                if hard {
                    self.abort();
                } else {
                    self.request_finish();
                }
                None
            }
        }
    }

    /// Start the lazy connection, inferring the content type from the
    /// first chunk when none was configured.
    fn connect(&mut self, first_chunk: &[u8]) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.connect_requested = true;

        if self.config.content_type.is_none() {
            let inferred = content_type::detect_or(first_chunk, &self.config.default_content_type);
            self.config.content_type = Some(inferred);
        }

        let url = match self.config.build_websocket_url() {
            Ok(url) => url,
            Err(e) => {
                error!("Cannot build recognize URL: {}", e);
                self.emit(StreamEvent::Error(e));
                self.closed = true;
                self.end_output();
                return None;
            }
        };

        info!(
            "Opening recognize session (model {}, content type {})",
            self.config.model,
            self.config.content_type.as_deref().unwrap_or_default()
        );
        let connection = self.transport.open(TransportRequest {
            url,
            headers: self.config.transport_headers(),
        });
        self.sink = Some(connection.sink);
        Some(connection.events)
    }

    fn request_finish(&mut self) {
        if self.pending.is_empty() && self.in_flight.is_none() {
            self.finish();
        } else {
            self.finish_pending = true;
        }
    }

    /// Send the stop message at most once, deferring it until the
    /// handshake has been sent.
    fn finish(&mut self) {
        self.finish_pending = false;
        if self.finished {
            return;
        }
        self.finished = true;

        if self.failed {
            self.end_output();
        } else if self.connected {
            self.send_control(&ClientMessage::Stop);
        } else if self.connect_requested && !self.closed {
            debug!("Deferring stop message until connect");
            self.stop_pending = true;
        } else {
            // No audio was ever written, so no output can arrive.
            self.end_output();
        }
    }

    /// Close the transport immediately, skipping the stop handshake.
    fn abort(&mut self) {
        self.aborted = true;
        self.finished = true;
        self.finish_pending = false;
        self.stop_pending = false;

        // The in-flight chunk already reached the transport.
        if let Some(ack) = self.in_flight.take() {
            let _ = ack.send(Ok(()));
        }
        self.fail_pending(StreamError::Closed);

        match &self.sink {
            Some(sink) if !self.closed => {
                info!("Hard stop: closing recognize transport");
                sink.close();
            }
            _ => self.end_output(),
        }
    }

    fn on_handles_dropped(&mut self) {
        if self.input_closed && !self.aborted && !self.closed && !self.failed {
            // An ended session keeps running until the service drains it.
            debug!("All recognize stream handles dropped; waiting for drain");
            return;
        }

        debug!("All recognize stream handles dropped");
        self.fail_pending(StreamError::Closed);
        if let Some(sink) = &self.sink
            && !self.closed
        {
            sink.close();
        }
    }

    // =========================================================================
    // Write path
    // =========================================================================

    /// Hand queued chunks to the transport, one at a time, while the
    /// service is listening and no earlier write is waiting on backpressure.
    fn pump(&mut self) {
        while self.in_flight.is_none() && self.listening && !self.closed && !self.failed {
            let Some(write) = self.pending.pop_front() else {
                break;
            };
            let Some(sink) = &self.sink else {
                self.pending.push_front(write);
                break;
            };

            let len = write.chunk.len();
            match sink.send(Frame::Binary(write.chunk)) {
                Ok(()) => {
                    debug!("Sent {} bytes of audio", len);
                    if sink.buffered_amount() <= self.config.high_water_mark {
                        let _ = write.ack.send(Ok(()));
                    } else {
                        self.in_flight = Some(write.ack);
                    }
                }
                Err(e) => {
                    warn!("Failed to send audio: {}", e);
                    let _ = write.ack.send(Err(e));
                }
            }
        }

        if self.finish_pending && self.pending.is_empty() && self.in_flight.is_none() {
            self.finish();
        }
    }

    /// Complete the in-flight write once buffered bytes are at or below the
    /// high-water mark.
    fn poll_backpressure(&mut self) {
        let Some(sink) = &self.sink else {
            return;
        };
        if sink.buffered_amount() > self.config.high_water_mark {
            return;
        }
        if let Some(ack) = self.in_flight.take() {
            let _ = ack.send(Ok(()));
            self.pump();
        }
    }

    fn fail_pending(&mut self, err: StreamError) {
        for write in self.pending.drain(..) {
            let _ = write.ack.send(Err(err.clone()));
        }
        if let Some(ack) = self.in_flight.take() {
            let _ = ack.send(Err(err));
        }
    }

    fn send_control(&self, message: &ClientMessage) {
        let Some(sink) = &self.sink else {
            return;
        };
        let result = message.to_json().and_then(|json| {
            debug!("Sending control message: {}", json);
            sink.send(Frame::Text(json))
        });
        if let Err(e) = result {
            self.emit(StreamEvent::Error(e));
        }
    }

    // =========================================================================
    // Transport events
    // =========================================================================

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Text(text) => self.dispatch(&text),
            TransportEvent::Binary(data) => {
                warn!("Unexpected binary message ({} bytes)", data.len());
                self.emit(StreamEvent::Error(StreamError::UnexpectedBinary {
                    len: data.len(),
                }));
            }
            TransportEvent::Error(message) => self.on_error(message),
            TransportEvent::Close { code, reason } => self.on_close(code, reason),
        }
    }

    fn on_open(&mut self) {
        if self.aborted || self.failed {
            if let Some(sink) = &self.sink {
                sink.close();
            }
            return;
        }
        if self.connected {
            warn!("Ignoring duplicate open notification");
            return;
        }

        let content_type = self
            .config
            .content_type
            .clone()
            .unwrap_or_else(|| self.config.default_content_type.clone());
        let start = ClientMessage::Start(self.config.start_params(&content_type));
        self.send_control(&start);
        self.connected = true;
        info!("Recognize session connected ({})", content_type);
        self.emit(StreamEvent::Connect);

        if self.stop_pending {
            self.stop_pending = false;
            self.send_control(&ClientMessage::Stop);
        }
    }

    /// A transport error ends the session whether or not a close follows.
    fn on_error(&mut self, message: String) {
        error!("Recognize transport error: {}", message);
        self.listening = false;
        self.emit(StreamEvent::Error(StreamError::Transport(message)));

        if self.closed || self.failed {
            return;
        }
        self.failed = true;
        self.finished = true;
        self.finish_pending = false;
        self.stop_pending = false;
        self.fail_pending(StreamError::Closed);
        self.end_output();
        if let Some(sink) = &self.sink {
            sink.close();
        }
    }

    fn on_close(&mut self, code: u16, reason: String) {
        if self.closed {
            debug!("Ignoring repeated close notification ({})", code);
            return;
        }
        info!("Recognize transport closed: {} {}", code, reason);
        self.closed = true;
        self.sink = None;
        self.emit(StreamEvent::Close { code, reason });

        if self.listening {
            debug!("Transport closed while listening; ending output");
            self.listening = false;
        }
        self.end_output();
        self.fail_pending(StreamError::Closed);
    }

    /// Decode one inbound text frame and raise the matching events.
    fn dispatch(&mut self, text: &str) {
        debug!("Received text message: {}", text);

        let payload = match ServerMessage::decode(text) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to parse recognize message: {}", e);
                self.emit(StreamEvent::Error(e));
                return;
            }
        };

        let message = ServerMessage::from_value(&payload, text);
        self.emit(StreamEvent::Message(payload));

        match message {
            Ok(ServerMessage::ErrorNotice { error }) => {
                warn!("Service reported error: {}", error);
                self.emit(StreamEvent::Error(StreamError::Service {
                    message: error,
                    raw: text.to_string(),
                }));
            }
            Ok(ServerMessage::ListeningState { .. }) => self.on_listening(),
            Ok(ServerMessage::ResultsUpdate { results, .. }) => {
                self.emit(StreamEvent::Results(results.clone()));
                for result in results {
                    let transcript = if result.is_final {
                        result.best_transcript().map(str::to_owned)
                    } else {
                        None
                    };
                    self.emit(StreamEvent::Result(result));
                    if let Some(transcript) = transcript {
                        self.push_output(transcript);
                    }
                }
            }
            Err(e) => {
                warn!("{}", e);
                self.emit(StreamEvent::Error(e));
            }
        }
    }

    fn on_listening(&mut self) {
        if self.output.is_none() {
            debug!("Ignoring listening report after output ended");
            return;
        }

        if !self.listening {
            info!("Recognize service is listening");
            self.listening = true;
            self.emit(StreamEvent::Listening);
            self.pump();
        } else {
            info!("Recognize service drained; ending session");
            self.listening = false;
            self.end_output();
            if let Some(sink) = &self.sink {
                sink.close();
            }
        }
    }

    // =========================================================================
    // Output
    // =========================================================================

    fn push_output(&self, transcript: String) {
        if self.config.read_mode == ReadMode::EventsOnly {
            return;
        }
        if let Some(output) = &self.output
            && output.send(transcript).is_err()
        {
            debug!("Transcript dropped - reader gone");
        }
    }

    fn end_output(&mut self) {
        if self.output.take().is_some() {
            debug!("Transcript output ended");
        }
    }

    fn emit(&self, event: StreamEvent) {
        if let StreamEvent::Error(e) = &event
            && self.events.receiver_count() == 0
        {
            error!("Recognize stream error but no subscriber: {}", e);
        }
        let _ = self.events.send(event);
    }
}

async fn next_transport_event(
    events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}
