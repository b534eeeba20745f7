//! Unit tests for the recognize session adapter.
//!
//! Tests are organized into logical sections:
//! - Configuration tests (URL building, aliases, validation, handshake)
//! - Session tests against a scripted in-memory transport

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, timeout};

use super::client::RecognizeStream;
use super::config::{DEFAULT_HIGH_WATER_MARK, ReadMode, RecognizeConfig};
use crate::core::stt::base::{StreamError, StreamEvent};
use crate::core::transport::{
    Frame, Transport, TransportConnection, TransportEvent, TransportRequest, TransportSink,
};

// =============================================================================
// Configuration Tests
// =============================================================================

mod config_tests {
    use super::*;

    #[test]
    fn test_default_url() {
        let config = RecognizeConfig::default();
        let url = config.build_websocket_url().unwrap();
        assert_eq!(
            url,
            "wss://stream.watsonplatform.net/speech-to-text/api/v1/recognize?model=en-US_BroadbandModel"
        );
    }

    #[test]
    fn test_http_scheme_upgrade() {
        let config = RecognizeConfig {
            url: "http://localhost:8080/api/".to_string(),
            ..Default::default()
        };
        let url = config.build_websocket_url().unwrap();
        assert!(url.starts_with("ws://localhost:8080/api/v1/recognize?"));
    }

    #[test]
    fn test_token_is_not_encoded() {
        let config = RecognizeConfig {
            token: Some("abc/def+ghi==".to_string()),
            ..Default::default()
        };
        let url = config.build_websocket_url().unwrap();
        assert!(url.ends_with("&watson-token=abc/def+ghi=="));
    }

    #[test]
    fn test_query_values_are_encoded() {
        let config = RecognizeConfig {
            customization_id: Some("id with space".to_string()),
            learning_opt_out: Some(true),
            ..Default::default()
        };
        let url = config.build_websocket_url().unwrap();
        assert!(url.contains("customization_id=id+with+space"));
        assert!(url.contains("x-watson-learning-opt-out=true"));
        assert!(!url.contains("watson-token"));
    }

    #[test]
    fn test_unlisted_options_stay_out_of_url() {
        let config = RecognizeConfig {
            interim_results: Some(false),
            keywords: Some(vec!["tornado".to_string()]),
            ..Default::default()
        };
        let url = config.build_websocket_url().unwrap();
        assert!(!url.contains("interim_results"));
        assert!(!url.contains("keywords"));
    }

    #[test]
    fn test_invalid_scheme_rejected() {
        let config = RecognizeConfig {
            url: "ftp://example.com".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(StreamError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_validate() {
        assert!(RecognizeConfig::default().validate().is_ok());

        let empty_model = RecognizeConfig {
            model: String::new(),
            ..Default::default()
        };
        assert!(empty_model.validate().is_err());

        let zero_alternatives = RecognizeConfig {
            max_alternatives: Some(0),
            ..Default::default()
        };
        assert!(zero_alternatives.validate().is_err());

        let zero_poll = RecognizeConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(zero_poll.validate().is_err());
    }

    #[test]
    fn test_alias_normalization() {
        let config: RecognizeConfig = serde_json::from_value(serde_json::json!({
            "contentType": "audio/flac",
            "interimResults": false,
            "wordConfidence": false,
            "maxAlternatives": 2,
            "inactivityTimeout": -1,
            "watson-token": "tok",
            "highWaterMark": 1024,
        }))
        .unwrap();

        assert_eq!(config.content_type.as_deref(), Some("audio/flac"));
        assert_eq!(config.interim_results, Some(false));
        assert_eq!(config.word_confidence, Some(false));
        assert_eq!(config.max_alternatives, Some(2));
        assert_eq!(config.inactivity_timeout, Some(-1));
        assert_eq!(config.token.as_deref(), Some("tok"));
        assert_eq!(config.high_water_mark, 1024);
    }

    #[test]
    fn test_canonical_content_type_key() {
        let config: RecognizeConfig =
            serde_json::from_value(serde_json::json!({ "content-type": "audio/mp3" })).unwrap();
        assert_eq!(config.content_type.as_deref(), Some("audio/mp3"));
        assert_eq!(config.high_water_mark, DEFAULT_HIGH_WATER_MARK);
    }

    #[test]
    fn test_start_params_overrides() {
        let config = RecognizeConfig {
            interim_results: Some(false),
            max_alternatives: Some(1),
            smart_formatting: Some(true),
            ..Default::default()
        };
        let params = config.start_params("audio/flac");
        assert_eq!(params.content_type, "audio/flac");
        assert!(!params.interim_results);
        assert_eq!(params.max_alternatives, 1);
        assert!(params.continuous);
        assert_eq!(params.inactivity_timeout, 30);
        assert_eq!(params.smart_formatting, Some(true));
    }

    #[test]
    fn test_transport_headers() {
        let mut config = RecognizeConfig::default();
        config
            .headers
            .insert("X-Custom".to_string(), "value".to_string());
        assert_eq!(
            config.transport_headers(),
            vec![("X-Custom".to_string(), "value".to_string())]
        );
    }
}

// =============================================================================
// Scripted Transport
// =============================================================================

#[derive(Default)]
struct MockState {
    requests: Mutex<Vec<TransportRequest>>,
    frames: Mutex<Vec<Frame>>,
    buffered: AtomicUsize,
    closed: AtomicBool,
    /// Close without ever reporting a `Close` event.
    silent_close: AtomicBool,
    server: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
}

impl MockState {
    fn push(&self, event: TransportEvent) {
        if let Some(server) = self.server.lock().as_ref() {
            let _ = server.send(event);
        }
    }

    fn push_text(&self, text: &str) {
        self.push(TransportEvent::Text(text.to_string()));
    }

    fn listening(&self) {
        self.push_text(r#"{"state":"listening"}"#);
    }

    fn is_open(&self) -> bool {
        self.server.lock().is_some()
    }

    fn frames(&self) -> Vec<Frame> {
        self.frames.lock().clone()
    }

    fn control_messages(&self) -> Vec<Value> {
        self.frames()
            .into_iter()
            .filter_map(|frame| match frame {
                Frame::Text(text) => serde_json::from_str(&text).ok(),
                Frame::Binary(_) => None,
            })
            .collect()
    }

    fn count_action(&self, action: &str) -> usize {
        self.control_messages()
            .iter()
            .filter(|msg| msg["action"] == action)
            .count()
    }

    fn audio(&self) -> Vec<Bytes> {
        self.frames()
            .into_iter()
            .filter_map(|frame| match frame {
                Frame::Binary(data) => Some(data),
                Frame::Text(_) => None,
            })
            .collect()
    }
}

struct MockTransport {
    state: Arc<MockState>,
}

struct MockSink {
    state: Arc<MockState>,
}

impl Transport for MockTransport {
    fn open(&self, request: TransportRequest) -> TransportConnection {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.requests.lock().push(request);
        *self.state.server.lock() = Some(tx);
        TransportConnection {
            sink: Box::new(MockSink {
                state: self.state.clone(),
            }),
            events: rx,
        }
    }
}

impl TransportSink for MockSink {
    fn send(&self, frame: Frame) -> Result<(), StreamError> {
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(StreamError::Closed);
        }
        self.state.frames.lock().push(frame);
        Ok(())
    }

    fn close(&self) {
        if self.state.closed.swap(true, Ordering::SeqCst)
            || self.state.silent_close.load(Ordering::SeqCst)
        {
            return;
        }
        if let Some(server) = self.state.server.lock().take() {
            let _ = server.send(TransportEvent::Close {
                code: 1000,
                reason: String::new(),
            });
        }
    }

    fn buffered_amount(&self) -> usize {
        self.state.buffered.load(Ordering::SeqCst)
    }
}

fn test_config() -> RecognizeConfig {
    RecognizeConfig {
        token: Some("test-token".to_string()),
        poll_interval_ms: 5,
        ..Default::default()
    }
}

fn setup(config: RecognizeConfig) -> (RecognizeStream, Arc<MockState>) {
    let state = Arc::new(MockState::default());
    let transport = Arc::new(MockTransport {
        state: state.clone(),
    });
    let stream = RecognizeStream::new(config, transport).expect("Config should be valid");
    (stream, state)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Condition should hold within timeout");
}

async fn next_event(rx: &mut broadcast::Receiver<StreamEvent>) -> StreamEvent {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("Should receive event within timeout")
        .expect("Event channel should be open")
}

/// Wait for the first event of the given name, skipping others.
async fn wait_for_event(rx: &mut broadcast::Receiver<StreamEvent>, name: &str) -> StreamEvent {
    loop {
        let event = next_event(rx).await;
        if event.name() == name {
            return event;
        }
    }
}

const WAV_HEADER: &[u8] = b"RIFF\x24\x08\x00\x00WAVEfmt ";

/// Open the session with a first write and bring the service to listening.
async fn start_listening(stream: &RecognizeStream, state: &MockState) {
    let write = stream.write(WAV_HEADER);
    let drive = async {
        wait_until(|| state.is_open()).await;
        state.push(TransportEvent::Open);
        state.listening();
    };
    let (result, _) = tokio::join!(write, drive);
    result.expect("First write should succeed");
}

// =============================================================================
// Session Tests
// =============================================================================

mod session_tests {
    use super::*;

    #[tokio::test]
    async fn test_no_connection_before_first_write() {
        let (_stream, state) = setup(test_config());
        sleep(Duration::from_millis(30)).await;
        assert!(state.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_request_url_and_headers() {
        let mut config = test_config();
        config
            .headers
            .insert("X-Custom".to_string(), "value".to_string());
        let (stream, state) = setup(config);

        start_listening(&stream, &state).await;

        let requests = state.requests.lock().clone();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].url.contains("/v1/recognize?model=en-US_BroadbandModel"));
        assert!(requests[0].url.ends_with("&watson-token=test-token"));
        assert_eq!(
            requests[0].headers,
            vec![("X-Custom".to_string(), "value".to_string())]
        );
    }

    #[tokio::test]
    async fn test_handshake_sent_once_after_open() {
        let (stream, state) = setup(test_config());
        let mut events = stream.subscribe();

        let write = stream.write(WAV_HEADER);
        let drive = async {
            wait_until(|| state.is_open()).await;
            sleep(Duration::from_millis(20)).await;
            assert!(state.frames().is_empty(), "Nothing is sent before open");

            state.push(TransportEvent::Open);
            assert!(matches!(next_event(&mut events).await, StreamEvent::Connect));

            state.push(TransportEvent::Open);
            state.listening();
        };
        let (result, _) = tokio::join!(write, drive);
        result.unwrap();

        assert_eq!(state.count_action("start"), 1);
        let start = &state.control_messages()[0];
        assert_eq!(start["action"], "start");
        assert_eq!(start["content-type"], "audio/wav");
        assert_eq!(start["interim_results"], true);
        assert_eq!(start["max_alternatives"], 3);
    }

    #[tokio::test]
    async fn test_no_audio_before_listening() {
        let (stream, state) = setup(test_config());

        let write = stream.write(WAV_HEADER);
        let drive = async {
            wait_until(|| state.is_open()).await;
            state.push(TransportEvent::Open);
            sleep(Duration::from_millis(50)).await;
            assert!(state.audio().is_empty(), "Audio must wait for listening");
            state.listening();
        };
        let (result, _) = tokio::join!(write, drive);
        result.unwrap();

        assert_eq!(state.audio(), vec![Bytes::from_static(WAV_HEADER)]);
    }

    #[tokio::test]
    async fn test_ordered_writes_with_backpressure() {
        let (stream, state) = setup(test_config());
        start_listening(&stream, &state).await;

        state
            .buffered
            .store(DEFAULT_HIGH_WATER_MARK + 1, Ordering::SeqCst);

        let writes = async {
            tokio::join!(
                stream.write(&b"A"[..]),
                stream.write(&b"B"[..]),
                stream.write(&b"C"[..])
            )
        };
        let drain = async {
            wait_until(|| state.audio().len() == 2).await;
            sleep(Duration::from_millis(50)).await;
            assert_eq!(state.audio().len(), 2, "B waits for A to drain");
            state.buffered.store(0, Ordering::SeqCst);
        };
        let ((a, b, c), _) = tokio::join!(writes, drain);
        assert!(a.is_ok() && b.is_ok() && c.is_ok());

        let audio = state.audio();
        assert_eq!(
            &audio[1..],
            &[
                Bytes::from_static(b"A"),
                Bytes::from_static(b"B"),
                Bytes::from_static(b"C")
            ]
        );
    }

    #[tokio::test]
    async fn test_stop_sent_exactly_once() {
        let (stream, state) = setup(test_config());
        start_listening(&stream, &state).await;

        stream.end();
        stream.stop(false);
        stream.finish();

        wait_until(|| state.count_action("stop") >= 1).await;
        sleep(Duration::from_millis(30)).await;
        assert_eq!(state.count_action("stop"), 1);
    }

    #[tokio::test]
    async fn test_stop_follows_queued_audio() {
        let (stream, state) = setup(test_config());

        let write = stream.write(WAV_HEADER);
        let drive = async {
            wait_until(|| state.is_open()).await;
            stream.end();
            state.push(TransportEvent::Open);
            sleep(Duration::from_millis(20)).await;
            assert_eq!(state.count_action("stop"), 0);
            state.listening();
        };
        let (result, _) = tokio::join!(write, drive);
        result.unwrap();

        wait_until(|| state.count_action("stop") == 1).await;
        let frames = state.frames();
        assert_eq!(frames.len(), 3);
        assert!(matches!(frames[1], Frame::Binary(_)));
        assert_eq!(frames[2], Frame::Text(r#"{"action":"stop"}"#.to_string()));
    }

    #[tokio::test]
    async fn test_final_result_and_second_listening() {
        let (mut stream, state) = setup(test_config());
        let transcripts = stream.take_transcripts().unwrap();
        let mut events = stream.subscribe();
        start_listening(&stream, &state).await;
        stream.end();

        state.push_text(
            r#"{"result_index":0,"results":[{"final":true,"alternatives":[{"transcript":"hello world"}]}]}"#,
        );
        state.listening();

        let collected: Vec<String> = timeout(Duration::from_secs(2), transcripts.collect())
            .await
            .expect("Output should end");
        assert_eq!(collected, vec!["hello world".to_string()]);

        match wait_for_event(&mut events, "results").await {
            StreamEvent::Results(results) => assert_eq!(results.len(), 1),
            other => panic!("Expected results, got {other:?}"),
        }
        match wait_for_event(&mut events, "result").await {
            StreamEvent::Result(result) => assert!(result.is_final),
            other => panic!("Expected result, got {other:?}"),
        }
        assert!(matches!(
            wait_for_event(&mut events, "close").await,
            StreamEvent::Close { code: 1000, .. }
        ));
        assert!(state.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_repeated_listening_after_drain_is_ignored() {
        let (mut stream, state) = setup(test_config());
        let mut transcripts = stream.take_transcripts().unwrap();
        let mut events = stream.subscribe();
        start_listening(&stream, &state).await;
        let server = state
            .server
            .lock()
            .clone()
            .expect("Transport should be open");

        stream.end();
        state.push_text(
            r#"{"results":[{"final":true,"alternatives":[{"transcript":"once"}]}]}"#,
        );
        state.listening();
        wait_for_event(&mut events, "close").await;

        server
            .send(TransportEvent::Text(r#"{"state":"listening"}"#.to_string()))
            .unwrap();
        match wait_for_event(&mut events, "message").await {
            StreamEvent::Message(value) => assert_eq!(value["state"], "listening"),
            other => panic!("Expected message, got {other:?}"),
        }
        sleep(Duration::from_millis(20)).await;

        let mut listening = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                StreamEvent::Listening => listening += 1,
                StreamEvent::Error(e) => panic!("Unexpected error: {e}"),
                _ => {}
            }
        }
        assert_eq!(listening, 0);

        assert_eq!(transcripts.next().await.as_deref(), Some("once"));
        assert_eq!(transcripts.next().await, None);
        assert_eq!(transcripts.next().await, None);
        assert_eq!(
            stream.write(&b"late"[..]).await,
            Err(StreamError::WriteAfterEnd)
        );
    }

    #[tokio::test]
    async fn test_interim_result_produces_no_output() {
        let (mut stream, state) = setup(test_config());
        let transcripts = stream.take_transcripts().unwrap();
        let mut events = stream.subscribe();
        start_listening(&stream, &state).await;

        state.push_text(r#"{"results":[{"final":false,"alternatives":[{"transcript":"hel"}]}]}"#);
        match wait_for_event(&mut events, "result").await {
            StreamEvent::Result(result) => {
                assert!(!result.is_final);
                assert_eq!(result.best_transcript(), Some("hel"));
            }
            other => panic!("Expected result, got {other:?}"),
        }

        state.listening();
        let collected: Vec<String> = timeout(Duration::from_secs(2), transcripts.collect())
            .await
            .expect("Output should end");
        assert!(collected.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_message_raises_one_error() {
        let (stream, state) = setup(test_config());
        let mut events = stream.subscribe();
        start_listening(&stream, &state).await;

        state.push_text("{not json");
        match wait_for_event(&mut events, "error").await {
            StreamEvent::Error(StreamError::MalformedMessage { raw, .. }) => {
                assert_eq!(raw, "{not json");
            }
            other => panic!("Expected malformed message error, got {other:?}"),
        }

        sleep(Duration::from_millis(30)).await;
        assert!(!state.closed.load(Ordering::SeqCst));
        while let Ok(event) = events.try_recv() {
            assert_ne!(event.name(), "error");
            assert_ne!(event.name(), "close");
        }

        stream.write(&b"more"[..]).await.unwrap();
    }

    #[tokio::test]
    async fn test_unrecognized_and_service_errors() {
        let (stream, state) = setup(test_config());
        let mut events = stream.subscribe();
        start_listening(&stream, &state).await;

        state.push_text(r#"{"foo":1}"#);
        assert!(matches!(
            wait_for_event(&mut events, "error").await,
            StreamEvent::Error(StreamError::UnrecognizedMessage { .. })
        ));

        state.push_text(r#"{"error":"No speech detected for 30s."}"#);
        match wait_for_event(&mut events, "message").await {
            StreamEvent::Message(value) => assert!(value.get("error").is_some()),
            other => panic!("Expected message, got {other:?}"),
        }
        match wait_for_event(&mut events, "error").await {
            StreamEvent::Error(StreamError::Service { message, .. }) => {
                assert_eq!(message, "No speech detected for 30s.");
            }
            other => panic!("Expected service error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_binary_frame_is_an_error() {
        let (stream, state) = setup(test_config());
        let mut events = stream.subscribe();
        start_listening(&stream, &state).await;

        state.push(TransportEvent::Binary(Bytes::from_static(b"\x00\x01")));
        assert!(matches!(
            wait_for_event(&mut events, "error").await,
            StreamEvent::Error(StreamError::UnexpectedBinary { len: 2 })
        ));
    }

    #[tokio::test]
    async fn test_content_type_fallback_and_override() {
        let config = RecognizeConfig {
            default_content_type: "audio/l16; rate=16000".to_string(),
            ..test_config()
        };
        let (stream, state) = setup(config);
        let write = stream.write(vec![0u8, 1, 2, 3]);
        let drive = async {
            wait_until(|| state.is_open()).await;
            state.push(TransportEvent::Open);
            state.listening();
        };
        let (result, _) = tokio::join!(write, drive);
        result.unwrap();
        assert_eq!(
            state.control_messages()[0]["content-type"],
            "audio/l16; rate=16000"
        );

        let config = RecognizeConfig {
            content_type: Some("audio/mulaw; rate=8000".to_string()),
            ..test_config()
        };
        let (stream, state) = setup(config);
        let write = stream.write(WAV_HEADER);
        let drive = async {
            wait_until(|| state.is_open()).await;
            state.push(TransportEvent::Open);
            state.listening();
        };
        let (result, _) = tokio::join!(write, drive);
        result.unwrap();
        assert_eq!(
            state.control_messages()[0]["content-type"],
            "audio/mulaw; rate=8000"
        );
    }

    #[tokio::test]
    async fn test_write_after_end_is_rejected() {
        let (stream, state) = setup(test_config());
        start_listening(&stream, &state).await;

        stream.end();
        assert_eq!(
            stream.write(&b"late"[..]).await,
            Err(StreamError::WriteAfterEnd)
        );
    }

    #[tokio::test]
    async fn test_finish_without_writes_ends_output() {
        let (mut stream, state) = setup(test_config());
        let transcripts = stream.take_transcripts().unwrap();

        stream.finish();
        let collected: Vec<String> = timeout(Duration::from_secs(2), transcripts.collect())
            .await
            .expect("Output should end");
        assert!(collected.is_empty());
        assert!(state.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_hard_stop_closes_without_stop_message() {
        let (mut stream, state) = setup(test_config());
        let transcripts = stream.take_transcripts().unwrap();
        let mut events = stream.subscribe();
        start_listening(&stream, &state).await;

        state
            .buffered
            .store(DEFAULT_HIGH_WATER_MARK + 1, Ordering::SeqCst);

        let writes = async { tokio::join!(stream.write(&b"A"[..]), stream.write(&b"B"[..])) };
        let stop = async {
            wait_until(|| state.audio().len() == 2).await;
            stream.stop(true);
        };
        let ((a, b), _) = tokio::join!(writes, stop);
        assert!(a.is_ok(), "In-flight chunk already reached the transport");
        assert_eq!(b, Err(StreamError::Closed));

        assert!(matches!(
            wait_for_event(&mut events, "stop").await,
            StreamEvent::Stop
        ));
        wait_for_event(&mut events, "close").await;
        assert!(state.closed.load(Ordering::SeqCst));
        assert_eq!(state.count_action("stop"), 0);

        let collected: Vec<String> = timeout(Duration::from_secs(2), transcripts.collect())
            .await
            .expect("Output should end");
        assert!(collected.is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_then_close() {
        let (mut stream, state) = setup(test_config());
        let transcripts = stream.take_transcripts().unwrap();
        let mut events = stream.subscribe();

        let write = stream.write(WAV_HEADER);
        let drive = async {
            wait_until(|| state.is_open()).await;
            state.push(TransportEvent::Error("connection reset".to_string()));
            state.push(TransportEvent::Close {
                code: 1006,
                reason: String::new(),
            });
        };
        let (result, _) = tokio::join!(write, drive);
        assert_eq!(result, Err(StreamError::Closed));

        assert_eq!(
            match wait_for_event(&mut events, "error").await {
                StreamEvent::Error(e) => e,
                other => panic!("Expected error, got {other:?}"),
            },
            StreamError::Transport("connection reset".to_string())
        );
        assert!(matches!(
            wait_for_event(&mut events, "close").await,
            StreamEvent::Close { code: 1006, .. }
        ));

        let collected: Vec<String> = timeout(Duration::from_secs(2), transcripts.collect())
            .await
            .expect("Output should end");
        assert!(collected.is_empty());
        assert_eq!(
            stream.write(&b"again"[..]).await,
            Err(StreamError::Closed)
        );
    }

    #[tokio::test]
    async fn test_events_only_mode_skips_output() {
        let config = RecognizeConfig {
            read_mode: ReadMode::EventsOnly,
            ..test_config()
        };
        let (mut stream, state) = setup(config);
        let transcripts = stream.take_transcripts().unwrap();
        let mut events = stream.subscribe();
        start_listening(&stream, &state).await;

        state.push_text(r#"{"results":[{"final":true,"alternatives":[{"transcript":"hi"}]}]}"#);
        match wait_for_event(&mut events, "result").await {
            StreamEvent::Result(result) => assert_eq!(result.best_transcript(), Some("hi")),
            other => panic!("Expected result, got {other:?}"),
        }

        state.listening();
        let collected: Vec<String> = timeout(Duration::from_secs(2), transcripts.collect())
            .await
            .expect("Output should end");
        assert!(collected.is_empty());
    }

    #[tokio::test]
    async fn test_dropping_unended_handle_closes_transport() {
        let (mut stream, state) = setup(test_config());
        let transcripts = stream.take_transcripts().unwrap();
        start_listening(&stream, &state).await;

        drop(stream);
        wait_until(|| state.closed.load(Ordering::SeqCst)).await;
        assert_eq!(state.count_action("stop"), 0);

        let collected: Vec<String> = timeout(Duration::from_secs(2), transcripts.collect())
            .await
            .expect("Output should end");
        assert!(collected.is_empty());
    }

    #[tokio::test]
    async fn test_dropping_ended_handle_still_drains() {
        let (mut stream, state) = setup(test_config());
        let transcripts = stream.take_transcripts().unwrap();
        start_listening(&stream, &state).await;

        stream.end();
        wait_until(|| state.count_action("stop") == 1).await;
        drop(stream);

        sleep(Duration::from_millis(30)).await;
        assert!(
            !state.closed.load(Ordering::SeqCst),
            "Transport must stay open until the service drains"
        );

        state.push_text(
            r#"{"results":[{"final":true,"alternatives":[{"transcript":"hello world"}]}]}"#,
        );
        state.listening();

        let collected: Vec<String> = timeout(Duration::from_secs(2), transcripts.collect())
            .await
            .expect("Output should end");
        assert_eq!(collected, vec!["hello world".to_string()]);
        wait_until(|| state.closed.load(Ordering::SeqCst)).await;
    }

    #[tokio::test]
    async fn test_dropping_handle_with_queued_audio_after_end() {
        let (mut stream, state) = setup(test_config());
        let transcripts = stream.take_transcripts().unwrap();

        let write = stream.write(WAV_HEADER);
        let drive = async {
            wait_until(|| state.is_open()).await;
            stream.end();
        };
        tokio::select! {
            _ = write => panic!("Write must wait for listening"),
            _ = drive => {}
        }
        drop(stream);

        state.push(TransportEvent::Open);
        state.listening();
        wait_until(|| state.count_action("stop") == 1).await;
        assert_eq!(state.audio(), vec![Bytes::from_static(WAV_HEADER)]);

        state.push_text(r#"{"results":[{"final":true,"alternatives":[{"transcript":"late"}]}]}"#);
        state.listening();

        let collected: Vec<String> = timeout(Duration::from_secs(2), transcripts.collect())
            .await
            .expect("Output should end");
        assert_eq!(collected, vec!["late".to_string()]);
    }

    #[tokio::test]
    async fn test_transport_error_without_close_ends_session() {
        let (mut stream, state) = setup(test_config());
        let transcripts = stream.take_transcripts().unwrap();
        let mut events = stream.subscribe();
        start_listening(&stream, &state).await;
        state.silent_close.store(true, Ordering::SeqCst);

        state
            .buffered
            .store(DEFAULT_HIGH_WATER_MARK + 1, Ordering::SeqCst);
        let writes = async { tokio::join!(stream.write(&b"A"[..]), stream.write(&b"B"[..])) };
        let fail = async {
            wait_until(|| state.audio().len() == 2).await;
            state.push(TransportEvent::Error("socket reset".to_string()));
        };
        let ((a, b), _) = timeout(Duration::from_secs(2), async { tokio::join!(writes, fail) })
            .await
            .expect("Queued writes must resolve after a transport error");
        assert_eq!(a, Err(StreamError::Closed));
        assert_eq!(b, Err(StreamError::Closed));

        assert!(matches!(
            wait_for_event(&mut events, "error").await,
            StreamEvent::Error(StreamError::Transport(_))
        ));
        assert!(state.closed.load(Ordering::SeqCst));

        let late = timeout(Duration::from_millis(500), stream.write(&b"x"[..]))
            .await
            .expect("Writes after a transport error must not hang");
        assert_eq!(late, Err(StreamError::Closed));

        let collected: Vec<String> = timeout(Duration::from_secs(2), transcripts.collect())
            .await
            .expect("Output should end");
        assert!(collected.is_empty());

        stream.end();
        sleep(Duration::from_millis(20)).await;
        assert_eq!(state.count_action("stop"), 0);
    }

    #[tokio::test]
    async fn test_take_transcripts_once() {
        let (mut stream, _state) = setup(test_config());
        assert!(stream.take_transcripts().is_some());
        assert!(stream.take_transcripts().is_none());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_on_construction() {
        let state = Arc::new(MockState::default());
        let transport = Arc::new(MockTransport { state });
        let config = RecognizeConfig {
            url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            RecognizeStream::new(config, transport),
            Err(StreamError::ConfigurationError(_))
        ));
    }
}
