//! WebSocket message types for the recognize protocol.
//!
//! - **Outgoing messages** (text frames): [`ClientMessage::Start`] once at
//!   connection open and [`ClientMessage::Stop`] once at end of audio.
//!   Audio itself travels as raw binary frames, exactly as supplied.
//!
//! - **Incoming messages** (text frames only):
//!
//! | JSON shape | Variant |
//! |------------|---------|
//! | `{"error": ...}` | [`ServerMessage::ErrorNotice`] |
//! | `{"state": "listening"}` | [`ServerMessage::ListeningState`] |
//! | `{"results": [...]}` | [`ServerMessage::ResultsUpdate`] |

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::stt::base::StreamError;

// =============================================================================
// Outgoing Messages (Client to Server)
// =============================================================================

/// Parameters of the opening handshake.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartParams {
    #[serde(rename = "content-type")]
    pub content_type: String,
    pub continuous: bool,
    pub interim_results: bool,
    pub word_confidence: bool,
    pub timestamps: bool,
    pub max_alternatives: u32,
    pub inactivity_timeout: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_alternatives_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profanity_filter: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smart_formatting: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_labels: Option<bool>,
}

impl Default for StartParams {
    fn default() -> Self {
        Self {
            content_type: "audio/wav".to_string(),
            continuous: true,
            interim_results: true,
            word_confidence: true,
            timestamps: true,
            max_alternatives: 3,
            inactivity_timeout: 30,
            keywords: None,
            keywords_threshold: None,
            word_alternatives_threshold: None,
            profanity_filter: None,
            smart_formatting: None,
            speaker_labels: None,
        }
    }
}

/// Text commands sent to the service.
///
/// ```rust
/// use recognize_stream::core::stt::recognize::ClientMessage;
///
/// let json = ClientMessage::Stop.to_json().unwrap();
/// assert_eq!(json, r#"{"action":"stop"}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientMessage {
    Start(StartParams),
    Stop,
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, StreamError> {
        serde_json::to_string(self).map_err(|e| {
            StreamError::ConfigurationError(format!("Failed to encode client message: {e}"))
        })
    }
}

// =============================================================================
// Incoming Messages (Server to Client)
// =============================================================================

/// One hypothesis for a result.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Alternative {
    pub transcript: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    /// `[word, start_seconds, end_seconds]` per word.
    #[serde(default)]
    pub timestamps: Option<Vec<(String, f64, f64)>>,
    /// `[word, confidence]` per word.
    #[serde(default)]
    pub word_confidence: Option<Vec<(String, f64)>>,
}

/// A recognition result, interim or final.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecognitionResult {
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
    #[serde(rename = "final", default)]
    pub is_final: bool,
    #[serde(default)]
    pub keywords_result: Option<Value>,
    #[serde(default)]
    pub word_alternatives: Option<Value>,
}

impl RecognitionResult {
    /// Transcript of the first (best) alternative.
    #[inline]
    pub fn best_transcript(&self) -> Option<&str> {
        self.alternatives.first().map(|alt| alt.transcript.as_str())
    }
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    ListeningState {
        listening: bool,
    },
    ResultsUpdate {
        result_index: Option<u64>,
        results: Vec<RecognitionResult>,
    },
    ErrorNotice {
        error: String,
    },
}

impl ServerMessage {
    /// Parse raw frame text into JSON.
    pub fn decode(text: &str) -> Result<Value, StreamError> {
        serde_json::from_str(text).map_err(|e| StreamError::MalformedMessage {
            raw: text.to_string(),
            reason: e.to_string(),
        })
    }

    /// Classify a decoded payload.
    ///
    /// An `error` field wins over everything else, then a listening state,
    /// then a results array. `raw` is carried into errors for diagnosis.
    pub fn from_value(payload: &Value, raw: &str) -> Result<Self, StreamError> {
        let unrecognized = || StreamError::UnrecognizedMessage {
            raw: raw.to_string(),
        };

        let Some(object) = payload.as_object() else {
            return Err(unrecognized());
        };

        if let Some(error) = object.get("error") {
            let error = match error {
                Value::String(message) => message.clone(),
                other => other.to_string(),
            };
            return Ok(Self::ErrorNotice { error });
        }

        if let Some(state) = object.get("state") {
            return match state.as_str() {
                Some("listening") => Ok(Self::ListeningState { listening: true }),
                _ => Err(unrecognized()),
            };
        }

        if let Some(results) = object.get("results")
            && results.is_array()
        {
            let results = Vec::<RecognitionResult>::deserialize(results).map_err(|e| {
                StreamError::MalformedMessage {
                    raw: raw.to_string(),
                    reason: e.to_string(),
                }
            })?;
            let result_index = object.get("result_index").and_then(Value::as_u64);
            return Ok(Self::ResultsUpdate {
                result_index,
                results,
            });
        }

        Err(unrecognized())
    }

    /// Decode and classify in one step.
    pub fn parse(text: &str) -> Result<Self, StreamError> {
        let payload = Self::decode(text)?;
        Self::from_value(&payload, text)
    }
}
