//! Configuration types for the recognize WebSocket session.
//!
//! This module contains:
//! - The per-session configuration record and its defaults
//! - Option alias normalization (performed once, at deserialization)
//! - WebSocket URL construction with the query-parameter allow-list
//! - Opening handshake construction

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use url::{Url, form_urlencoded};

use super::messages::StartParams;
use crate::core::stt::base::StreamError;

/// Default service endpoint (HTTP form; upgraded to the socket scheme).
pub const DEFAULT_URL: &str = "https://stream.watsonplatform.net/speech-to-text/api";

/// Default voice model.
pub const DEFAULT_MODEL: &str = "en-US_BroadbandModel";

/// Content type used when none is configured and inference fails.
pub const DEFAULT_CONTENT_TYPE: &str = "audio/wav";

/// Default buffered-byte threshold for write backpressure.
pub const DEFAULT_HIGH_WATER_MARK: usize = 16 * 1024;

/// Default backpressure poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 20;

/// Default capacity of the side-channel event buffer.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Path appended to the base endpoint.
const RECOGNIZE_PATH: &str = "/v1/recognize";

/// Name of the token query parameter. Its value is sent verbatim.
const TOKEN_PARAM: &str = "watson-token";

/// How finalized transcripts are consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadMode {
    /// Finalized transcripts are buffered on the readable side.
    #[default]
    Transcripts,
    /// Only side-channel events are consumed; transcripts are not buffered.
    EventsOnly,
}

/// Configuration for one recognize session.
///
/// Historical spellings of options are accepted as serde aliases, so
/// every alias is mapped to its canonical field exactly once, when the
/// configuration is built.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RecognizeConfig {
    /// Base endpoint. `http`/`https` are upgraded to `ws`/`wss`.
    #[serde(alias = "base_url")]
    pub url: String,

    /// Auth token, appended to the URL without percent-encoding.
    #[serde(alias = "watson-token", alias = "watson_token")]
    pub token: Option<String>,

    /// Extra headers sent with the WebSocket upgrade request.
    pub headers: BTreeMap<String, String>,

    /// Voice model identifier.
    pub model: String,

    pub customization_id: Option<String>,
    pub acoustic_customization_id: Option<String>,
    pub base_model_version: Option<String>,

    #[serde(alias = "x-watson-learning-opt-out", alias = "X-Watson-Learning-Opt-Out")]
    pub learning_opt_out: Option<bool>,

    /// Audio content type. Inferred from the first chunk when absent.
    #[serde(rename = "content-type", alias = "content_type", alias = "contentType")]
    pub content_type: Option<String>,

    /// Content type used when inference does not recognize the audio.
    pub default_content_type: String,

    pub continuous: Option<bool>,
    #[serde(alias = "interimResults")]
    pub interim_results: Option<bool>,
    #[serde(alias = "wordConfidence")]
    pub word_confidence: Option<bool>,
    pub timestamps: Option<bool>,
    #[serde(alias = "maxAlternatives")]
    pub max_alternatives: Option<u32>,
    /// Seconds of silence before the service closes the session (-1 = never).
    #[serde(alias = "inactivityTimeout")]
    pub inactivity_timeout: Option<i64>,
    pub keywords: Option<Vec<String>>,
    #[serde(alias = "keywordsThreshold")]
    pub keywords_threshold: Option<f64>,
    #[serde(alias = "wordAlternativesThreshold")]
    pub word_alternatives_threshold: Option<f64>,
    pub profanity_filter: Option<bool>,
    pub smart_formatting: Option<bool>,
    pub speaker_labels: Option<bool>,

    /// Writes complete once the transport buffers at most this many bytes.
    #[serde(alias = "highWaterMark")]
    pub high_water_mark: usize,

    /// How often buffered bytes are re-checked while a write waits.
    pub poll_interval_ms: u64,

    pub read_mode: ReadMode,

    /// Capacity of the side-channel event buffer per subscriber.
    pub event_capacity: usize,
}

impl Default for RecognizeConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            token: None,
            headers: BTreeMap::new(),
            model: DEFAULT_MODEL.to_string(),
            customization_id: None,
            acoustic_customization_id: None,
            base_model_version: None,
            learning_opt_out: None,
            content_type: None,
            default_content_type: DEFAULT_CONTENT_TYPE.to_string(),
            continuous: None,
            interim_results: None,
            word_confidence: None,
            timestamps: None,
            max_alternatives: None,
            inactivity_timeout: None,
            keywords: None,
            keywords_threshold: None,
            word_alternatives_threshold: None,
            profanity_filter: None,
            smart_formatting: None,
            speaker_labels: None,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            read_mode: ReadMode::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl RecognizeConfig {
    /// Validate the configuration.
    ///
    /// Checks that:
    /// - The endpoint parses and uses an http(s) or ws(s) scheme
    /// - The model is not empty
    /// - `max_alternatives` is at least 1 if set
    /// - The poll interval and event capacity are non-zero
    pub fn validate(&self) -> Result<(), StreamError> {
        self.socket_base_url()?;

        if self.model.is_empty() {
            return Err(StreamError::ConfigurationError(
                "Model is required".to_string(),
            ));
        }

        if let Some(max_alternatives) = self.max_alternatives
            && max_alternatives == 0
        {
            return Err(StreamError::ConfigurationError(
                "max_alternatives must be at least 1".to_string(),
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(StreamError::ConfigurationError(
                "poll_interval_ms must be positive".to_string(),
            ));
        }

        if self.event_capacity == 0 {
            return Err(StreamError::ConfigurationError(
                "event_capacity must be positive".to_string(),
            ));
        }

        Ok(())
    }

    #[inline]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Base endpoint with the scheme upgraded to the socket scheme.
    fn socket_base_url(&self) -> Result<String, StreamError> {
        let base = self.url.trim_end_matches('/');
        let upgraded = match base.strip_prefix("http") {
            Some(rest) => format!("ws{rest}"),
            None => base.to_string(),
        };

        let parsed = Url::parse(&upgraded)
            .map_err(|e| StreamError::ConfigurationError(format!("Invalid URL '{}': {e}", self.url)))?;
        match parsed.scheme() {
            "ws" | "wss" => Ok(upgraded),
            scheme => Err(StreamError::ConfigurationError(format!(
                "Unsupported URL scheme: {scheme}"
            ))),
        }
    }

    /// Build the WebSocket URL with the allow-listed query parameters.
    ///
    /// Every value is percent-encoded except the token, which the service
    /// requires verbatim.
    ///
    /// # Example URL
    ///
    /// ```text
    /// wss://stream.watsonplatform.net/speech-to-text/api/v1/recognize?model=en-US_BroadbandModel&watson-token=xxx
    /// ```
    pub fn build_websocket_url(&self) -> Result<String, StreamError> {
        let mut url = String::with_capacity(256);
        url.push_str(&self.socket_base_url()?);
        url.push_str(RECOGNIZE_PATH);

        let mut query = form_urlencoded::Serializer::new(String::new());
        query.append_pair("model", &self.model);
        if let Some(id) = &self.customization_id {
            query.append_pair("customization_id", id);
        }
        if let Some(id) = &self.acoustic_customization_id {
            query.append_pair("acoustic_customization_id", id);
        }
        if let Some(version) = &self.base_model_version {
            query.append_pair("base_model_version", version);
        }
        if let Some(opt_out) = self.learning_opt_out {
            query.append_pair("x-watson-learning-opt-out", &opt_out.to_string());
        }
        let encoded = query.finish();

        url.push('?');
        url.push_str(&encoded);

        if let Some(token) = &self.token {
            url.push('&');
            url.push_str(TOKEN_PARAM);
            url.push('=');
            url.push_str(token);
        }

        Ok(url)
    }

    /// Headers for the upgrade request.
    pub fn transport_headers(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Opening handshake parameters: protocol defaults overlaid with the
    /// caller's allow-listed overrides.
    pub fn start_params(&self, content_type: &str) -> StartParams {
        let defaults = StartParams::default();
        StartParams {
            content_type: content_type.to_string(),
            continuous: self.continuous.unwrap_or(defaults.continuous),
            interim_results: self.interim_results.unwrap_or(defaults.interim_results),
            word_confidence: self.word_confidence.unwrap_or(defaults.word_confidence),
            timestamps: self.timestamps.unwrap_or(defaults.timestamps),
            max_alternatives: self.max_alternatives.unwrap_or(defaults.max_alternatives),
            inactivity_timeout: self.inactivity_timeout.unwrap_or(defaults.inactivity_timeout),
            keywords: self.keywords.clone(),
            keywords_threshold: self.keywords_threshold,
            word_alternatives_threshold: self.word_alternatives_threshold,
            profanity_filter: self.profanity_filter,
            smart_formatting: self.smart_formatting,
            speaker_labels: self.speaker_labels,
        }
    }
}
