use std::path::Path;

use crate::core::stt::{RecognizeConfig, StreamError};

impl RecognizeConfig {
    /// Parse configuration from YAML text
    ///
    /// All fields are optional; missing fields keep their defaults, and
    /// historical option spellings are normalized to canonical fields.
    ///
    /// # Example YAML structure
    /// ```yaml
    /// url: "https://stream.watsonplatform.net/speech-to-text/api"
    /// token: "your-token"
    /// model: "en-US_BroadbandModel"
    /// headers:
    ///   X-Custom-Header: "value"
    /// content-type: "audio/l16; rate=16000"
    /// interim_results: true
    /// max_alternatives: 3
    /// inactivity_timeout: -1
    /// keywords: ["colorado", "tornado"]
    /// keywords_threshold: 0.5
    /// high_water_mark: 16384
    /// read_mode: transcripts
    /// ```
    pub fn from_yaml_str(yaml: &str) -> Result<Self, StreamError> {
        serde_yaml::from_str(yaml)
            .map_err(|e| StreamError::ConfigurationError(format!("Invalid YAML configuration: {e}")))
    }

    /// Load configuration from a YAML file without environment overrides
    pub fn from_yaml_file(path: &Path) -> Result<Self, StreamError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            StreamError::ConfigurationError(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_yaml_str(&contents)
    }
}
