use std::env;

use super::utils::{parse_env, parse_env_bool};
use crate::core::stt::{RecognizeConfig, StreamError};

impl RecognizeConfig {
    /// Load configuration from environment variables
    ///
    /// Starts from the defaults and applies `RECOGNIZE_*` variables.
    /// Also loads from .env file if present using dotenvy.
    ///
    /// # Errors
    /// Returns an error if a variable is malformed or the resulting
    /// configuration fails validation.
    pub fn from_env() -> Result<Self, StreamError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields with any `RECOGNIZE_*` environment variables that are set
    pub fn apply_env_overrides(&mut self) -> Result<(), StreamError> {
        if let Ok(url) = env::var("RECOGNIZE_URL") {
            self.url = url;
        }
        if let Ok(token) = env::var("RECOGNIZE_TOKEN") {
            self.token = Some(token);
        }
        if let Ok(model) = env::var("RECOGNIZE_MODEL") {
            self.model = model;
        }
        if let Ok(content_type) = env::var("RECOGNIZE_CONTENT_TYPE") {
            self.content_type = Some(content_type);
        }
        if let Ok(value) = env::var("RECOGNIZE_INTERIM_RESULTS") {
            self.interim_results = Some(parse_env_bool("RECOGNIZE_INTERIM_RESULTS", &value)?);
        }
        if let Ok(value) = env::var("RECOGNIZE_CONTINUOUS") {
            self.continuous = Some(parse_env_bool("RECOGNIZE_CONTINUOUS", &value)?);
        }
        if let Ok(value) = env::var("RECOGNIZE_INACTIVITY_TIMEOUT") {
            self.inactivity_timeout = Some(parse_env("RECOGNIZE_INACTIVITY_TIMEOUT", &value)?);
        }
        if let Ok(value) = env::var("RECOGNIZE_HIGH_WATER_MARK") {
            self.high_water_mark = parse_env("RECOGNIZE_HIGH_WATER_MARK", &value)?;
        }
        Ok(())
    }
}
