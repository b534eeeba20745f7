//! Configuration loading for recognize sessions
//!
//! A [`RecognizeConfig`] can be built from YAML files and environment
//! variables. Environment variables always override YAML values.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading and overrides
//! - `utils`: Utility functions for configuration parsing
//!
//! # Example
//! ```rust,no_run
//! use recognize_stream::RecognizeConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = RecognizeConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("recognize.yaml");
//! let config = RecognizeConfig::from_file(&config_path)?;
//!
//! println!("Recognizing with model {}", config.model);
//! # Ok(())
//! # }
//! ```

use std::path::Path;

mod env;
mod utils;
mod yaml;

pub use crate::core::stt::RecognizeConfig;
pub use utils::parse_bool;

impl RecognizeConfig {
    /// Load configuration from a YAML file, then apply environment overrides
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, if an
    /// environment variable is malformed, or if the result fails validation.
    pub fn from_file(path: &Path) -> Result<Self, crate::core::stt::StreamError> {
        let _ = dotenvy::dotenv();

        let mut config = Self::from_yaml_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }
}
