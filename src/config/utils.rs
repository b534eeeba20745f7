use crate::core::stt::StreamError;

/// Parse a boolean value from a string, supporting multiple formats
///
/// Accepts: "true", "false", "1", "0", "yes", "no" (case insensitive)
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Parse a named environment value, reporting the variable on failure
pub(super) fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, StreamError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| StreamError::ConfigurationError(format!("Invalid {name} '{value}': {e}")))
}

/// Parse a named boolean environment value
pub(super) fn parse_env_bool(name: &str, value: &str) -> Result<bool, StreamError> {
    parse_bool(value.trim()).ok_or_else(|| {
        StreamError::ConfigurationError(format!(
            "Invalid {name} '{value}': expected true/false, 1/0 or yes/no"
        ))
    })
}
