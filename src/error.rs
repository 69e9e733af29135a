//! Error types for model drivers.

use std::time::Duration;

/// Maximum length of a vendor error body kept in an error message.
const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Errors that can occur while running a model driver.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// No API key was provided and the environment variable is unset.
    #[error("missing API key for {driver}: set {env_var} in environment")]
    MissingApiKey {
        /// Registry name of the driver.
        driver: &'static str,
        /// Environment variable the key is read from.
        env_var: &'static str,
    },

    /// API key rejected by the vendor.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Vendor returned an error response.
    #[error("API error: {status} - {message}")]
    Api {
        /// HTTP status code (0 when the error came inside a 2xx envelope).
        status: u16,
        /// Vendor message or response body.
        message: String,
    },

    /// Rate limit exceeded.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Suggested delay before retrying, if the vendor sent one.
        retry_after: Option<Duration>,
    },

    /// Task polling exceeded its wall-clock budget.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Asynchronous task reached a terminal failure or cancel status.
    #[error("task {task_id} {status}: {message}")]
    TaskFailed {
        /// Vendor task identifier.
        task_id: String,
        /// Terminal status as reported by the vendor.
        status: String,
        /// Failure reason.
        message: String,
    },

    /// Download URL expired before download.
    #[error("download URL expired")]
    UrlExpired,

    /// Content was blocked by safety filters.
    #[error("content blocked: {0}")]
    ContentBlocked(String),

    /// Invalid request parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The driver does not support the requested model.
    #[error("{driver} driver: model \"{model}\" not supported")]
    UnsupportedModel {
        /// Registry name of the driver.
        driver: &'static str,
        /// Requested model identifier.
        model: String,
    },

    /// No driver is registered under this name.
    #[error("unknown driver: {0}")]
    UnknownDriver(String),

    /// Driver not available (feature not enabled).
    #[error("driver not available: {0}")]
    ProviderNotAvailable(String),

    /// Account has no credits or billing is disabled.
    #[error("billing error: {0}")]
    Billing(String),

    /// Response did not have the expected shape.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Network or HTTP error.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Failed to decode base64 data.
    #[error("failed to decode: {0}")]
    Decode(String),

    /// I/O error (e.g., saving file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DriverError {
    /// Returns true if this error is likely transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_)
        )
    }

    /// Returns the suggested retry delay, if available.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            Self::Timeout(_) => Some(Duration::from_secs(1)),
            Self::Network(_) => Some(Duration::from_secs(2)),
            _ => None,
        }
    }

    /// Returns true if the error was caused by a missing credential.
    pub fn is_missing_api_key(&self) -> bool {
        matches!(self, Self::MissingApiKey { .. })
    }
}

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;

/// Truncates a vendor error body and masks anything that looks like a credential.
pub fn sanitize_error_message(message: &str) -> String {
    let masked: Vec<String> = message
        .split_inclusive(char::is_whitespace)
        .map(mask_token)
        .collect();
    let masked = masked.concat();
    let masked = masked.trim();

    if masked.chars().count() > MAX_ERROR_MESSAGE_LEN {
        let truncated: String = masked.chars().take(MAX_ERROR_MESSAGE_LEN).collect();
        format!("{}...", truncated)
    } else {
        masked.to_string()
    }
}

fn mask_token(word: &str) -> String {
    let token = word.trim_end();
    let trailing = &word[token.len()..];
    let core = token.trim_matches(|c: char| matches!(c, '"' | '\'' | ',' | ';'));

    let looks_secret = core.len() >= 24
        && (core.starts_with("sk-")
            || core.starts_with("AIza")
            || (core.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
                && core.chars().any(|c| c.is_ascii_digit())
                && core.chars().any(|c| c.is_ascii_alphabetic())));

    if looks_secret {
        format!("{}{}", token.replace(core, "[REDACTED]"), trailing)
    } else {
        word.to_string()
    }
}

/// Reads a `Retry-After` header expressed in seconds.
pub fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable() {
        assert!(DriverError::RateLimited { retry_after: None }.is_retryable());
        assert!(DriverError::Timeout(Duration::from_secs(30)).is_retryable());

        assert!(!DriverError::Auth("bad key".into()).is_retryable());
        assert!(!DriverError::ContentBlocked("nsfw".into()).is_retryable());
        assert!(!DriverError::UrlExpired.is_retryable());
        assert!(!DriverError::TaskFailed {
            task_id: "t".into(),
            status: "FAILED".into(),
            message: "boom".into(),
        }
        .is_retryable());
    }

    #[test]
    fn test_retry_after() {
        let rate_limited = DriverError::RateLimited {
            retry_after: Some(Duration::from_secs(60)),
        };
        assert_eq!(rate_limited.retry_after(), Some(Duration::from_secs(60)));

        let timeout = DriverError::Timeout(Duration::from_secs(30));
        assert_eq!(timeout.retry_after(), Some(Duration::from_secs(1)));

        assert_eq!(DriverError::Auth("bad".into()).retry_after(), None);
    }

    #[test]
    fn test_missing_api_key_is_distinguishable() {
        let err = DriverError::MissingApiKey {
            driver: "dashscope",
            env_var: "DASHSCOPE_API_KEY",
        };
        assert!(err.is_missing_api_key());
        assert_eq!(
            err.to_string(),
            "missing API key for dashscope: set DASHSCOPE_API_KEY in environment"
        );
        assert!(!DriverError::Auth("x".into()).is_missing_api_key());
    }

    #[test]
    fn test_error_display() {
        let err = DriverError::Api {
            status: 404,
            message: "Not found".into(),
        };
        assert_eq!(err.to_string(), "API error: 404 - Not found");

        let err = DriverError::TaskFailed {
            task_id: "abc".into(),
            status: "CANCELED".into(),
            message: "user canceled".into(),
        };
        assert_eq!(err.to_string(), "task abc CANCELED: user canceled");
    }

    #[test]
    fn test_sanitize_masks_keys_and_truncates() {
        let msg = "invalid key sk-abcdefghijklmnopqrstuvwxyz123456 provided";
        let clean = sanitize_error_message(msg);
        assert!(!clean.contains("sk-abcdefghijklmnopqrstuvwxyz123456"));
        assert!(clean.contains("[REDACTED]"));
        assert!(clean.starts_with("invalid key"));

        let long = "x ".repeat(600);
        let clean = sanitize_error_message(&long);
        assert!(clean.ends_with("..."));
        assert!(clean.chars().count() <= MAX_ERROR_MESSAGE_LEN + 3);
    }

    #[test]
    fn test_sanitize_keeps_plain_text() {
        assert_eq!(
            sanitize_error_message("  InvalidParameter: size must be 1024*1024 "),
            "InvalidParameter: size must be 1024*1024"
        );
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = reqwest::header::HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(reqwest::header::RETRY_AFTER, "17".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(17));
    }
}
