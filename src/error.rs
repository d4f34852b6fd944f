//! Error types for configuration loading and backend communication.
//!
//! Two families of failure exist and they are handled very differently:
//!
//! - [`ConfigError`] is fatal. It is raised while loading the YAML file at
//!   startup and the process exits non-zero before any pass runs.
//! - [`BackendError`] is recoverable. It is raised by a single remote call
//!   and the caller logs it and skips the affected article or feed.

use std::path::PathBuf;
use thiserror::Error;

/// Invalid or missing configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("could not read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid YAML for the expected schema.
    #[error("could not parse configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A setting required by the selected backend is absent or empty.
    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    /// A setting is present but outside its allowed range.
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Failure of a single call to the RSS reader.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Transport-level failure from reqwest (DNS, connect, timeout, body).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status code.
    #[error("{url} returned HTTP {status}")]
    Status { status: u16, url: String },

    /// The API answered but reported an error for the operation.
    #[error("{op} failed: {message}")]
    Api { op: &'static str, message: String },

    /// Credentials were rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The session expired and must be re-established.
    #[error("not logged in")]
    NotLoggedIn,

    /// The response body did not have the expected shape.
    #[error("could not decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl BackendError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            BackendError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_errors_classified_by_code() {
        let unavailable = BackendError::Status {
            status: 503,
            url: "https://rss.example.org/v1/feeds".to_string(),
        };
        let throttled = BackendError::Status {
            status: 429,
            url: "https://rss.example.org/v1/feeds".to_string(),
        };
        let missing = BackendError::Status {
            status: 404,
            url: "https://rss.example.org/v1/feeds".to_string(),
        };
        assert!(unavailable.is_transient());
        assert!(throttled.is_transient());
        assert!(!missing.is_transient());
    }

    #[test]
    fn test_api_and_auth_errors_are_not_retried() {
        let api = BackendError::Api {
            op: "updateArticle",
            message: "INCORRECT_USAGE".to_string(),
        };
        assert!(!api.is_transient());
        assert!(!BackendError::Auth("bad token".to_string()).is_transient());
        assert!(!BackendError::NotLoggedIn.is_transient());
    }

    #[test]
    fn test_config_error_messages() {
        let e = ConfigError::Invalid {
            field: "ratio",
            reason: "must be between 0 and 100, got 120".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "invalid setting `ratio`: must be between 0 and 100, got 120"
        );
        assert_eq!(
            ConfigError::Missing("backend.api_token").to_string(),
            "missing required setting `backend.api_token`"
        );
    }
}
