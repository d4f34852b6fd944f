//! YAML configuration.
//!
//! The file has two sections: `backend` says which reader to talk to and how,
//! `newsdedup` tunes the decision engine and the daemon. Everything in
//! `newsdedup` has a default; the backend section must name a reachable
//! reader and the credentials that reader needs.
//!
//! ```yaml
//! backend:
//!   kind: miniflux
//!   hostname: https://rss.example.org
//!   api_token: "..."
//! newsdedup:
//!   similarity_method: combined
//!   ratio: 80
//!   nostar: [12]
//!   ignore: [3]
//! ```

use serde::Deserialize;
use std::path::Path;
use tracing::{debug, instrument};
use url::Url;

use crate::error::ConfigError;
use crate::models::FeedId;
use crate::similarity::Method;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "newsdedup.yaml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Ttrss,
    Miniflux,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Base URL of the reader, e.g. `https://rss.example.org/tt-rss`.
    pub hostname: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries for transient failures, after the first attempt.
    #[serde(default = "default_retries")]
    pub retries: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupSettings {
    pub similarity_method: Method,
    pub check_urls: bool,
    /// Inclusive similarity threshold, 0-100.
    pub ratio: u8,
    /// Fingerprints remembered per feed.
    pub maxcount: usize,
    /// Seconds between daemon passes.
    pub sleep: u64,
    /// Passes before a feed's learned state is rebuilt from the backend.
    pub learning_retry_interval: u32,
    pub dry_run: bool,
    pub star_duplicates: bool,
    /// Feeds whose duplicates are only marked read.
    pub nostar: Vec<FeedId>,
    /// Feeds never deduplicated.
    pub ignore: Vec<FeedId>,
    pub skip_updated: bool,
    /// Extra query parameters stripped from links before comparison.
    pub tracking_params: Vec<String>,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            similarity_method: Method::TokenSort,
            check_urls: true,
            ratio: 80,
            maxcount: 500,
            sleep: 60,
            learning_retry_interval: 10,
            dry_run: false,
            star_duplicates: true,
            nostar: Vec::new(),
            ignore: Vec::new(),
            skip_updated: true,
            tracking_params: Vec::new(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_retries() -> usize {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub backend: BackendConfig,
    #[serde(default)]
    pub newsdedup: DedupSettings,
}

fn require(value: &Option<String>, field: &'static str) -> Result<(), ConfigError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(()),
        _ => Err(ConfigError::Missing(field)),
    }
}

impl Config {
    /// Read, parse and validate a configuration file.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&text, path)?;
        debug!(
            kind = ?config.backend.kind,
            method = %config.newsdedup.similarity_method,
            ratio = config.newsdedup.ratio,
            maxcount = config.newsdedup.maxcount,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse and validate configuration text. `path` is only used in errors.
    pub fn from_yaml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let b = &self.backend;
        if b.hostname.trim().is_empty() {
            return Err(ConfigError::Missing("backend.hostname"));
        }
        if let Err(e) = Url::parse(b.hostname.trim()) {
            return Err(ConfigError::Invalid {
                field: "backend.hostname",
                reason: format!("{:?} is not a URL: {e}", b.hostname),
            });
        }
        if b.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "backend.timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        match b.kind {
            BackendKind::Ttrss => {
                require(&b.username, "backend.username")?;
                require(&b.password, "backend.password")?;
            }
            BackendKind::Miniflux => require(&b.api_token, "backend.api_token")?,
        }

        let n = &self.newsdedup;
        if n.ratio > 100 {
            return Err(ConfigError::Invalid {
                field: "newsdedup.ratio",
                reason: format!("must be between 0 and 100, got {}", n.ratio),
            });
        }
        if n.maxcount == 0 {
            return Err(ConfigError::Invalid {
                field: "newsdedup.maxcount",
                reason: "must be at least 1".to_string(),
            });
        }
        if n.learning_retry_interval == 0 {
            return Err(ConfigError::Invalid {
                field: "newsdedup.learning_retry_interval",
                reason: "must be at least 1".to_string(),
            });
        }
        if n.sleep == 0 {
            return Err(ConfigError::Invalid {
                field: "newsdedup.sleep",
                reason: "must be at least 1 second".to_string(),
            });
        }
        Ok(())
    }
}
