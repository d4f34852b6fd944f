//! RSS reader backends.
//!
//! The decision engine never talks HTTP itself. It consumes the
//! [`ArticleSource`] capability, which each supported reader implements once:
//!
//! | Backend | Module | API |
//! |---------|--------|-----|
//! | Tiny Tiny RSS | [`ttrss`] | JSON-RPC style `POST /api/` with a session id |
//! | Miniflux | [`miniflux`] | REST `/v1/*` with an `X-Auth-Token` header |
//!
//! [`Backend`] picks the concrete client from configuration at startup and
//! forwards every call to it. The companion tools use two further capabilities,
//! [`FeedDirectory`] and [`StarredSource`], which stay out of the engine's way.

pub mod miniflux;
#[cfg(test)]
pub(crate) mod mock_http;
pub mod retry;
pub mod ttrss;

use std::time::Duration;
use tracing::{info, instrument};

use crate::config::{BackendConfig, BackendKind};
use crate::error::BackendError;
use crate::models::{Article, ArticleId, Feed, FeedId};
use miniflux::MinifluxClient;
use retry::RetryPolicy;
use ttrss::TtrssClient;

/// What the decision engine needs from an RSS reader.
pub trait ArticleSource {
    /// Identifiers of every subscribed feed.
    async fn list_feeds(&self) -> Result<Vec<FeedId>, BackendError>;

    /// Unread articles of a feed, oldest first.
    async fn fetch_unread(&self, feed: FeedId) -> Result<Vec<Article>, BackendError>;

    /// Up to `limit` most recent articles of a feed, read or unread, newest first.
    async fn fetch_recent(&self, feed: FeedId, limit: usize) -> Result<Vec<Article>, BackendError> {
        self.fetch_recent_from(feed, 0, limit).await
    }

    /// Like [`fetch_recent`](Self::fetch_recent), skipping the `offset` newest articles.
    async fn fetch_recent_from(
        &self,
        feed: FeedId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Article>, BackendError>;

    async fn mark_read(&self, id: ArticleId) -> Result<(), BackendError>;

    async fn star(&self, id: ArticleId) -> Result<(), BackendError>;
}

/// Feed metadata for the list-feeds tool.
pub trait FeedDirectory {
    async fn feed_details(&self) -> Result<Vec<Feed>, BackendError>;
}

/// Starred articles for the unstar tool.
pub trait StarredSource {
    /// Up to `limit` starred articles, newest first.
    async fn fetch_starred(&self, limit: usize) -> Result<Vec<Article>, BackendError>;

    async fn unstar(&self, id: ArticleId) -> Result<(), BackendError>;
}

/// The reader selected by configuration.
#[derive(Debug)]
pub enum Backend {
    TinyTinyRss(TtrssClient),
    Miniflux(MinifluxClient),
}

impl Backend {
    /// Build the configured client and authenticate against the reader.
    #[instrument(level = "info", skip_all, fields(kind = ?config.kind, hostname = %config.hostname))]
    pub async fn connect(config: &BackendConfig) -> Result<Self, BackendError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let retry = RetryPolicy::new(config.retries, Duration::from_secs(1));

        let backend = match config.kind {
            BackendKind::Ttrss => {
                let client = TtrssClient::new(
                    &config.hostname,
                    config.username.as_deref().unwrap_or_default(),
                    config.password.as_deref().unwrap_or_default(),
                    timeout,
                    retry,
                )?;
                client.login().await?;
                Backend::TinyTinyRss(client)
            }
            BackendKind::Miniflux => {
                let client = MinifluxClient::new(
                    &config.hostname,
                    config.api_token.as_deref().unwrap_or_default(),
                    timeout,
                    retry,
                )?;
                client.check_auth().await?;
                Backend::Miniflux(client)
            }
        };

        info!("Connected to backend");
        Ok(backend)
    }
}

impl ArticleSource for Backend {
    async fn list_feeds(&self) -> Result<Vec<FeedId>, BackendError> {
        match self {
            Backend::TinyTinyRss(c) => c.list_feeds().await,
            Backend::Miniflux(c) => c.list_feeds().await,
        }
    }

    async fn fetch_unread(&self, feed: FeedId) -> Result<Vec<Article>, BackendError> {
        match self {
            Backend::TinyTinyRss(c) => c.fetch_unread(feed).await,
            Backend::Miniflux(c) => c.fetch_unread(feed).await,
        }
    }

    async fn fetch_recent_from(
        &self,
        feed: FeedId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Article>, BackendError> {
        match self {
            Backend::TinyTinyRss(c) => c.fetch_recent_from(feed, offset, limit).await,
            Backend::Miniflux(c) => c.fetch_recent_from(feed, offset, limit).await,
        }
    }

    async fn mark_read(&self, id: ArticleId) -> Result<(), BackendError> {
        match self {
            Backend::TinyTinyRss(c) => c.mark_read(id).await,
            Backend::Miniflux(c) => c.mark_read(id).await,
        }
    }

    async fn star(&self, id: ArticleId) -> Result<(), BackendError> {
        match self {
            Backend::TinyTinyRss(c) => c.star(id).await,
            Backend::Miniflux(c) => c.star(id).await,
        }
    }
}

impl FeedDirectory for Backend {
    async fn feed_details(&self) -> Result<Vec<Feed>, BackendError> {
        match self {
            Backend::TinyTinyRss(c) => c.feed_details().await,
            Backend::Miniflux(c) => c.feed_details().await,
        }
    }
}

impl StarredSource for Backend {
    async fn fetch_starred(&self, limit: usize) -> Result<Vec<Article>, BackendError> {
        match self {
            Backend::TinyTinyRss(c) => c.fetch_starred(limit).await,
            Backend::Miniflux(c) => c.fetch_starred(limit).await,
        }
    }

    async fn unstar(&self, id: ArticleId) -> Result<(), BackendError> {
        match self {
            Backend::TinyTinyRss(c) => c.unstar(id).await,
            Backend::Miniflux(c) => c.unstar(id).await,
        }
    }
}
