//! Miniflux client.
//!
//! Talks to the REST API under `{hostname}/v1/` using an API token sent in the
//! `X-Auth-Token` header. Starring is a toggle in Miniflux (`PUT
//! /v1/entries/{id}/bookmark`), so callers must only star entries that are not
//! starred yet, and a toggle is sent exactly once: a retry after a late answer
//! would flip the bookmark back.

use chrono::{DateTime, FixedOffset, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::retry::RetryPolicy;
use crate::error::BackendError;
use crate::models::{Article, ArticleId, Feed, FeedId};

/// Entries requested per page when reading a whole feed.
const PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct EntriesPage {
    #[serde(default)]
    total: usize,
    #[serde(default)]
    entries: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct EntryFeed {
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct Entry {
    id: i64,
    feed_id: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    starred: bool,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    changed_at: Option<String>,
    #[serde(default)]
    feed: Option<EntryFeed>,
}

fn parse_time(s: Option<&str>) -> Option<DateTime<FixedOffset>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
}

impl Entry {
    /// An entry counts as updated when it changed after Miniflux first stored it.
    fn is_updated(&self) -> bool {
        match (
            parse_time(self.created_at.as_deref()),
            parse_time(self.changed_at.as_deref()),
        ) {
            (Some(created), Some(changed)) => changed > created,
            _ => false,
        }
    }
}

impl From<Entry> for Article {
    fn from(e: Entry) -> Self {
        let is_updated = e.is_updated();
        Article {
            id: ArticleId(e.id),
            feed_id: FeedId(e.feed_id),
            feed_title: e.feed.map(|f| f.title).unwrap_or_else(|| "Unknown".to_string()),
            title: e.title,
            link: e.url,
            unread: e.status == "unread",
            starred: e.starred,
            is_updated,
            fetched_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FeedCategory {
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct MinifluxFeed {
    id: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    category: Option<FeedCategory>,
}

#[derive(Debug)]
pub struct MinifluxClient {
    http: Client,
    base: String,
    retry: RetryPolicy,
}

impl MinifluxClient {
    pub fn new(
        hostname: &str,
        api_token: &str,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, BackendError> {
        let mut token = HeaderValue::from_str(api_token)
            .map_err(|_| BackendError::Auth("API token contains invalid characters".to_string()))?;
        token.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert("x-auth-token", token);

        let http = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            http,
            base: format!("{}/v1", hostname.trim_end_matches('/')),
            retry,
        })
    }

    fn check_status(&self, resp: Response) -> Result<Response, BackendError> {
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(BackendError::Auth(format!("Miniflux answered HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                url: resp.url().to_string(),
            });
        }
        Ok(resp)
    }

    async fn get_json_once<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, BackendError> {
        let url = format!("{}{}", self.base, path);
        let resp = self.http.get(&url).query(query).send().await?;
        let resp = self.check_status(resp)?;
        let text = resp.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        op: &'static str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, BackendError> {
        self.retry.run(op, || self.get_json_once(path, query)).await
    }

    async fn put_once(&self, path: &str, body: Option<&serde_json::Value>) -> Result<(), BackendError> {
        let url = format!("{}{}", self.base, path);
        let mut req = self.http.put(&url);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await?;
        self.check_status(resp).map(|_| ())
    }

    async fn put(
        &self,
        op: &'static str,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<(), BackendError> {
        self.retry.run(op, || self.put_once(path, body.as_ref())).await
    }

    /// Verify the API token.
    #[instrument(level = "info", skip_all)]
    pub async fn check_auth(&self) -> Result<(), BackendError> {
        let me: serde_json::Value = self.get_json("me", "/me", &[]).await?;
        info!(
            user = me.get("username").and_then(|u| u.as_str()).unwrap_or("?"),
            "Authenticated against Miniflux"
        );
        Ok(())
    }

    async fn raw_feeds(&self) -> Result<Vec<MinifluxFeed>, BackendError> {
        self.get_json("feeds", "/feeds", &[]).await
    }

    pub async fn list_feeds(&self) -> Result<Vec<FeedId>, BackendError> {
        Ok(self.raw_feeds().await?.into_iter().map(|f| FeedId(f.id)).collect())
    }

    pub async fn feed_details(&self) -> Result<Vec<Feed>, BackendError> {
        Ok(self
            .raw_feeds()
            .await?
            .into_iter()
            .map(|f| Feed {
                id: FeedId(f.id),
                title: f.title,
                category: f.category.map(|c| c.title),
            })
            .collect())
    }

    pub async fn fetch_unread(&self, feed: FeedId) -> Result<Vec<Article>, BackendError> {
        let path = format!("/feeds/{}/entries", feed.0);
        let mut out: Vec<Article> = Vec::new();
        loop {
            let query = [
                ("status", "unread".to_string()),
                ("order", "published_at".to_string()),
                ("direction", "asc".to_string()),
                ("limit", PAGE_SIZE.to_string()),
                ("offset", out.len().to_string()),
            ];
            let page: EntriesPage = self.get_json("entries", &path, &query).await?;
            let got = page.entries.len();
            out.extend(page.entries.into_iter().map(Article::from));
            if got < PAGE_SIZE || out.len() >= page.total {
                break;
            }
        }
        debug!(feed = %feed, count = out.len(), "Fetched unread entries");
        Ok(out)
    }

    pub async fn fetch_recent_from(
        &self,
        feed: FeedId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Article>, BackendError> {
        let path = format!("/feeds/{}/entries", feed.0);
        let query = [
            ("order", "published_at".to_string()),
            ("direction", "desc".to_string()),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ];
        let page: EntriesPage = self.get_json("entries", &path, &query).await?;
        Ok(page.entries.into_iter().map(Article::from).collect())
    }

    pub async fn fetch_starred(&self, limit: usize) -> Result<Vec<Article>, BackendError> {
        let query = [
            ("starred", "true".to_string()),
            ("order", "published_at".to_string()),
            ("direction", "desc".to_string()),
            ("limit", limit.to_string()),
        ];
        let page: EntriesPage = self.get_json("entries", "/entries", &query).await?;
        Ok(page.entries.into_iter().map(Article::from).collect())
    }

    pub async fn mark_read(&self, id: ArticleId) -> Result<(), BackendError> {
        let body = json!({ "entry_ids": [id.0], "status": "read" });
        self.put("update_entries", "/entries", Some(body)).await
    }

    /// Not retried: the endpoint flips state on every call.
    async fn toggle_bookmark(&self, id: ArticleId) -> Result<(), BackendError> {
        self.put_once(&format!("/entries/{}/bookmark", id.0), None)
            .await
            .inspect_err(|e| warn!(id = %id, error = %e, "Bookmark toggle failed; not retrying"))
    }

    pub async fn star(&self, id: ArticleId) -> Result<(), BackendError> {
        self.toggle_bookmark(id).await
    }

    /// Miniflux only has a toggle; the unstar tool only sees starred entries.
    pub async fn unstar(&self, id: ArticleId) -> Result<(), BackendError> {
        self.toggle_bookmark(id).await
    }
}
