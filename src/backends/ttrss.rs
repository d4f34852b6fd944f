//! Tiny Tiny RSS client.
//!
//! Every call is a JSON `POST` to `{hostname}/api/` carrying an `op` name and,
//! after login, the session id. Responses look like
//! `{"seq": 0, "status": 0, "content": ...}`; a non-zero status puts the error
//! code in `content.error`.
//!
//! Sessions expire on the server. A call that comes back `NOT_LOGGED_IN` logs
//! in again once and is replayed.

use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::retry::RetryPolicy;
use crate::error::BackendError;
use crate::models::{Article, ArticleId, Feed, FeedId};

/// TT-RSS refuses to return more headlines than this per call.
const PAGE_SIZE: usize = 200;

/// Virtual category holding every real feed.
const ALL_FEEDS_CATEGORY: i64 = -3;

/// Virtual feed holding every starred article.
const STARRED_FEED: i64 = -1;

const FIELD_STARRED: u8 = 0;
const FIELD_UNREAD: u8 = 2;
const MODE_FALSE: u8 = 0;
const MODE_TRUE: u8 = 1;

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: i64,
    #[serde(default)]
    content: Value,
}

/// TT-RSS sends numeric ids as numbers or strings depending on version.
#[derive(Deserialize)]
#[serde(untagged)]
enum NumOrStr {
    Num(i64),
    Str(String),
}

impl NumOrStr {
    fn parse<E: serde::de::Error>(self) -> Result<i64, E> {
        match self {
            NumOrStr::Num(n) => Ok(n),
            NumOrStr::Str(s) => s.trim().parse().map_err(E::custom),
        }
    }
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    NumOrStr::deserialize(deserializer)?.parse()
}

fn lenient_opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<NumOrStr>::deserialize(deserializer)?
        .map(NumOrStr::parse)
        .transpose()
}

#[derive(Debug, Deserialize)]
struct Headline {
    #[serde(deserialize_with = "lenient_i64")]
    id: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(deserialize_with = "lenient_i64")]
    feed_id: i64,
    #[serde(default)]
    feed_title: String,
    #[serde(default)]
    unread: bool,
    #[serde(default)]
    marked: bool,
    #[serde(default)]
    is_updated: bool,
}

impl From<Headline> for Article {
    fn from(h: Headline) -> Self {
        Article {
            id: ArticleId(h.id),
            feed_id: FeedId(h.feed_id),
            feed_title: h.feed_title,
            title: h.title,
            link: h.link,
            unread: h.unread,
            starred: h.marked,
            is_updated: h.is_updated,
            fetched_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FeedEntry {
    #[serde(deserialize_with = "lenient_i64")]
    id: i64,
    #[serde(default)]
    title: String,
    #[serde(default, deserialize_with = "lenient_opt_i64")]
    cat_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Category {
    #[serde(deserialize_with = "lenient_i64")]
    id: i64,
    #[serde(default)]
    title: String,
}

/// Map a TT-RSS error code onto the error taxonomy.
fn api_error(op: &'static str, content: &Value) -> BackendError {
    let code = content
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("UNKNOWN_ERROR");
    match code {
        "NOT_LOGGED_IN" => BackendError::NotLoggedIn,
        "LOGIN_ERROR" => BackendError::Auth("username or password rejected".to_string()),
        "API_DISABLED" => BackendError::Auth("API access is disabled for this user".to_string()),
        other => BackendError::Api {
            op,
            message: other.to_string(),
        },
    }
}

pub struct TtrssClient {
    http: Client,
    endpoint: String,
    username: String,
    password: String,
    session: Mutex<Option<String>>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for TtrssClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtrssClient")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("retry", &self.retry)
            .finish()
    }
}

impl TtrssClient {
    pub fn new(
        hostname: &str,
        username: &str,
        password: &str,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, BackendError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/api/", hostname.trim_end_matches('/')),
            username: username.to_string(),
            password: password.to_string(),
            session: Mutex::new(None),
            retry,
        })
    }

    fn session_id(&self) -> Option<String> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_session_id(&self, sid: Option<String>) {
        *self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = sid;
    }

    async fn call_once(&self, op: &'static str, params: &Value) -> Result<Value, BackendError> {
        let mut body = params.clone();
        body["op"] = json!(op);
        if let Some(sid) = self.session_id() {
            body["sid"] = json!(sid);
        }

        let resp = self.http.post(&self.endpoint).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                url: self.endpoint.clone(),
            });
        }

        let text = resp.text().await?;
        let api: ApiResponse = serde_json::from_str(&text)?;
        if api.status != 0 {
            return Err(api_error(op, &api.content));
        }
        Ok(api.content)
    }

    async fn call(&self, op: &'static str, params: Value) -> Result<Value, BackendError> {
        match self.retry.run(op, || self.call_once(op, &params)).await {
            Err(BackendError::NotLoggedIn) => {
                warn!(op, "Session expired; logging in again");
                self.login().await?;
                self.retry.run(op, || self.call_once(op, &params)).await
            }
            other => other,
        }
    }

    /// Open a session. Called once on connect and again when the session expires.
    #[instrument(level = "info", skip_all, fields(user = %self.username))]
    pub async fn login(&self) -> Result<(), BackendError> {
        self.set_session_id(None);
        let params = json!({ "user": self.username, "password": self.password });
        let content = self.retry.run("login", || self.call_once("login", &params)).await?;
        let sid = content
            .get("session_id")
            .and_then(Value::as_str)
            .ok_or_else(|| BackendError::Auth("login returned no session id".to_string()))?;
        self.set_session_id(Some(sid.to_string()));
        info!("Logged in to Tiny Tiny RSS");
        Ok(())
    }

    async fn headlines(&self, params: Value) -> Result<Vec<Article>, BackendError> {
        let content = self.call("getHeadlines", params).await?;
        let headlines: Vec<Headline> = serde_json::from_value(content)?;
        Ok(headlines.into_iter().map(Article::from).collect())
    }

    /// Page through `getHeadlines` from `skip` until `limit` articles or the end of the feed.
    async fn paged_headlines(
        &self,
        feed: i64,
        view_mode: &str,
        order_by: Option<&str>,
        skip: usize,
        limit: Option<usize>,
    ) -> Result<Vec<Article>, BackendError> {
        let mut out = Vec::new();
        loop {
            let want = match limit {
                Some(limit) if out.len() >= limit => break,
                Some(limit) => (limit - out.len()).min(PAGE_SIZE),
                None => PAGE_SIZE,
            };
            let mut params = json!({
                "feed_id": feed,
                "view_mode": view_mode,
                "limit": want,
                "skip": skip + out.len(),
                "show_excerpt": false,
                "show_content": false,
            });
            if let Some(order) = order_by {
                params["order_by"] = json!(order);
            }
            let page = self.headlines(params).await?;
            let got = page.len();
            out.extend(page);
            if got < want {
                break;
            }
        }
        debug!(feed, view_mode, count = out.len(), "Fetched headlines");
        Ok(out)
    }

    async fn update_article(&self, id: ArticleId, field: u8, mode: u8) -> Result<(), BackendError> {
        let params = json!({
            "article_ids": id.to_string(),
            "field": field,
            "mode": mode,
        });
        self.call("updateArticle", params).await.map(|_| ())
    }

    pub async fn list_feeds(&self) -> Result<Vec<FeedId>, BackendError> {
        Ok(self.raw_feeds().await?.into_iter().map(|f| FeedId(f.id)).collect())
    }

    async fn raw_feeds(&self) -> Result<Vec<FeedEntry>, BackendError> {
        let content = self
            .call("getFeeds", json!({ "cat_id": ALL_FEEDS_CATEGORY, "unread_only": false }))
            .await?;
        let feeds: Vec<FeedEntry> = serde_json::from_value(content)?;
        // Virtual feeds (starred, published, ...) have negative ids.
        Ok(feeds.into_iter().filter(|f| f.id > 0).collect())
    }

    pub async fn feed_details(&self) -> Result<Vec<Feed>, BackendError> {
        let feeds = self.raw_feeds().await?;
        let content = self.call("getCategories", json!({})).await?;
        let categories: Vec<Category> = serde_json::from_value(content)?;
        let names: HashMap<i64, String> = categories.into_iter().map(|c| (c.id, c.title)).collect();

        Ok(feeds
            .into_iter()
            .map(|f| Feed {
                id: FeedId(f.id),
                title: f.title,
                category: f.cat_id.and_then(|c| names.get(&c).cloned()),
            })
            .collect())
    }

    pub async fn fetch_unread(&self, feed: FeedId) -> Result<Vec<Article>, BackendError> {
        self.paged_headlines(feed.0, "unread", Some("date_reverse"), 0, None)
            .await
    }

    pub async fn fetch_recent_from(
        &self,
        feed: FeedId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Article>, BackendError> {
        self.paged_headlines(feed.0, "all_articles", None, offset, Some(limit))
            .await
    }

    pub async fn fetch_starred(&self, limit: usize) -> Result<Vec<Article>, BackendError> {
        self.paged_headlines(STARRED_FEED, "all_articles", None, 0, Some(limit))
            .await
    }

    pub async fn mark_read(&self, id: ArticleId) -> Result<(), BackendError> {
        self.update_article(id, FIELD_UNREAD, MODE_FALSE).await
    }

    pub async fn star(&self, id: ArticleId) -> Result<(), BackendError> {
        self.update_article(id, FIELD_STARRED, MODE_TRUE).await
    }

    pub async fn unstar(&self, id: ArticleId) -> Result<(), BackendError> {
        self.update_article(id, FIELD_STARRED, MODE_FALSE).await
    }
}
