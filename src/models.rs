//! Data models shared by the backends, the learning cache and the decision engine.
//!
//! This module defines the core data structures used throughout the application:
//! - [`Article`]: a transient projection of a backend entry
//! - [`Feed`]: a subscribed feed as listed by the backend
//! - [`ArticleFingerprint`]: the normalized unit of comparison kept per feed
//! - [`DuplicateVerdict`]: the per-article outcome of a decision pass
//!
//! Identifiers are assigned by the backend. Both Tiny Tiny RSS and Miniflux use
//! integers, but nothing outside the backends looks inside them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::similarity::normalize_title;
use crate::url_normalizer::UrlNormalizer;

/// Backend-assigned feed identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedId(pub i64);

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Backend-assigned article identifier, unique within the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArticleId(pub i64);

impl fmt::Display for ArticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single feed entry as reported by the backend.
///
/// The backend owns the article; this is a read-mostly copy taken when the
/// headlines were fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    /// Backend identifier of the entry.
    pub id: ArticleId,
    /// Feed the entry belongs to.
    pub feed_id: FeedId,
    /// Human readable feed name, used only for log lines.
    pub feed_title: String,
    /// Headline as published.
    pub title: String,
    /// Link to the story; empty when the feed did not provide one.
    pub link: String,
    /// Whether the entry is still unread.
    pub unread: bool,
    /// Whether the entry is starred (bookmarked).
    pub starred: bool,
    /// Whether the backend saw the entry change after it was first ingested.
    pub is_updated: bool,
    /// When this copy was retrieved from the backend.
    pub fetched_at: DateTime<Utc>,
}

/// A subscribed feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    pub id: FeedId,
    pub title: String,
    /// Category name, when the backend groups feeds.
    pub category: Option<String>,
}

/// Normalized (title, URL, id) tuple used as the unit of comparison.
///
/// Immutable once built. The URL is `Some` if and only if the source article
/// carried a non-empty link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleFingerprint {
    title: String,
    url: Option<String>,
    id: ArticleId,
}

impl ArticleFingerprint {
    pub fn new(title: &str, url: Option<String>, id: ArticleId) -> Self {
        Self {
            title: normalize_title(title),
            url,
            id,
        }
    }

    /// Build the fingerprint of an article, normalizing its title and link.
    pub fn from_article(article: &Article, urls: &UrlNormalizer) -> Self {
        Self::new(&article.title, urls.normalize(&article.link), article.id)
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn id(&self) -> ArticleId {
        self.id
    }
}

/// Which evidence declared a candidate a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedBy {
    /// Normalized URLs are identical.
    Url,
    /// Title similarity reached the threshold.
    Title,
    /// Same URL and a title above the threshold, against the same fingerprint.
    Both,
}

impl fmt::Display for MatchedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatchedBy::Url => "url",
            MatchedBy::Title => "title",
            MatchedBy::Both => "both",
        };
        f.write_str(s)
    }
}

/// Outcome of evaluating one candidate article.
#[derive(Debug, Clone, PartialEq)]
pub enum DuplicateVerdict {
    Unique,
    Duplicate {
        of: ArticleFingerprint,
        score: u8,
        matched_by: MatchedBy,
    },
}

impl DuplicateVerdict {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, DuplicateVerdict::Duplicate { .. })
    }
}

#[cfg(test)]
pub(crate) fn test_article(id: i64, feed: i64, title: &str, link: &str) -> Article {
    Article {
        id: ArticleId(id),
        feed_id: FeedId(feed),
        feed_title: format!("Feed {feed}"),
        title: title.to_string(),
        link: link.to_string(),
        unread: true,
        starred: false,
        is_updated: false,
        fetched_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_normalizes_title_and_url() {
        let urls = UrlNormalizer::default();
        let article = test_article(
            7,
            1,
            "  Storm HITS coast!  ",
            "HTTPS://News.Example.com/story/?utm_source=rss#top",
        );
        let fp = ArticleFingerprint::from_article(&article, &urls);

        assert_eq!(fp.title(), "storm hits coast");
        assert_eq!(fp.url(), Some("https://news.example.com/story"));
        assert_eq!(fp.id(), ArticleId(7));
    }

    #[test]
    fn test_fingerprint_url_absent_for_empty_link() {
        let urls = UrlNormalizer::default();
        let article = test_article(8, 1, "No link here", "   ");
        let fp = ArticleFingerprint::from_article(&article, &urls);
        assert_eq!(fp.url(), None);
    }

    #[test]
    fn test_ids_deserialize_from_plain_integers() {
        let feeds: Vec<FeedId> = serde_yaml::from_str("[3, 12]").unwrap();
        assert_eq!(feeds, vec![FeedId(3), FeedId(12)]);
        assert_eq!(FeedId(12).to_string(), "12");
        assert_eq!(ArticleId(99).to_string(), "99");
    }

    #[test]
    fn test_verdict_is_duplicate() {
        assert!(!DuplicateVerdict::Unique.is_duplicate());
        let dup = DuplicateVerdict::Duplicate {
            of: ArticleFingerprint::new("a", None, ArticleId(1)),
            score: 100,
            matched_by: MatchedBy::Title,
        };
        assert!(dup.is_duplicate());
        assert_eq!(MatchedBy::Url.to_string(), "url");
    }
}
