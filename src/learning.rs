//! Per-feed memory of recently seen articles.
//!
//! Each feed gets a bounded, most-recent-first list of fingerprints plus a
//! count of passes since the list was last rebuilt. A rebuild ("relearn")
//! fetches the feed's recent history from the backend and keeps the articles
//! that are already read; unread articles are candidates, not history.
//!
//! Relearning pages back through the feed until `maxcount` read articles are
//! found or the feed runs out, so a feed with a long unread backlog still
//! learns a full history.
//!
//! A relearn happens when the feed has no state yet, when its state is empty,
//! when `learning_retry_interval` passes went by since the last one, or when
//! the caller forces it. Between relearns the state only grows by
//! [`FeedLearningCache::record`], which bounds staleness to the interval while
//! keeping steady-state cost to an append.
//!
//! The cache lives for the lifetime of the process and is never persisted.

use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, instrument};

use crate::backends::ArticleSource;
use crate::error::BackendError;
use crate::models::{ArticleFingerprint, ArticleId, FeedId};
use crate::url_normalizer::UrlNormalizer;

/// Upper bound on backend pages read by one relearn.
const MAX_RELEARN_PAGES: usize = 20;

#[derive(Debug, Default)]
struct FeedLearningState {
    /// Most recent first.
    fingerprints: VecDeque<ArticleFingerprint>,
    passes_since_relearn: u32,
}

#[derive(Debug)]
pub struct FeedLearningCache {
    maxcount: usize,
    learning_retry_interval: u32,
    urls: UrlNormalizer,
    feeds: HashMap<FeedId, FeedLearningState>,
}

impl FeedLearningCache {
    pub fn new(maxcount: usize, learning_retry_interval: u32, urls: UrlNormalizer) -> Self {
        Self {
            maxcount: maxcount.max(1),
            learning_retry_interval: learning_retry_interval.max(1),
            urls,
            feeds: HashMap::new(),
        }
    }

    pub fn urls(&self) -> &UrlNormalizer {
        &self.urls
    }

    /// Whether the next [`get_known`](Self::get_known) will rebuild the feed from the backend.
    pub fn needs_relearn(&self, feed: FeedId) -> bool {
        match self.feeds.get(&feed) {
            None => true,
            Some(state) => {
                state.fingerprints.is_empty()
                    || state.passes_since_relearn >= self.learning_retry_interval
            }
        }
    }

    /// Snapshot of the feed's known fingerprints, most recent first, relearning first if due.
    ///
    /// On a backend failure the previous state is kept untouched.
    #[instrument(level = "debug", skip(self, source), fields(feed = %feed))]
    pub async fn get_known<S: ArticleSource>(
        &mut self,
        source: &S,
        feed: FeedId,
        force: bool,
    ) -> Result<Vec<ArticleFingerprint>, BackendError> {
        if force || self.needs_relearn(feed) {
            self.relearn(source, feed).await?;
        }
        Ok(self
            .feeds
            .get(&feed)
            .map(|s| s.fingerprints.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn relearn<S: ArticleSource>(&mut self, source: &S, feed: FeedId) -> Result<(), BackendError> {
        let page_size = self.maxcount;
        let mut fingerprints: VecDeque<ArticleFingerprint> = VecDeque::new();
        let mut fetched = 0;

        for page in 0..MAX_RELEARN_PAGES {
            let batch = if page == 0 {
                source.fetch_recent(feed, page_size).await?
            } else {
                source.fetch_recent_from(feed, fetched, page_size).await?
            };
            let got = batch.len();
            fetched += got;

            let wanted = self.maxcount - fingerprints.len();
            fingerprints.extend(
                batch
                    .iter()
                    .filter(|a| !a.unread)
                    .take(wanted)
                    .map(|a| ArticleFingerprint::from_article(a, &self.urls)),
            );
            if fingerprints.len() >= self.maxcount || got < page_size {
                break;
            }
            debug!(feed = %feed, fetched, learned = fingerprints.len(), "Relearn needs another page");
        }

        info!(
            feed = %feed,
            fetched,
            learned = fingerprints.len(),
            "Learned titles from read articles"
        );
        self.feeds.insert(
            feed,
            FeedLearningState {
                fingerprints,
                passes_since_relearn: 0,
            },
        );
        Ok(())
    }

    /// Remember a fingerprint that was judged unique, evicting the oldest beyond `maxcount`.
    pub fn record(&mut self, feed: FeedId, fingerprint: ArticleFingerprint) {
        if self.contains(feed, fingerprint.id()) {
            return;
        }
        let state = self.feeds.entry(feed).or_default();
        state.fingerprints.push_front(fingerprint);
        while state.fingerprints.len() > self.maxcount {
            if let Some(evicted) = state.fingerprints.pop_back() {
                debug!(feed = %feed, id = %evicted.id(), "Evicted oldest fingerprint");
            }
        }
    }

    /// Count one finished pass for the feed.
    pub fn advance(&mut self, feed: FeedId) {
        if let Some(state) = self.feeds.get_mut(&feed) {
            state.passes_since_relearn = state.passes_since_relearn.saturating_add(1);
        }
    }

    pub fn contains(&self, feed: FeedId, id: ArticleId) -> bool {
        self.feeds
            .get(&feed)
            .is_some_and(|s| s.fingerprints.iter().any(|f| f.id() == id))
    }

    pub fn len(&self, feed: FeedId) -> usize {
        self.feeds.get(&feed).map_or(0, |s| s.fingerprints.len())
    }

    #[cfg(test)]
    pub fn passes_since_relearn(&self, feed: FeedId) -> Option<u32> {
        self.feeds.get(&feed).map(|s| s.passes_since_relearn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::fake::FakeSource;
    use crate::models::{Article, test_article};

    fn read(id: i64, title: &str) -> Article {
        Article {
            unread: false,
            ..test_article(id, 1, title, &format!("https://ex.com/{id}"))
        }
    }

    fn fp(id: i64) -> ArticleFingerprint {
        ArticleFingerprint::new(&format!("story {id}"), None, ArticleId(id))
    }

    #[tokio::test]
    async fn test_first_touch_relearns_read_articles_only() {
        let source = FakeSource::default().with_feed(
            1,
            vec![],
            vec![
                read(10, "Older story"),
                test_article(11, 1, "Unread story", ""),
                read(12, "Another story"),
            ],
        );
        let mut cache = FeedLearningCache::new(10, 3, UrlNormalizer::default());

        let known = cache.get_known(&source, FeedId(1), false).await.unwrap();
        let ids: Vec<ArticleId> = known.iter().map(|f| f.id()).collect();
        assert_eq!(ids, vec![ArticleId(10), ArticleId(12)]);
        assert_eq!(source.calls().fetch_recent.len(), 1);
        assert_eq!(cache.passes_since_relearn(FeedId(1)), Some(0));
    }

    #[tokio::test]
    async fn test_cached_state_reused_between_relearns() {
        let source = FakeSource::default().with_feed(1, vec![], vec![read(10, "Older story")]);
        let mut cache = FeedLearningCache::new(10, 3, UrlNormalizer::default());

        cache.get_known(&source, FeedId(1), false).await.unwrap();
        cache.advance(FeedId(1));
        cache.advance(FeedId(1));
        cache.get_known(&source, FeedId(1), false).await.unwrap();
        assert_eq!(source.calls().fetch_recent.len(), 1);
        assert_eq!(cache.passes_since_relearn(FeedId(1)), Some(2));
    }

    #[tokio::test]
    async fn test_relearn_after_interval_resets_counter() {
        let source = FakeSource::default().with_feed(1, vec![], vec![read(10, "Older story")]);
        let mut cache = FeedLearningCache::new(10, 3, UrlNormalizer::default());

        cache.get_known(&source, FeedId(1), false).await.unwrap();
        cache.record(FeedId(1), fp(99));
        for _ in 0..3 {
            cache.advance(FeedId(1));
        }
        assert!(cache.needs_relearn(FeedId(1)));

        let known = cache.get_known(&source, FeedId(1), false).await.unwrap();
        assert_eq!(source.calls().fetch_recent.len(), 2);
        assert_eq!(cache.passes_since_relearn(FeedId(1)), Some(0));
        // Incremental state is discarded by a relearn.
        assert_eq!(known.len(), 1);
        assert!(!cache.contains(FeedId(1), ArticleId(99)));
    }

    #[tokio::test]
    async fn test_forced_and_empty_relearn() {
        let source = FakeSource::default()
            .with_feed(1, vec![], vec![read(10, "Older story")])
            .with_feed(2, vec![], vec![]);
        let mut cache = FeedLearningCache::new(10, 100, UrlNormalizer::default());

        cache.get_known(&source, FeedId(1), false).await.unwrap();
        cache.get_known(&source, FeedId(1), true).await.unwrap();
        assert_eq!(source.calls().fetch_recent, vec![FeedId(1), FeedId(1)]);

        // A feed with nothing learned is asked again on every call.
        cache.get_known(&source, FeedId(2), false).await.unwrap();
        cache.get_known(&source, FeedId(2), false).await.unwrap();
        assert_eq!(source.calls().fetch_recent.len(), 4);
    }

    #[tokio::test]
    async fn test_failed_relearn_keeps_previous_state() {
        let mut source = FakeSource::default().with_feed(1, vec![], vec![read(10, "Older story")]);
        let mut cache = FeedLearningCache::new(10, 1, UrlNormalizer::default());
        cache.get_known(&source, FeedId(1), false).await.unwrap();
        cache.advance(FeedId(1));

        source.failing_feeds.insert(FeedId(1));
        assert!(cache.get_known(&source, FeedId(1), false).await.is_err());
        assert!(cache.contains(FeedId(1), ArticleId(10)));
    }

    #[test]
    fn test_record_evicts_oldest_first() {
        let mut cache = FeedLearningCache::new(3, 10, UrlNormalizer::default());
        for id in 1..=5 {
            cache.record(FeedId(1), fp(id));
            assert!(cache.len(FeedId(1)) <= 3);
        }
        assert_eq!(cache.len(FeedId(1)), 3);
        assert!(!cache.contains(FeedId(1), ArticleId(1)));
        assert!(!cache.contains(FeedId(1), ArticleId(2)));
        assert!(cache.contains(FeedId(1), ArticleId(3)));
        assert!(cache.contains(FeedId(1), ArticleId(5)));
    }

    #[test]
    fn test_record_ignores_known_id() {
        let mut cache = FeedLearningCache::new(3, 10, UrlNormalizer::default());
        cache.record(FeedId(1), fp(1));
        cache.record(FeedId(1), fp(1));
        assert_eq!(cache.len(FeedId(1)), 1);
    }

    #[tokio::test]
    async fn test_relearn_pages_past_unread_backlog() {
        let mut recent: Vec<Article> = (1..=4).map(|i| test_article(i, 1, &format!("Unread {i}"), "")).collect();
        recent.extend((5..=8).map(|i| read(i, &format!("Read story {i}"))));
        let source = FakeSource::default().with_feed(1, vec![], recent);
        let mut cache = FeedLearningCache::new(3, 10, UrlNormalizer::default());

        let known = cache.get_known(&source, FeedId(1), false).await.unwrap();
        let ids: Vec<ArticleId> = known.iter().map(|f| f.id()).collect();
        assert_eq!(ids, vec![ArticleId(5), ArticleId(6), ArticleId(7)]);
        assert_eq!(source.calls().fetch_recent.len(), 3);
    }

    #[tokio::test]
    async fn test_relearn_stops_when_feed_runs_out() {
        let recent = vec![test_article(1, 1, "Unread", ""), read(2, "Only read story")];
        let source = FakeSource::default().with_feed(1, vec![], recent);
        let mut cache = FeedLearningCache::new(5, 10, UrlNormalizer::default());

        let known = cache.get_known(&source, FeedId(1), false).await.unwrap();
        assert_eq!(known.len(), 1);
        assert_eq!(source.calls().fetch_recent.len(), 1);
    }

    #[tokio::test]
    async fn test_relearn_capped_at_maxcount() {
        let recent: Vec<Article> = (1..=8).map(|i| read(i, &format!("Story number {i}"))).collect();
        let source = FakeSource::default().with_feed(1, vec![], recent);
        let mut cache = FeedLearningCache::new(5, 10, UrlNormalizer::default());
        let known = cache.get_known(&source, FeedId(1), false).await.unwrap();
        assert_eq!(known.len(), 5);
        assert_eq!(known[0].id(), ArticleId(1));
    }
}
