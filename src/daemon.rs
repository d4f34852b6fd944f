//! Pass driver.
//!
//! A pass lists the backend's feeds and runs each one through the learning
//! cache and the decision engine, strictly one after another. A feed that
//! fails is logged, counted and skipped; the pass goes on with the next feed.
//! In one-shot mode a single pass runs. In daemon mode passes repeat with
//! `sleep` seconds in between until the stop signal flips.
//!
//! The stop signal is observed at the top of every feed iteration and during
//! the sleep. A backend call that is already in flight is left to finish or
//! time out.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::backends::ArticleSource;
use crate::config::DedupSettings;
use crate::engine::{DuplicateDecisionEngine, Remediation};
use crate::error::BackendError;
use crate::learning::FeedLearningCache;
use crate::models::FeedId;

#[derive(Debug, Clone)]
pub struct DaemonSettings {
    pub daemon: bool,
    pub sleep: Duration,
    pub ignore: HashSet<FeedId>,
    pub skip_updated: bool,
}

impl From<&DedupSettings> for DaemonSettings {
    fn from(s: &DedupSettings) -> Self {
        Self {
            daemon: false,
            sleep: Duration::from_secs(s.sleep),
            ignore: s.ignore.iter().copied().collect(),
            skip_updated: s.skip_updated,
        }
    }
}

/// Counters for one pass, or the sum of several.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub passes: usize,
    /// Listing the feeds failed, so nothing was processed.
    pub list_failures: usize,
    pub feeds_processed: usize,
    pub feeds_failed: usize,
    pub feeds_ignored: usize,
    pub articles_skipped: usize,
    pub uniques: usize,
    pub duplicates: usize,
    pub remediation_errors: usize,
}

impl PassSummary {
    fn absorb(&mut self, other: &PassSummary) {
        self.passes += other.passes;
        self.list_failures += other.list_failures;
        self.feeds_processed += other.feeds_processed;
        self.feeds_failed += other.feeds_failed;
        self.feeds_ignored += other.feeds_ignored;
        self.articles_skipped += other.articles_skipped;
        self.uniques += other.uniques;
        self.duplicates += other.duplicates;
        self.remediation_errors += other.remediation_errors;
    }
}

pub struct DaemonLoop<S> {
    source: S,
    cache: FeedLearningCache,
    engine: DuplicateDecisionEngine,
    settings: DaemonSettings,
    failures: HashMap<FeedId, u32>,
}

impl<S: ArticleSource> DaemonLoop<S> {
    pub fn new(
        source: S,
        cache: FeedLearningCache,
        engine: DuplicateDecisionEngine,
        settings: DaemonSettings,
    ) -> Self {
        Self {
            source,
            cache,
            engine,
            settings,
            failures: HashMap::new(),
        }
    }

    /// Failed passes for a feed since startup.
    #[cfg(test)]
    pub fn failure_count(&self, feed: FeedId) -> u32 {
        self.failures.get(&feed).copied().unwrap_or(0)
    }

    #[cfg(test)]
    pub fn cache(&self) -> &FeedLearningCache {
        &self.cache
    }

    /// Run passes until done: one in one-shot mode, until stopped in daemon mode.
    pub async fn run(&mut self, mut stop: watch::Receiver<bool>) -> PassSummary {
        let mut total = PassSummary::default();
        loop {
            let summary = self.run_pass(&stop).await;
            total.absorb(&summary);

            if !self.settings.daemon || *stop.borrow() {
                break;
            }
            debug!(secs = self.settings.sleep.as_secs(), "Sleeping until next pass");
            tokio::select! {
                _ = tokio::time::sleep(self.settings.sleep) => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        warn!("Stop channel closed; shutting down");
                        break;
                    }
                }
            }
            if *stop.borrow() {
                break;
            }
        }
        info!(
            passes = total.passes,
            duplicates = total.duplicates,
            uniques = total.uniques,
            feeds_failed = total.feeds_failed,
            "Stopped"
        );
        total
    }

    /// One pass over every feed. Never fails; problems end up in the summary.
    #[instrument(level = "info", skip_all)]
    pub async fn run_pass(&mut self, stop: &watch::Receiver<bool>) -> PassSummary {
        let start = Instant::now();
        let mut summary = PassSummary {
            passes: 1,
            ..PassSummary::default()
        };

        let feeds = match self.source.list_feeds().await {
            Ok(feeds) => feeds,
            Err(e) => {
                error!(error = %e, "Failed to list feeds; skipping pass");
                summary.list_failures += 1;
                return summary;
            }
        };

        for feed in feeds {
            if *stop.borrow() {
                info!("Stop requested; ending pass early");
                break;
            }
            if self.settings.ignore.contains(&feed) {
                debug!(feed = %feed, "Ignored feed");
                summary.feeds_ignored += 1;
                continue;
            }
            match self.process_feed(feed, &mut summary).await {
                Ok(()) => summary.feeds_processed += 1,
                Err(e) => {
                    let count = self.failures.entry(feed).or_insert(0);
                    *count += 1;
                    warn!(feed = %feed, error = %e, failures = *count, "Feed failed; skipping");
                    summary.feeds_failed += 1;
                }
            }
        }

        let elapsed = start.elapsed();
        info!(
            feeds = summary.feeds_processed,
            failed = summary.feeds_failed,
            duplicates = summary.duplicates,
            uniques = summary.uniques,
            remediation_errors = summary.remediation_errors,
            millis = elapsed.as_millis() as u64,
            "Pass complete"
        );
        summary
    }

    async fn process_feed(&mut self, feed: FeedId, summary: &mut PassSummary) -> Result<(), BackendError> {
        let mut candidates = self.source.fetch_unread(feed).await?;
        if self.settings.skip_updated {
            let before = candidates.len();
            candidates.retain(|a| !a.is_updated);
            summary.articles_skipped += before - candidates.len();
        }

        if !candidates.is_empty() {
            let decisions = self
                .engine
                .evaluate(&self.source, &mut self.cache, feed, &candidates)
                .await?;
            for d in &decisions {
                debug!(
                    id = %d.article_id,
                    title = %d.title,
                    duplicate = d.verdict.is_duplicate(),
                    remediation = ?d.remediation,
                    "Decision"
                );
                if d.verdict.is_duplicate() {
                    summary.duplicates += 1;
                } else {
                    summary.uniques += 1;
                }
                if matches!(d.remediation, Remediation::Failed(_)) {
                    summary.remediation_errors += 1;
                }
            }
        }

        self.cache.advance(feed);
        debug!(feed = %feed, known = self.cache.len(feed), "Feed done");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::fake::FakeSource;
    use crate::engine::DecisionSettings;
    use crate::models::{Article, ArticleId, test_article};
    use crate::similarity::Method;
    use crate::url_normalizer::UrlNormalizer;

    fn settings(daemon: bool) -> DaemonSettings {
        DaemonSettings {
            daemon,
            sleep: Duration::from_secs(3600),
            ignore: HashSet::new(),
            skip_updated: true,
        }
    }

    fn daemon(source: FakeSource, settings: DaemonSettings) -> DaemonLoop<FakeSource> {
        let engine = DuplicateDecisionEngine::new(DecisionSettings {
            method: Method::Combined,
            ratio: 75,
            ..DecisionSettings::default()
        });
        let cache = FeedLearningCache::new(100, 10, UrlNormalizer::default());
        DaemonLoop::new(source, cache, engine, settings)
    }

    fn storm(feed: i64, first_id: i64) -> Vec<Article> {
        vec![
            test_article(first_id, feed, "Storm hits coast", ""),
            test_article(first_id + 1, feed, "Storm Hits Coast - Live Updates", ""),
            test_article(first_id + 2, feed, "Local election results", ""),
        ]
    }

    #[tokio::test]
    async fn test_one_shot_runs_single_pass() {
        let source = FakeSource::default()
            .with_feed(1, storm(1, 1), vec![])
            .with_feed(2, storm(2, 10), vec![]);
        let mut d = daemon(source, settings(false));
        let (_tx, rx) = watch::channel(false);

        let total = d.run(rx).await;
        assert_eq!(total.passes, 1);
        assert_eq!(total.feeds_processed, 2);
        assert_eq!(total.duplicates, 2);
        assert_eq!(total.uniques, 4);
        assert_eq!(d.source.calls().list_feeds, 1);
        assert_eq!(d.source.calls().mark_read, vec![ArticleId(2), ArticleId(11)]);
    }

    #[tokio::test]
    async fn test_failing_feed_is_isolated() {
        let mut source = FakeSource::default()
            .with_feed(1, storm(1, 1), vec![])
            .with_feed(2, storm(2, 10), vec![])
            .with_feed(3, storm(3, 20), vec![]);
        source.failing_feeds.insert(FeedId(2));
        let mut d = daemon(source, settings(false));
        let (_tx, rx) = watch::channel(false);

        let summary = d.run_pass(&rx).await;
        assert_eq!(summary.feeds_processed, 2);
        assert_eq!(summary.feeds_failed, 1);
        assert_eq!(d.failure_count(FeedId(2)), 1);
        assert_eq!(d.failure_count(FeedId(1)), 0);

        d.run_pass(&rx).await;
        assert_eq!(d.failure_count(FeedId(2)), 2);
    }

    #[tokio::test]
    async fn test_list_failure_skips_pass() {
        let mut source = FakeSource::default().with_feed(1, storm(1, 1), vec![]);
        source.fail_list_feeds = true;
        let mut d = daemon(source, settings(false));
        let (_tx, rx) = watch::channel(false);

        let summary = d.run_pass(&rx).await;
        assert_eq!(summary.list_failures, 1);
        assert_eq!(summary.feeds_processed, 0);
        assert!(d.source.calls().fetch_unread.is_empty());
    }

    #[tokio::test]
    async fn test_ignored_feeds_not_fetched() {
        let source = FakeSource::default()
            .with_feed(1, storm(1, 1), vec![])
            .with_feed(2, storm(2, 10), vec![]);
        let mut s = settings(false);
        s.ignore.insert(FeedId(1));
        let mut d = daemon(source, s);
        let (_tx, rx) = watch::channel(false);

        let summary = d.run_pass(&rx).await;
        assert_eq!(summary.feeds_ignored, 1);
        assert_eq!(d.source.calls().fetch_unread, vec![FeedId(2)]);
    }

    #[tokio::test]
    async fn test_updated_articles_skipped() {
        let mut unread = storm(1, 1);
        unread[1].is_updated = true;
        let source = FakeSource::default().with_feed(1, unread, vec![]);
        let mut d = daemon(source, settings(false));
        let (_tx, rx) = watch::channel(false);

        let summary = d.run_pass(&rx).await;
        assert_eq!(summary.articles_skipped, 1);
        assert_eq!(summary.duplicates, 0);
        assert!(d.source.calls().mark_read.is_empty());
    }

    #[tokio::test]
    async fn test_pass_advances_learning_counter() {
        let source = FakeSource::default().with_feed(1, storm(1, 1), vec![]);
        let mut d = daemon(source, settings(false));
        let (_tx, rx) = watch::channel(false);

        d.run_pass(&rx).await;
        assert_eq!(d.cache().passes_since_relearn(FeedId(1)), Some(1));
        assert_eq!(d.cache().len(FeedId(1)), 2);
    }

    #[tokio::test]
    async fn test_stop_before_start_processes_nothing() {
        let source = FakeSource::default().with_feed(1, storm(1, 1), vec![]);
        let mut d = daemon(source, settings(true));
        let (_tx, rx) = watch::channel(true);

        let total = d.run(rx).await;
        assert_eq!(total.passes, 1);
        assert_eq!(total.feeds_processed, 0);
        assert!(d.source.calls().fetch_unread.is_empty());
    }

    #[tokio::test]
    async fn test_stop_interrupts_sleep() {
        let source = FakeSource::default().with_feed(1, storm(1, 1), vec![]);
        let mut d = daemon(source, settings(true));
        let (tx, rx) = watch::channel(false);

        let (total, _) = tokio::join!(d.run(rx), async {
            tokio::task::yield_now().await;
            tx.send(true).unwrap();
        });
        assert_eq!(total.passes, 1);
        assert_eq!(total.feeds_processed, 1);
    }
}
