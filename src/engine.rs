//! Duplicate decisions for one feed.
//!
//! Candidates are the feed's unread articles, in the order the backend
//! returned them. Each one is compared with the feed's learned fingerprints as
//! they stood before the pass, plus every candidate of this pass that was
//! already declared unique. Whichever copy of a story is seen first becomes the
//! canonical one; later copies are duplicates.
//!
//! Per candidate:
//! 1. with `check_urls`, an identical normalized link is a duplicate (score 100);
//! 2. otherwise the best title score against the known set is taken;
//! 3. a score at or above `ratio` is a duplicate, anything lower is unique.
//!
//! Unique candidates are recorded in the learning cache. Duplicates are not,
//! they are starred (unless disabled) and marked read instead. A failed
//! remediation is reported on that article and evaluation carries on.

use itertools::Itertools;
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

use crate::backends::ArticleSource;
use crate::config::DedupSettings;
use crate::error::BackendError;
use crate::learning::FeedLearningCache;
use crate::models::{Article, ArticleFingerprint, ArticleId, DuplicateVerdict, FeedId, MatchedBy};
use crate::similarity::{Method, score};

/// The part of the configuration the decision engine reads.
#[derive(Debug, Clone)]
pub struct DecisionSettings {
    pub method: Method,
    pub check_urls: bool,
    pub ratio: u8,
    pub dry_run: bool,
    pub star_duplicates: bool,
    pub nostar: HashSet<FeedId>,
}

impl Default for DecisionSettings {
    fn default() -> Self {
        Self::from(&DedupSettings::default())
    }
}

impl From<&DedupSettings> for DecisionSettings {
    fn from(s: &DedupSettings) -> Self {
        Self {
            method: s.similarity_method,
            check_urls: s.check_urls,
            ratio: s.ratio,
            dry_run: s.dry_run,
            star_duplicates: s.star_duplicates,
            nostar: s.nostar.iter().copied().collect(),
        }
    }
}

/// What happened to the article on the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Remediation {
    /// Unique articles are left alone.
    None,
    /// Dry run: nothing was sent.
    DryRun { would_star: bool },
    /// Marked read, and starred if `starred`.
    Applied { starred: bool },
    /// At least one backend call failed.
    Failed(String),
}

/// Verdict and remediation for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub article_id: ArticleId,
    pub title: String,
    pub verdict: DuplicateVerdict,
    pub remediation: Remediation,
}

#[derive(Debug, Clone, Default)]
pub struct DuplicateDecisionEngine {
    settings: DecisionSettings,
}

impl DuplicateDecisionEngine {
    pub fn new(settings: DecisionSettings) -> Self {
        Self { settings }
    }

    /// Classify one fingerprint against a comparison set. Pure; no side effects.
    pub fn classify(&self, candidate: &ArticleFingerprint, known: &[ArticleFingerprint]) -> DuplicateVerdict {
        let others = || known.iter().filter(|k| k.id() != candidate.id());

        if self.settings.check_urls {
            if let Some(url) = candidate.url() {
                if let Some(hit) = others().find(|k| k.url() == Some(url)) {
                    let matched_by = if self.title_score(candidate, hit) >= self.settings.ratio {
                        MatchedBy::Both
                    } else {
                        MatchedBy::Url
                    };
                    return DuplicateVerdict::Duplicate {
                        of: hit.clone(),
                        score: 100,
                        matched_by,
                    };
                }
            }
        }

        if candidate.title().is_empty() {
            return DuplicateVerdict::Unique;
        }
        let mut best: Option<(u8, &ArticleFingerprint)> = None;
        for k in others().filter(|k| !k.title().is_empty()) {
            let s = self.title_score(candidate, k);
            if best.is_none_or(|(b, _)| s > b) {
                best = Some((s, k));
            }
        }

        match best {
            Some((s, k)) if s >= self.settings.ratio => DuplicateVerdict::Duplicate {
                of: k.clone(),
                score: s,
                matched_by: MatchedBy::Title,
            },
            _ => DuplicateVerdict::Unique,
        }
    }

    /// Empty titles never look like anything.
    fn title_score(&self, a: &ArticleFingerprint, b: &ArticleFingerprint) -> u8 {
        if a.title().is_empty() || b.title().is_empty() {
            return 0;
        }
        score(a.title(), b.title(), self.settings.method)
    }

    /// Evaluate a feed's candidates in order and remediate the duplicates.
    ///
    /// Returns one decision per distinct candidate id. Only a failure to load
    /// the feed's learned state is returned as an error.
    #[instrument(level = "debug", skip_all, fields(feed = %feed, candidates = candidates.len()))]
    pub async fn evaluate<S: ArticleSource>(
        &self,
        source: &S,
        cache: &mut FeedLearningCache,
        feed: FeedId,
        candidates: &[Article],
    ) -> Result<Vec<Decision>, BackendError> {
        let mut comparison = cache.get_known(source, feed, false).await?;
        let learned: HashSet<ArticleId> = comparison.iter().map(|f| f.id()).collect();
        let mut decisions = Vec::with_capacity(candidates.len());

        for candidate in candidates.iter().unique_by(|a| a.id) {
            let fingerprint = ArticleFingerprint::from_article(candidate, cache.urls());

            // Declared unique on an earlier pass and still unread.
            if learned.contains(&candidate.id) {
                debug!(id = %candidate.id, title = %candidate.title, "Already canonical");
                decisions.push(Decision {
                    article_id: candidate.id,
                    title: candidate.title.clone(),
                    verdict: DuplicateVerdict::Unique,
                    remediation: Remediation::None,
                });
                continue;
            }

            let verdict = self.classify(&fingerprint, &comparison);
            let remediation = match &verdict {
                DuplicateVerdict::Unique => {
                    debug!(id = %candidate.id, title = %candidate.title, "Unique");
                    cache.record(feed, fingerprint.clone());
                    comparison.push(fingerprint);
                    Remediation::None
                }
                DuplicateVerdict::Duplicate {
                    of,
                    score,
                    matched_by,
                } => {
                    info!(
                        feed = %feed,
                        feed_title = %candidate.feed_title,
                        id = %candidate.id,
                        old_title = %of.title(),
                        new_title = %candidate.title,
                        score,
                        matched_by = %matched_by,
                        "Duplicate"
                    );
                    self.remediate(source, feed, candidate).await
                }
            };

            decisions.push(Decision {
                article_id: candidate.id,
                title: candidate.title.clone(),
                verdict,
                remediation,
            });
        }

        Ok(decisions)
    }

    async fn remediate<S: ArticleSource>(&self, source: &S, feed: FeedId, article: &Article) -> Remediation {
        let star = self.settings.star_duplicates
            && !self.settings.nostar.contains(&feed)
            && !article.starred;

        if self.settings.dry_run {
            info!(id = %article.id, would_star = star, "Dry run: would mark read");
            return Remediation::DryRun { would_star: star };
        }

        let mut failures = Vec::new();
        let mut starred = false;
        if star {
            match source.star(article.id).await {
                Ok(()) => starred = true,
                Err(e) => {
                    warn!(id = %article.id, error = %e, "Failed to star duplicate");
                    failures.push(format!("star: {e}"));
                }
            }
        }
        if let Err(e) = source.mark_read(article.id).await {
            warn!(id = %article.id, error = %e, "Failed to mark duplicate read");
            failures.push(format!("mark read: {e}"));
        }

        if failures.is_empty() {
            Remediation::Applied { starred }
        } else {
            Remediation::Failed(failures.join("; "))
        }
    }
}
