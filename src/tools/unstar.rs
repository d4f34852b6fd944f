//! `unstar`: review starred articles in batches and unstar them.
//!
//! Each batch holds up to `limit` starred articles, printed by feed as
//! `<feed id>: <feed title>: <title>: <link>`. After every batch the user is
//! asked `Unstar messages? (y/n)`; a `y` unstars the batch and fetches the
//! next one, anything else ends the session. `--yes` answers for the user.
//! In dry-run mode the first batch is shown and nothing is changed.

use std::error::Error;
use std::io::{BufRead, Write};
use tracing::{debug, info, instrument, warn};

use crate::backends::StarredSource;
use crate::models::Article;

pub const DEFAULT_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy)]
pub struct UnstarOptions {
    pub limit: usize,
    pub yes: bool,
    pub dry_run: bool,
}

impl Default for UnstarOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            yes: false,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnstarSummary {
    pub batches: usize,
    pub listed: usize,
    pub unstarred: usize,
    pub failed: usize,
}

fn line(article: &Article) -> String {
    format!(
        "{}: {}: {}: {}",
        article.feed_id, article.feed_title, article.title, article.link
    )
}

fn confirm<R: BufRead, W: Write>(input: &mut R, out: &mut W) -> std::io::Result<bool> {
    write!(out, "Unstar messages? (y/n): ")?;
    out.flush()?;
    let mut answer = String::new();
    if input.read_line(&mut answer)? == 0 {
        return Ok(false);
    }
    Ok(answer.trim() == "y")
}

#[instrument(level = "info", skip_all, fields(limit = options.limit, dry_run = options.dry_run))]
pub async fn run<S, R, W>(
    source: &S,
    options: UnstarOptions,
    input: &mut R,
    out: &mut W,
) -> Result<UnstarSummary, Box<dyn Error>>
where
    S: StarredSource,
    R: BufRead,
    W: Write,
{
    let limit = options.limit.max(1);
    let mut summary = UnstarSummary::default();

    loop {
        let mut batch = source.fetch_starred(limit).await?;
        if batch.is_empty() {
            debug!("No starred articles left");
            break;
        }
        batch.sort_by_key(|a| a.feed_id);
        summary.batches += 1;
        summary.listed += batch.len();

        for article in &batch {
            writeln!(out, "{}", line(article))?;
        }
        writeln!(out, "{}", "#".repeat(80))?;

        if !options.yes && !confirm(input, out)? {
            info!("Batch declined");
            break;
        }
        if options.dry_run {
            info!(count = batch.len(), "Dry run: would unstar batch");
            break;
        }

        let mut done = 0;
        for article in &batch {
            match source.unstar(article.id).await {
                Ok(()) => done += 1,
                Err(e) => {
                    warn!(id = %article.id, error = %e, "Failed to unstar");
                    summary.failed += 1;
                }
            }
        }
        summary.unstarred += done;
        // A batch that made no progress would come back unchanged.
        if done == 0 {
            break;
        }
    }

    info!(
        batches = summary.batches,
        unstarred = summary.unstarred,
        failed = summary.failed,
        "Unstar finished"
    );
    Ok(summary)
}
