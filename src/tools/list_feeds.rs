//! `list-feeds`: print every subscribed feed as `<id> <title>`.
//!
//! Feeds are grouped under a `# <category>` heading when the backend reports
//! categories, with categories in alphabetical order and feeds sorted by id
//! inside each group. Feeds without a category come first, without a heading.

use std::collections::BTreeMap;
use std::error::Error;
use std::io::Write;
use tracing::{info, instrument};

use crate::backends::FeedDirectory;
use crate::models::Feed;

pub fn render(feeds: &[Feed]) -> String {
    let mut by_category: BTreeMap<Option<&str>, Vec<&Feed>> = BTreeMap::new();
    for feed in feeds {
        by_category
            .entry(feed.category.as_deref())
            .or_default()
            .push(feed);
    }

    let mut out = String::new();
    for (category, mut group) in by_category {
        group.sort_by_key(|f| f.id);
        if let Some(name) = category {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!("# {name}\n"));
        }
        for feed in group {
            out.push_str(&format!("{} {}\n", feed.id, feed.title));
        }
    }
    out
}

#[instrument(level = "info", skip_all)]
pub async fn run<D: FeedDirectory, W: Write>(directory: &D, out: &mut W) -> Result<usize, Box<dyn Error>> {
    let feeds = directory.feed_details().await?;
    out.write_all(render(&feeds).as_bytes())?;
    out.flush()?;
    info!(count = feeds.len(), "Listed feeds");
    Ok(feeds.len())
}
