//! Command-line interface definitions for newsdedup.
//!
//! Without a subcommand the deduplicator runs, once or as a daemon. The
//! companion tools are subcommands that share the same configuration file.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_PATH;
use crate::tools::unstar::DEFAULT_LIMIT;

/// Command-line arguments for newsdedup.
///
/// # Examples
///
/// ```sh
/// # One pass over every feed
/// newsdedup -c newsdedup.yaml
///
/// # Keep running, only report what would change
/// newsdedup --daemon --dry-run
///
/// # Companion tools
/// newsdedup list-feeds
/// newsdedup unstar --limit 50
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "NEWSDEDUP_CONFIG", default_value = DEFAULT_CONFIG_PATH, global = true)]
    pub config: PathBuf,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Decide but do not mark read, star or unstar anything
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Keep running, sleeping between passes
    #[arg(short = 'D', long)]
    pub daemon: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Deduplicate unread articles (the default)
    Run,
    /// Print feed ids and titles
    ListFeeds,
    /// Review starred articles and unstar them in batches
    Unstar {
        /// Articles per batch
        #[arg(short, long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,
        /// Do not ask before unstarring each batch
        #[arg(short, long)]
        yes: bool,
    },
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }
}
