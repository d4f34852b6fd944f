//! # newsdedup
//!
//! Finds near-duplicate articles in an RSS reader and clears them out of the
//! unread list. Wire stories syndicated by many outlets, or re-published with
//! a new headline suffix, show up once instead of ten times.
//!
//! ## Features
//!
//! - Works against Tiny Tiny RSS and Miniflux through their HTTP APIs
//! - Compares normalized links first, then titles with one of five
//!   similarity methods (`token_sort`, `token_set`, `partial`, `jaccard`,
//!   `combined`)
//! - Remembers recently read titles per feed and relearns them periodically
//! - Stars duplicates for later review and marks them read, or only reports
//!   them with `--dry-run`
//! - Companion commands to list feed ids and to bulk-unstar reviewed articles
//!
//! ## Usage
//!
//! ```sh
//! newsdedup -c newsdedup.yaml --daemon
//! ```
//!
//! ## Architecture
//!
//! One pass works feed by feed:
//! 1. **Fetch**: read the feed's unread articles from the backend
//! 2. **Learn**: get the feed's known fingerprints, relearning when due
//! 3. **Decide**: score each unread article against the known set
//! 4. **Remediate**: star and mark read the duplicates

use clap::Parser;
use std::error::Error;
use std::io;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod backends;
mod cli;
mod config;
mod daemon;
mod engine;
mod error;
mod learning;
mod models;
mod similarity;
mod tools;
mod url_normalizer;

use backends::Backend;
use cli::{Cli, Command};
use config::Config;
use daemon::{DaemonLoop, DaemonSettings};
use engine::{DecisionSettings, DuplicateDecisionEngine};
use learning::FeedLearningCache;
use tools::unstar::UnstarOptions;
use url_normalizer::UrlNormalizer;

fn init_tracing(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_writer(io::stderr)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();
}

/// Resolves once Ctrl-C or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn dedup(backend: Backend, config: &Config, daemon_mode: bool) {
    let settings = &config.newsdedup;
    let urls = UrlNormalizer::new(settings.tracking_params.iter().cloned());
    let cache = FeedLearningCache::new(settings.maxcount, settings.learning_retry_interval, urls);
    let engine = DuplicateDecisionEngine::new(DecisionSettings::from(settings));
    let daemon_settings = DaemonSettings {
        daemon: daemon_mode,
        ..DaemonSettings::from(settings)
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Stop signal received");
        let _ = stop_tx.send(true);
    });

    let mut runner = DaemonLoop::new(backend, cache, engine, daemon_settings);
    let summary = runner.run(stop_rx).await;
    debug!(?summary, "Run summary");
}

async fn run(args: &Cli, config: &Config) -> Result<(), Box<dyn Error>> {
    let backend = Backend::connect(&config.backend).await?;

    match args.command() {
        Command::Run => dedup(backend, config, args.daemon).await,
        Command::ListFeeds => {
            tools::list_feeds::run(&backend, &mut io::stdout().lock()).await?;
        }
        Command::Unstar { limit, yes } => {
            let options = UnstarOptions {
                limit,
                yes,
                dry_run: config.newsdedup.dry_run,
            };
            let stdin = io::stdin();
            tools::unstar::run(&backend, options, &mut stdin.lock(), &mut io::stdout().lock()).await?;
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();
    init_tracing(args.debug);

    let start_time = std::time::Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), config = %args.config.display(), "newsdedup starting up");

    let mut config = Config::load(&args.config).inspect_err(|e| error!(error = %e, "Invalid configuration"))?;
    config.newsdedup.dry_run |= args.dry_run;
    if config.newsdedup.dry_run {
        info!("Dry run: nothing will be changed on the backend");
    }

    run(&args, &config)
        .await
        .inspect_err(|e| error!(error = %e, "Giving up"))?;

    let elapsed = start_time.elapsed();
    info!(secs = elapsed.as_secs(), millis = elapsed.subsec_millis(), "Execution complete");
    Ok(())
}
