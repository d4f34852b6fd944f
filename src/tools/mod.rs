//! Companion commands that sit next to the deduplicator.
//!
//! # Submodules
//!
//! - [`list_feeds`]: prints the subscribed feeds with their identifiers, which
//!   is what the `nostar` and `ignore` settings expect
//! - [`unstar`]: walks the starred articles in batches and unstars the ones
//!   the user confirms, to clean up after duplicates were starred for review

pub mod list_feeds;
pub mod unstar;
