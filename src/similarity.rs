//! Title similarity scoring.
//!
//! Every method works on case-folded, punctuation-stripped, whitespace
//! tokenized copies of its inputs and returns an integer score in `0..=100`.
//! Scores are exactly reproducible: there is no randomness and no
//! locale-dependent collation (tokens sort by code point).
//!
//! | Method | Idea |
//! |--------|------|
//! | [`Method::TokenSort`] | sort tokens, then an edit-distance ratio |
//! | [`Method::TokenSet`] | compare the shared tokens against each side's extras |
//! | [`Method::Partial`] | best window of the longer title against the shorter one |
//! | [`Method::Jaccard`] | token-set intersection over union |
//! | [`Method::Combined`] | maximum of the four above |
//!
//! Two empty inputs are identical (100); one empty input scores 0.

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use strsim::normalized_levenshtein;

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{L}\p{N}]+").unwrap());

/// Similarity algorithm selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    #[default]
    TokenSort,
    TokenSet,
    Partial,
    Jaccard,
    Combined,
}

impl Method {
    /// The independent algorithms that [`Method::Combined`] takes the maximum of.
    pub const BASE: [Method; 4] = [
        Method::TokenSort,
        Method::TokenSet,
        Method::Partial,
        Method::Jaccard,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Method::TokenSort => "token_sort",
            Method::TokenSet => "token_set",
            Method::Partial => "partial",
            Method::Jaccard => "jaccard",
            Method::Combined => "combined",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower-case a title, replace punctuation with spaces and collapse whitespace.
pub fn normalize_title(title: &str) -> String {
    NON_WORD
        .replace_all(&title.to_lowercase(), " ")
        .split_whitespace()
        .join(" ")
}

/// Score two titles with the given method.
pub fn score(a: &str, b: &str, method: Method) -> u8 {
    let a = normalize_title(a);
    let b = normalize_title(b);
    if a.is_empty() && b.is_empty() {
        return 100;
    }
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    score_normalized(&a, &b, method)
}

/// Score two non-empty, already normalized titles.
fn score_normalized(a: &str, b: &str, method: Method) -> u8 {
    match method {
        Method::TokenSort => token_sort(a, b),
        Method::TokenSet => token_set(a, b),
        Method::Partial => partial(a, b),
        Method::Jaccard => jaccard(a, b),
        Method::Combined => Method::BASE
            .iter()
            .map(|m| score_normalized(a, b, *m))
            .max()
            .unwrap_or(0),
    }
}

fn to_score(x: f64) -> u8 {
    (x * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Edit-distance ratio on already normalized strings.
fn ratio(a: &str, b: &str) -> u8 {
    if a.is_empty() && b.is_empty() {
        return 100;
    }
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    to_score(normalized_levenshtein(a, b))
}

fn token_set_of(s: &str) -> BTreeSet<&str> {
    s.split(' ').filter(|t| !t.is_empty()).collect()
}

fn token_sort(a: &str, b: &str) -> u8 {
    let sa = a.split(' ').sorted().join(" ");
    let sb = b.split(' ').sorted().join(" ");
    ratio(&sa, &sb)
}

fn token_set(a: &str, b: &str) -> u8 {
    let ta = token_set_of(a);
    let tb = token_set_of(b);

    let sect = ta.intersection(&tb).join(" ");
    let only_a = ta.difference(&tb).join(" ");
    let only_b = tb.difference(&ta).join(" ");

    let with_a = format!("{sect} {only_a}").trim().to_string();
    let with_b = format!("{sect} {only_b}").trim().to_string();

    ratio(&sect, &with_a)
        .max(ratio(&sect, &with_b))
        .max(ratio(&with_a, &with_b))
}

fn partial(a: &str, b: &str) -> u8 {
    let (shorter, longer) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    let short_len = shorter.chars().count();
    let long_chars: Vec<char> = longer.chars().collect();
    if short_len == long_chars.len() {
        return ratio(shorter, longer);
    }

    let mut best = 0;
    for window in long_chars.windows(short_len) {
        let window: String = window.iter().collect();
        best = best.max(ratio(shorter, &window));
        if best == 100 {
            break;
        }
    }
    best
}

fn jaccard(a: &str, b: &str) -> u8 {
    let ta = token_set_of(a);
    let tb = token_set_of(b);
    if ta.is_empty() && tb.is_empty() {
        return 100;
    }
    let inter = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    if union == 0.0 { 0 } else { to_score(inter / union) }
}
