//! Canonical form of article links.
//!
//! Two links point at the same story if and only if their normalized forms are
//! string-equal. Normalization lower-cases scheme and host, drops default
//! ports and fragments, removes tracking query parameters, sorts what is left
//! of the query and strips trailing slashes from non-root paths.
//!
//! The function is total: a link that cannot be parsed is returned trimmed
//! instead of failing the pass.

use std::collections::HashSet;
use tracing::debug;
use url::Url;

/// Query parameters that only identify the referrer or the campaign.
const DEFAULT_TRACKING_PARAMS: &[&str] = &[
    "fbclid",
    "gclid",
    "dclid",
    "gclsrc",
    "msclkid",
    "yclid",
    "igshid",
    "mc_cid",
    "mc_eid",
    "_ga",
    "_gl",
    "_hsenc",
    "_hsmi",
    "mkt_tok",
    "ref",
    "ref_src",
    "ref_url",
    "referrer",
    "cmpid",
    "ocid",
    "smid",
    "at_medium",
    "at_campaign",
    "sessionid",
    "session_id",
    "phpsessid",
    "jsessionid",
    "sid",
];

/// Any parameter starting with one of these is tracking, e.g. `utm_source`.
const TRACKING_PREFIXES: &[&str] = &["utm_"];

/// Link canonicalizer with a configurable set of tracking parameters.
#[derive(Debug, Clone)]
pub struct UrlNormalizer {
    tracking: HashSet<String>,
}

impl Default for UrlNormalizer {
    fn default() -> Self {
        Self::new(std::iter::empty::<String>())
    }
}

impl UrlNormalizer {
    /// Build a normalizer that strips the default tracking parameters plus `extra`.
    pub fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tracking = DEFAULT_TRACKING_PARAMS
            .iter()
            .map(|p| p.to_string())
            .chain(extra.into_iter().map(|p| p.as_ref().trim().to_ascii_lowercase()))
            .filter(|p| !p.is_empty())
            .collect();
        Self { tracking }
    }

    fn is_tracking(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        TRACKING_PREFIXES.iter().any(|p| name.starts_with(p)) || self.tracking.contains(&name)
    }

    /// Normalize a link. Returns `None` for an empty or blank link.
    pub fn normalize(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        let Ok(mut url) = Url::parse(trimmed) else {
            debug!(url = %trimmed, "Unparseable link; comparing it verbatim");
            return Some(trimmed.to_string());
        };

        url.set_fragment(None);

        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| !self.is_tracking(key))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if pairs.is_empty() {
            url.set_query(None);
        } else {
            pairs.sort();
            url.query_pairs_mut().clear().extend_pairs(pairs);
        }

        if !url.cannot_be_a_base() {
            let path = url.path();
            if path.len() > 1 && path.ends_with('/') {
                let trimmed_path = path.trim_end_matches('/').to_string();
                if trimmed_path.is_empty() {
                    url.set_path("/");
                } else {
                    url.set_path(&trimmed_path);
                }
            }
        }

        Some(url.to_string())
    }

    /// Whether two raw links normalize to the same resource.
    #[cfg(test)]
    pub fn same_resource(&self, a: &str, b: &str) -> bool {
        match (self.normalize(a), self.normalize(b)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(u: &str) -> String {
        UrlNormalizer::default().normalize(u).unwrap()
    }

    #[test]
    fn test_tracking_params_removed() {
        assert_eq!(
            norm("https://ex.com/a?utm_source=x&id=1"),
            norm("https://ex.com/a?id=1")
        );
        assert_eq!(
            norm("https://ex.com/a?fbclid=abc&UTM_Medium=rss&gclid=z"),
            "https://ex.com/a"
        );
    }

    #[test]
    fn test_scheme_host_port_and_fragment() {
        assert_eq!(norm("HTTP://Ex.COM:80/Story/#comments"), "http://ex.com/Story");
        assert_eq!(norm("https://ex.com:443/a"), "https://ex.com/a");
        assert_eq!(norm("https://ex.com:8443/a"), "https://ex.com:8443/a");
    }

    #[test]
    fn test_query_sorted() {
        assert_eq!(norm("https://ex.com/a?b=2&a=1"), "https://ex.com/a?a=1&b=2");
        assert_eq!(norm("https://ex.com/a?b=2&a=1"), norm("https://ex.com/a?a=1&b=2"));
    }

    #[test]
    fn test_trailing_slash() {
        assert_eq!(norm("https://ex.com/news/story/"), "https://ex.com/news/story");
        assert_eq!(norm("https://ex.com/news//"), "https://ex.com/news");
        assert_eq!(norm("https://ex.com"), norm("https://ex.com/"));
    }

    #[test]
    fn test_malformed_falls_back_to_trimmed_input() {
        assert_eq!(norm("  not a url  "), "not a url");
        assert_eq!(norm("/relative/story/"), "/relative/story/");
    }

    #[test]
    fn test_blank_is_none() {
        let urls = UrlNormalizer::default();
        assert_eq!(urls.normalize(""), None);
        assert_eq!(urls.normalize("   "), None);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let urls = UrlNormalizer::default();
        for u in [
            "https://ex.com/a?utm_source=x&id=1",
            "HTTP://Ex.COM:80/Story/#comments",
            "https://ex.com/search?q=rust+lang&page=2&ref=home",
            "https://ex.com/a?flag&b=%7E",
            "https://ex.com/%E2%9C%93/",
            "mailto:editor@ex.com",
            "not a url",
            "https://ex.com",
        ] {
            let once = urls.normalize(u).unwrap();
            let twice = urls.normalize(&once).unwrap();
            assert_eq!(once, twice, "normalize not idempotent for {u}");
        }
    }

    #[test]
    fn test_extra_tracking_params() {
        let urls = UrlNormalizer::new(["Partner", "src"]);
        assert_eq!(
            urls.normalize("https://ex.com/a?partner=feedly&src=rss&id=4").unwrap(),
            "https://ex.com/a?id=4"
        );
        assert!(urls.same_resource(
            "https://ex.com/a/?id=4&utm_campaign=spring",
            "https://EX.com/a?id=4"
        ));
        assert!(!urls.same_resource("", ""));
    }
}
