//! Locator parsing
//!
//! Turns the URL-like strings found in crawl requests into the id they point
//! at. Parsing is purely syntactic; nothing here calls the source.

use crate::source::SourceError;
use url::Url;

/// What a locator points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// A parent by external id (`/channel/<id>`)
    Parent(String),
    /// A parent by alternate key (`/@handle`, `/c/<name>`, `/user/<name>`)
    ParentKey(String),
    /// A child by external id (`watch?v=<id>`, `youtu.be/<id>`, `/shorts/<id>`)
    Child(String),
    /// A child collection (`playlist?list=<id>`)
    Collection(String),
}

/// Hosts accepted as the remote site
const SITE_HOSTS: &[&str] = &["youtube.com", "m.youtube.com", "music.youtube.com"];
const SHORT_HOST: &str = "youtu.be";

/// Parses a locator
///
/// # Arguments
///
/// * `raw` - A URL, with or without scheme, or a bare `@handle`
///
/// # Returns
///
/// * `Ok(Locator)` - What the locator points at
/// * `Err(SourceError::Malformed)` - Unparseable, foreign host, or unrecognized path
///
/// # Examples
///
/// ```
/// use quota_harvest::source::{parse_locator, Locator};
///
/// let locator = parse_locator("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42").unwrap();
/// assert_eq!(locator, Locator::Child("dQw4w9WgXcQ".to_string()));
/// ```
pub fn parse_locator(raw: &str) -> Result<Locator, SourceError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(malformed(raw, "empty locator"));
    }
    if raw.starts_with('@') && !raw.contains('/') {
        return Ok(Locator::ParentKey(raw.to_string()));
    }

    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    };
    let url = Url::parse(&with_scheme).map_err(|e| malformed(raw, &e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(malformed(raw, "unsupported scheme"));
    }

    let host = url
        .host_str()
        .map(|h| h.to_lowercase())
        .ok_or_else(|| malformed(raw, "missing host"))?;
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    if host == SHORT_HOST {
        return match segments.first() {
            Some(id) => Ok(Locator::Child(id.to_string())),
            None => Err(malformed(raw, "missing video id")),
        };
    }
    if !SITE_HOSTS.contains(&host.as_str()) {
        return Err(malformed(raw, "unrecognized host"));
    }

    let query = |name: &str| {
        url.query_pairs()
            .find(|(k, v)| k == name && !v.is_empty())
            .map(|(_, v)| v.into_owned())
    };

    match segments.as_slice() {
        ["watch"] => query("v")
            .map(Locator::Child)
            .ok_or_else(|| malformed(raw, "missing v parameter")),
        ["playlist"] => query("list")
            .map(Locator::Collection)
            .ok_or_else(|| malformed(raw, "missing list parameter")),
        ["shorts", id, ..] | ["embed", id, ..] | ["live", id, ..] => {
            Ok(Locator::Child(id.to_string()))
        }
        ["channel", id, ..] => Ok(Locator::Parent(id.to_string())),
        ["c", name, ..] | ["user", name, ..] => Ok(Locator::ParentKey(name.to_string())),
        [handle, ..] if handle.starts_with('@') => Ok(Locator::ParentKey(handle.to_string())),
        _ => Err(malformed(raw, "unrecognized path")),
    }
}

fn malformed(raw: &str, reason: &str) -> SourceError {
    SourceError::Malformed(format!("locator '{}': {}", raw, reason))
}
