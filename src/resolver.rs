//! URL resolution at submission time.
//!
//! The orchestrator runs an optional [`UrlResolver`] on every submitted URL to
//! pick the task kind and a canonical form. Without one, [`classify_url`]
//! decides the kind from the URL path alone.
//!
//! [`PatternResolver`] is the reference resolver: it classifies by path and
//! pulls the item ID out with a fixed set of patterns. It does no network I/O,
//! so short-link redirects are left to the strategies.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;
use url::Url;

use crate::queue::TaskKind;

/// Errors from URL resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// Input is not an absolute http(s) URL.
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The resolver recognizes nothing in this URL.
    #[error("unsupported URL: {url}")]
    Unsupported { url: String },

    /// Resolution was attempted and failed.
    #[error("failed to resolve {url}: {message}")]
    Failed { url: String, message: String },
}

/// Result of resolving one submitted URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUrl {
    pub kind: TaskKind,
    pub canonical_url: String,
    /// Item, user or collection ID when one could be extracted.
    pub extracted_id: Option<String>,
}

impl ResolvedUrl {
    #[must_use]
    pub fn new(kind: TaskKind, canonical_url: impl Into<String>) -> Self {
        Self {
            kind,
            canonical_url: canonical_url.into(),
            extracted_id: None,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.extracted_id = Some(id.into());
        self
    }
}

/// Turns a submitted URL into a kind and canonical URL.
#[async_trait]
pub trait UrlResolver: Send + Sync {
    /// Resolves `url`.
    async fn resolve(&self, url: &str) -> Result<ResolvedUrl, ResolveError>;
}

/// Default classification by URL path.
///
/// Checked in order: `/user/`, `/video/` or `/note/`, `/music/`, `/mix/` or
/// `/collection/`, then a `live.douyin.com` host. Anything else is a video.
#[must_use]
pub fn classify_url(url: &str) -> TaskKind {
    let lower = url.to_lowercase();
    if lower.contains("/user/") {
        TaskKind::User
    } else if lower.contains("/video/") || lower.contains("/note/") {
        TaskKind::Video
    } else if lower.contains("/music/") {
        TaskKind::Music
    } else if lower.contains("/mix/") || lower.contains("/collection/") {
        TaskKind::Mix
    } else if lower.contains("live.douyin.com") {
        TaskKind::Live
    } else {
        TaskKind::Video
    }
}

fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

static USER_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"/user/([^/?#]+)"));
static ITEM_ID_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"/(?:video|note)/(\d+)",
        r"[?&](?:modal_id|aweme_id|item_id)=(\d+)",
        r"/share/item/(\d+)",
    ]
    .into_iter()
    .map(compile_static_regex)
    .collect()
});
static MIX_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"/(?:mix/detail|mix|collection)/(\d+)"));
static MUSIC_ID_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"/music/(\d+)"));
static LIVE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"live\.douyin\.com/([A-Za-z0-9_]+)"));
static LONG_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"(\d{15,20})"));

fn capture(re: &Regex, haystack: &str) -> Option<String> {
    re.captures(haystack)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Path-based resolver with regex ID extraction.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternResolver;

impl PatternResolver {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn extract_id(kind: TaskKind, url: &str) -> Option<String> {
        let found = match kind {
            TaskKind::User => capture(&USER_ID_RE, url),
            TaskKind::Video | TaskKind::Image => {
                ITEM_ID_RES.iter().find_map(|re| capture(re, url))
            }
            TaskKind::Mix => capture(&MIX_ID_RE, url),
            TaskKind::Music => capture(&MUSIC_ID_RE, url),
            TaskKind::Live => capture(&LIVE_ID_RE, url),
        };
        found.or_else(|| {
            // Bare item IDs show up in unusual share links.
            matches!(kind, TaskKind::Video | TaskKind::Image)
                .then(|| capture(&LONG_NUMBER_RE, url))
                .flatten()
        })
    }
}

#[async_trait]
impl UrlResolver for PatternResolver {
    async fn resolve(&self, url: &str) -> Result<ResolvedUrl, ResolveError> {
        let trimmed = url.trim();
        let mut parsed = Url::parse(trimmed).map_err(|e| ResolveError::InvalidUrl {
            url: trimmed.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ResolveError::InvalidUrl {
                url: trimmed.to_string(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }
        parsed.set_fragment(None);

        let canonical = parsed.to_string();
        let kind = classify_url(&canonical);
        let resolved = ResolvedUrl::new(kind, canonical.clone());
        Ok(match Self::extract_id(kind, &canonical) {
            Some(id) => resolved.with_id(id),
            None => resolved,
        })
    }
}
