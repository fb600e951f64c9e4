//! Classification of incoming source URLs.

use std::sync::LazyLock;

use regex::Regex;

static TIKTOK_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^https?://(?:vt|vm|www)\.tiktok\.com/").expect("tiktok pattern is valid")
});

/// Which acquisition path a source URL takes.
///
/// Anything that is not a recognised TikTok link (including garbage input) is
/// treated as YouTube/generic; malformed URLs only fail later, at fetch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    TikTok,
    Generic,
}

impl SourceKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::TikTok => "tiktok",
            Self::Generic => "generic",
        }
    }
}

pub fn classify(url: &str) -> SourceKind {
    if TIKTOK_PREFIX.is_match(url.trim()) {
        SourceKind::TikTok
    } else {
        SourceKind::Generic
    }
}
