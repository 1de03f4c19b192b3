//! Allow-list filtering and sanitization of labels and annotations.
//!
//! Tag content is forwarded verbatim as metric label values, so anything that
//! a strict HTML policy would rewrite is dropped before patterns are even
//! consulted.

use crate::resource::Tags;
use regex::Regex;
use serde::Deserialize;
use std::{collections::BTreeMap, sync::LazyLock};
use tracing::warn;

/// A pattern matched against tag keys.
#[derive(Clone, Debug, Deserialize)]
#[serde(try_from = "PatternConfig")]
pub enum Pattern {
    Exact(String),
    Prefix(String),
    Suffix(String),
    Contains(String),
    Regex(Regex),
}

#[derive(Debug, thiserror::Error)]
pub enum PatternError {
    #[error("invalid pattern regex {pattern:?}: {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("unknown pattern match type: {0}")]
    UnknownMatch(String),
}

/// Patterns may be written as a bare regex or as `{pattern, match}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum PatternConfig {
    Regex(String),
    Entry {
        pattern: String,
        #[serde(rename = "match")]
        kind: Option<String>,
    },
}

/// Strips every element and attribute.
static POLICY: LazyLock<ammonia::Builder<'static>> = LazyLock::new(ammonia::Builder::empty);

/// Returns the subset of `tags` that are sanitary and whose key matches at
/// least one of `patterns`.
///
/// Returns an empty map when `enabled` is false.
pub fn filter(tags: &BTreeMap<String, String>, patterns: &[Pattern], enabled: bool) -> Tags {
    if !enabled {
        return Tags::new();
    }

    tags.iter()
        .filter(|(key, value)| eval_tag(key, value, patterns))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn eval_tag(key: &str, value: &str, patterns: &[Pattern]) -> bool {
    if !is_sanitary(key) {
        warn!(tag = %key, "Tag does not satisfy filter policy");
        return false;
    }
    if !is_sanitary(value) {
        warn!(tag = %key, %value, "Tag value does not satisfy filter policy");
        return false;
    }

    patterns.iter().any(|p| p.matches(key))
}

/// Returns true if sanitizing `s` leaves it unchanged.
///
/// Quotes are escaped in sanitized text, so a string containing one is never
/// sanitary.
pub fn is_sanitary(s: &str) -> bool {
    !s.contains(['"', '\'']) && POLICY.clean(s).to_string() == s
}

// === impl Pattern ===

impl Pattern {
    pub fn regex(pattern: &str) -> Result<Self, PatternError> {
        Regex::new(pattern)
            .map(Self::Regex)
            .map_err(|source| PatternError::Regex {
                pattern: pattern.to_string(),
                source,
            })
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Exact(p) => key == p,
            Self::Prefix(p) => key.starts_with(p.as_str()),
            Self::Suffix(p) => key.ends_with(p.as_str()),
            Self::Contains(p) => key.contains(p.as_str()),
            Self::Regex(re) => re.is_match(key),
        }
    }
}

impl TryFrom<PatternConfig> for Pattern {
    type Error = PatternError;

    fn try_from(config: PatternConfig) -> Result<Self, Self::Error> {
        let (pattern, kind) = match config {
            PatternConfig::Regex(pattern) => return Self::regex(&pattern),
            PatternConfig::Entry { pattern, kind } => (pattern, kind),
        };

        match kind.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("regex") => Self::regex(&pattern),
            Some("exact") => Ok(Self::Exact(pattern)),
            Some("prefix") => Ok(Self::Prefix(pattern)),
            Some("suffix") => Ok(Self::Suffix(pattern)),
            Some("contains") => Ok(Self::Contains(pattern)),
            Some(other) => Err(PatternError::UnknownMatch(other.to_string())),
        }
    }
}

impl std::str::FromStr for Pattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::regex(s)
    }
}
