use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use std::ops::Range;

/// The normalized search string. Empty means "show everything".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query(String);

impl Query {
    pub fn normalize(raw: &str) -> Self {
        Self(fold(raw.trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Plain substring containment against already folded text.
    pub fn is_contained_in(&self, folded: &str) -> bool {
        self.is_empty() || folded.contains(self.as_str())
    }
}

/// Case folding applied to both sides of every comparison.
pub fn fold(text: &str) -> String {
    text.to_lowercase()
}

/// Finds case-insensitive occurrences of a query taken as a literal.
#[derive(Debug, Clone)]
pub struct Matcher {
    regex: Regex,
}

impl Matcher {
    /// Returns `None` for the empty query.
    pub fn new(query: &Query) -> Result<Option<Self>> {
        if query.is_empty() {
            return Ok(None);
        }
        let regex = RegexBuilder::new(&regex::escape(query.as_str()))
            .case_insensitive(true)
            .size_limit(64 * (1 << 20))
            .build()
            .with_context(|| format!("Failed to compile matcher for {:?}", query.as_str()))?;
        Ok(Some(Self { regex }))
    }

    /// Non-overlapping byte ranges of every occurrence, left to right.
    pub fn find_ranges(&self, text: &str) -> Vec<Range<usize>> {
        self.regex.find_iter(text).map(|m| m.range()).collect()
    }
}
