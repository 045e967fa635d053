//! String value matching shared by header and path predicates.

use regex::Regex;
use std::sync::Arc;

/// A string with a pre-computed lowercase form for case-insensitive matching.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    pub value: String,
    pub lower: String,
}

impl CachedValue {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        let lower = value.to_lowercase();
        Self { value, lower }
    }

    #[inline]
    fn prepare<'a>(&'a self, actual: &str, case_sensitive: bool) -> (String, &'a str) {
        if case_sensitive {
            (actual.to_string(), &self.value)
        } else {
            (actual.to_lowercase(), &self.lower)
        }
    }
}

/// Matcher for a single string value (header value, path, host).
#[derive(Debug, Clone)]
pub enum ValueMatcher {
    Equals(CachedValue),
    Contains(CachedValue),
    StartsWith(CachedValue),
    EndsWith(CachedValue),
    /// Case sensitivity is part of the pattern itself
    Regex(Arc<Regex>),
}

impl ValueMatcher {
    pub fn equals(value: impl Into<String>) -> Self {
        Self::Equals(CachedValue::new(value))
    }

    pub fn contains(value: impl Into<String>) -> Self {
        Self::Contains(CachedValue::new(value))
    }

    pub fn starts_with(value: impl Into<String>) -> Self {
        Self::StartsWith(CachedValue::new(value))
    }

    pub fn ends_with(value: impl Into<String>) -> Self {
        Self::EndsWith(CachedValue::new(value))
    }

    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::Regex(Arc::new(Regex::new(pattern)?)))
    }

    pub fn matches(&self, actual: &str, case_sensitive: bool) -> bool {
        match self {
            Self::Equals(expected) => {
                let (actual, expected) = expected.prepare(actual, case_sensitive);
                actual == expected
            }
            Self::Contains(expected) => {
                let (actual, expected) = expected.prepare(actual, case_sensitive);
                actual.contains(expected)
            }
            Self::StartsWith(expected) => {
                let (actual, expected) = expected.prepare(actual, case_sensitive);
                actual.starts_with(expected)
            }
            Self::EndsWith(expected) => {
                let (actual, expected) = expected.prepare(actual, case_sensitive);
                actual.ends_with(expected)
            }
            Self::Regex(regex) => regex.is_match(actual),
        }
    }
}

impl From<&str> for ValueMatcher {
    fn from(value: &str) -> Self {
        Self::equals(value)
    }
}

impl From<String> for ValueMatcher {
    fn from(value: String) -> Self {
        Self::equals(value)
    }
}

impl From<Regex> for ValueMatcher {
    fn from(regex: Regex) -> Self {
        Self::Regex(Arc::new(regex))
    }
}
