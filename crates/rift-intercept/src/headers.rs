//! Ordered raw header lists.
//!
//! Responses keep headers as ordered `(name, value)` pairs: duplicate names are
//! legal and must round-trip in their original order. Lookups are
//! case-insensitive, storage keeps the caller's casing.

use crate::request::{CapturedRequest, ResponseHead};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Header function evaluated once the reply body is resolved.
pub type HeaderFn = Arc<dyn Fn(&CapturedRequest, &ResponseHead, &[u8]) -> String + Send + Sync>;

/// Ordered list of raw header pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderList(Vec<(String, String)>);

impl HeaderList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a pair, keeping any existing pairs with the same name.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// First value for `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name`, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Replace every pair named `name` with a single pair.
    ///
    /// The new pair takes the position of the first removed one, or is
    /// appended when the header was absent.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter().position(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            Some(first) => {
                self.0[first] = (name.clone(), value);
                let mut index = 0;
                self.0.retain(|(k, _)| {
                    let keep = index == first || !k.eq_ignore_ascii_case(&name);
                    index += 1;
                    keep
                });
            }
            None => self.0.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.0.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    pub(crate) fn set_value_at(&mut self, index: usize, value: String) {
        if let Some(pair) = self.0.get_mut(index) {
            pair.1 = value;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_pairs(self) -> Vec<(String, String)> {
        self.0
    }
}

impl<K, V> FromIterator<(K, V)> for HeaderList
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Value of a reply header: either fixed, or computed from the final body.
#[derive(Clone)]
pub enum HeaderValueSource {
    Static(String),
    Dynamic(HeaderFn),
}

impl HeaderValueSource {
    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn(&CapturedRequest, &ResponseHead, &[u8]) -> String + Send + Sync + 'static,
    {
        HeaderValueSource::Dynamic(Arc::new(f))
    }
}

impl fmt::Debug for HeaderValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValueSource::Static(value) => f.debug_tuple("Static").field(value).finish(),
            HeaderValueSource::Dynamic(_) => f.write_str("Dynamic(<fn>)"),
        }
    }
}

impl From<&str> for HeaderValueSource {
    fn from(value: &str) -> Self {
        HeaderValueSource::Static(value.to_string())
    }
}

impl From<String> for HeaderValueSource {
    fn from(value: String) -> Self {
        HeaderValueSource::Static(value)
    }
}

/// Reply header templates, in declaration order.
pub type ReplyHeaders = Vec<(String, HeaderValueSource)>;

/// Whether the headers declare a content encoding other than `identity`.
pub fn is_content_encoded(headers: &HeaderList) -> bool {
    headers.get("content-encoding").map(is_encoding).unwrap_or(false)
}

/// Whether a `Content-Encoding` value actually transforms the body.
pub fn is_encoding(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && !value.eq_ignore_ascii_case("identity")
}

/// Whether a content type denotes JSON (`application/json`, `+json` suffixes).
pub fn is_json_content(headers: &HeaderList) -> bool {
    headers
        .get("content-type")
        .map(|ct| {
            let mime = ct.split(';').next().unwrap_or("").trim().to_lowercase();
            mime == "application/json" || mime.ends_with("+json")
        })
        .unwrap_or(false)
}
