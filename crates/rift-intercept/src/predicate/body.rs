//! Request body predicates.

use super::path::form_to_json;
use bytes::Bytes;
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

pub type BodyFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Finalized request body as seen by body predicates.
#[derive(Debug, Clone, Copy)]
pub struct BodyView<'a> {
    /// UTF-8 text, or lowercase hex when `binary`
    pub text: &'a str,
    pub binary: bool,
    pub content_type: Option<&'a str>,
}

impl<'a> BodyView<'a> {
    /// Structured form of the body: JSON when it parses (or the content type
    /// says so), form fields for urlencoded bodies, the raw text otherwise.
    pub fn parsed(&self) -> Value {
        parse_body(self.text, self.binary, self.content_type)
    }
}

pub(crate) fn parse_body(text: &str, binary: bool, content_type: Option<&str>) -> Value {
    if binary {
        return Value::String(text.to_string());
    }
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|m| m.trim().to_lowercase())
        .unwrap_or_default();
    if mime == "application/x-www-form-urlencoded" {
        return form_to_json(text);
    }
    match serde_json::from_str::<Value>(text) {
        Ok(value) => value,
        Err(_) => Value::String(text.to_string()),
    }
}

/// Matcher for the finalized request body.
#[derive(Clone)]
pub enum BodyMatcher {
    /// Exact text comparison
    Exact(String),
    /// Exact byte comparison; binary bodies compare by their hex form
    Bytes(Bytes),
    Pattern(Arc<Regex>),
    /// Deep equality against the parsed body
    Json(Value),
    Custom(BodyFn),
}

impl BodyMatcher {
    pub fn json(value: Value) -> Self {
        BodyMatcher::Json(value)
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        BodyMatcher::Custom(Arc::new(f))
    }

    pub fn matches(&self, body: &BodyView<'_>) -> bool {
        match self {
            BodyMatcher::Exact(expected) => expected == body.text,
            BodyMatcher::Bytes(expected) => {
                if body.binary {
                    hex::encode(expected) == body.text
                } else {
                    expected.as_ref() == body.text.as_bytes()
                }
            }
            BodyMatcher::Pattern(regex) => regex.is_match(body.text),
            BodyMatcher::Json(expected) => {
                // An empty expectation object accepts an empty body
                if body.text.is_empty() {
                    return matches!(expected, Value::Object(m) if m.is_empty())
                        || expected == &Value::String(String::new());
                }
                &body.parsed() == expected
            }
            BodyMatcher::Custom(f) => f(&body.parsed()),
        }
    }
}

impl fmt::Debug for BodyMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyMatcher::Exact(s) => f.debug_tuple("Exact").field(s).finish(),
            BodyMatcher::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            BodyMatcher::Pattern(r) => f.debug_tuple("Pattern").field(&r.as_str()).finish(),
            BodyMatcher::Json(v) => f.debug_tuple("Json").field(v).finish(),
            BodyMatcher::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

impl From<&str> for BodyMatcher {
    fn from(body: &str) -> Self {
        BodyMatcher::Exact(body.to_string())
    }
}

impl From<String> for BodyMatcher {
    fn from(body: String) -> Self {
        BodyMatcher::Exact(body)
    }
}

impl From<Regex> for BodyMatcher {
    fn from(regex: Regex) -> Self {
        BodyMatcher::Pattern(Arc::new(regex))
    }
}

impl From<Value> for BodyMatcher {
    fn from(value: Value) -> Self {
        BodyMatcher::Json(value)
    }
}

impl From<Bytes> for BodyMatcher {
    fn from(bytes: Bytes) -> Self {
        BodyMatcher::Bytes(bytes)
    }
}
