//! Path and query predicates.

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub type PathFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;
pub type QueryFn = Arc<dyn Fn(&BTreeMap<String, String>) -> bool + Send + Sync>;

/// Matcher for the request path.
#[derive(Clone)]
pub enum PathMatcher {
    /// Exact comparison
    Exact(String),
    Pattern(Arc<Regex>),
    Custom(PathFn),
}

impl PathMatcher {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        PathMatcher::Custom(Arc::new(f))
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathMatcher::Exact(expected) => expected == path,
            PathMatcher::Pattern(regex) => regex.is_match(path),
            PathMatcher::Custom(f) => f(path),
        }
    }

    /// Human readable form, used in pending-mock listings and logs.
    pub fn describe(&self) -> String {
        match self {
            PathMatcher::Exact(path) => path.clone(),
            PathMatcher::Pattern(regex) => format!("/{}/", regex.as_str()),
            PathMatcher::Custom(_) => "<fn>".to_string(),
        }
    }
}

impl fmt::Debug for PathMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PathMatcher({})", self.describe())
    }
}

impl From<&str> for PathMatcher {
    fn from(path: &str) -> Self {
        PathMatcher::Exact(path.to_string())
    }
}

impl From<String> for PathMatcher {
    fn from(path: String) -> Self {
        PathMatcher::Exact(path)
    }
}

impl From<Regex> for PathMatcher {
    fn from(regex: Regex) -> Self {
        PathMatcher::Pattern(Arc::new(regex))
    }
}

/// Matcher for the parsed query string.
///
/// When a record declares a query matcher, its path matcher only sees the
/// pathname. Without one, the path matcher sees the path including the query.
#[derive(Clone)]
pub enum QueryMatcher {
    /// Accept any query string
    Any,
    /// Exactly these parameters, no extra ones
    Exact(BTreeMap<String, String>),
    Custom(QueryFn),
}

impl QueryMatcher {
    pub fn exact<K, V, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        QueryMatcher::Exact(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&BTreeMap<String, String>) -> bool + Send + Sync + 'static,
    {
        QueryMatcher::Custom(Arc::new(f))
    }

    pub fn matches(&self, query: Option<&str>) -> bool {
        match self {
            QueryMatcher::Any => true,
            QueryMatcher::Exact(expected) => &parse_query_string(query) == expected,
            QueryMatcher::Custom(f) => f(&parse_query_string(query)),
        }
    }
}

impl fmt::Debug for QueryMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryMatcher::Any => f.write_str("QueryMatcher::Any"),
            QueryMatcher::Exact(map) => f.debug_tuple("QueryMatcher::Exact").field(map).finish(),
            QueryMatcher::Custom(_) => f.write_str("QueryMatcher::Custom(<fn>)"),
        }
    }
}

/// Parse a query (or form-urlencoded body) into a map, URL-decoding keys and values.
///
/// `+` is decoded as a space. Repeated keys keep the last value.
pub fn parse_query_string(query: Option<&str>) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    let Some(q) = query else {
        return params;
    };
    for pair in q.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params.insert(decode_component(key), decode_component(value));
    }
    params
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

/// Form-urlencoded body as a JSON object of strings, for deep comparison.
pub(crate) fn form_to_json(body: &str) -> Value {
    Value::Object(
        parse_query_string(Some(body))
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_string_decodes() {
        let parsed = parse_query_string(Some("name=alice%20smith&tag=a+b&flag"));
        assert_eq!(parsed.get("name"), Some(&"alice smith".to_string()));
        assert_eq!(parsed.get("tag"), Some(&"a b".to_string()));
        assert_eq!(parsed.get("flag"), Some(&String::new()));
    }

    #[test]
    fn test_exact_query_rejects_extra_params() {
        let matcher = QueryMatcher::exact([("id", "1")]);
        assert!(matcher.matches(Some("id=1")));
        assert!(!matcher.matches(Some("id=1&x=2")));
        assert!(!matcher.matches(None));
    }

    #[test]
    fn test_any_and_custom_query() {
        assert!(QueryMatcher::Any.matches(None));
        let matcher = QueryMatcher::custom(|q| q.contains_key("page"));
        assert!(matcher.matches(Some("page=2")));
        assert!(!matcher.matches(Some("limit=2")));
    }

    #[test]
    fn test_path_matchers() {
        assert!(PathMatcher::from("/a").matches("/a"));
        assert!(!PathMatcher::from("/a").matches("/a/b"));
        let pattern = PathMatcher::from(Regex::new(r"^/users/\d+$").unwrap());
        assert!(pattern.matches("/users/42"));
        assert!(!pattern.matches("/users/me"));
        assert!(PathMatcher::custom(|p| p.len() > 3).matches("/long"));
    }

    #[test]
    fn test_form_to_json() {
        let value = form_to_json("a=1&b=two");
        assert_eq!(value, serde_json::json!({"a": "1", "b": "two"}));
    }
}
