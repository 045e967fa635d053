//! Header predicates.

use super::value::ValueMatcher;
use crate::headers::HeaderList;

/// A header that must be present with a matching value.
///
/// Names are compared case-insensitively, values case-sensitively. When the
/// header repeats, any one value may satisfy the matcher.
#[derive(Debug, Clone)]
pub struct HeaderMatcher {
    pub name: String,
    pub value: ValueMatcher,
}

impl HeaderMatcher {
    pub fn new(name: impl Into<String>, value: impl Into<ValueMatcher>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, headers: &HeaderList) -> bool {
        headers
            .get_all(&self.name)
            .any(|actual| self.value.matches(actual, true))
    }
}

/// All required headers match and no forbidden header is present.
pub fn headers_satisfied(
    headers: &HeaderList,
    required: &[HeaderMatcher],
    forbidden: &[String],
) -> bool {
    if forbidden.iter().any(|name| headers.contains(name)) {
        return false;
    }
    required.iter().all(|m| m.matches(headers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    fn headers() -> HeaderList {
        [
            ("Host", "x.test"),
            ("Accept", "text/html"),
            ("accept", "application/json"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_any_repeated_value_matches() {
        let matcher = HeaderMatcher::new("ACCEPT", "application/json");
        assert!(matcher.matches(&headers()));
        assert!(!HeaderMatcher::new("accept", "APPLICATION/JSON").matches(&headers()));
    }

    #[test]
    fn test_regex_header_value() {
        let matcher = HeaderMatcher::new("host", Regex::new(r"\.test$").unwrap());
        assert!(matcher.matches(&headers()));
    }

    #[test]
    fn test_forbidden_header_rejects() {
        let required = vec![HeaderMatcher::new("host", "x.test")];
        assert!(headers_satisfied(&headers(), &required, &[]));
        assert!(!headers_satisfied(
            &headers(),
            &required,
            &["Accept".to_string()]
        ));
        assert!(headers_satisfied(
            &headers(),
            &required,
            &["authorization".to_string()]
        ));
    }
}
