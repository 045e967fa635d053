//! Finalized request view handed to reply callbacks and notifications.

use crate::headers::HeaderList;
use crate::predicate::{parse_body, BodyView};
use crate::target::RequestHead;
use serde::Serialize;
use serde_json::Value;

/// A finalized outgoing request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedRequest {
    pub method: String,
    pub url: String,
    pub path: String,
    pub headers: HeaderList,
    /// UTF-8 body text, or lowercase hex when `binary`
    pub body: String,
    pub binary: bool,
    /// JSON value when the body parses as JSON, form fields for urlencoded
    /// bodies, the body text otherwise
    pub parsed_body: Value,
}

impl CapturedRequest {
    pub(crate) fn capture(head: &RequestHead, body: &[u8]) -> Self {
        let (text, binary) = classify_body(body);
        let parsed_body = parse_body(&text, binary, head.headers.get("content-type"));
        Self {
            method: head.method.clone(),
            url: head.url(),
            path: head.path.clone(),
            headers: head.headers.clone(),
            body: text,
            binary,
            parsed_body,
        }
    }

    pub fn body_view(&self) -> BodyView<'_> {
        BodyView {
            text: &self.body,
            binary: self.binary,
            content_type: self.headers.get("content-type"),
        }
    }
}

/// Text if the bytes are valid UTF-8, lowercase hex otherwise.
pub(crate) fn classify_body(body: &[u8]) -> (String, bool) {
    match std::str::from_utf8(body) {
        Ok(text) => (text.to_string(), false),
        Err(_) => (hex::encode(body), true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_body_is_parsed_as_json() {
        let head = RequestHead::post("http://x.test/items")
            .unwrap()
            .header("Content-Type", "application/json");
        let captured = CapturedRequest::capture(&head, br#"{"id":1}"#);
        assert!(!captured.binary);
        assert_eq!(captured.parsed_body, json!({"id": 1}));
        assert_eq!(captured.url, "http://x.test:80/items");
    }

    #[test]
    fn test_binary_body_is_hex() {
        let head = RequestHead::post("http://x.test/upload").unwrap();
        let captured = CapturedRequest::capture(&head, &[0xde, 0xad, 0xbe, 0xef, 0xff]);
        assert!(captured.binary);
        assert_eq!(captured.body, "deadbeefff");
    }

    #[test]
    fn test_serializes_camel_case() {
        let head = RequestHead::get("http://x.test/").unwrap();
        let value = serde_json::to_value(CapturedRequest::capture(&head, b"")).unwrap();
        assert!(value.get("parsedBody").is_some());
    }
}
