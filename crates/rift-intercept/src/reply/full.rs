//! Parsing of `[status, body?, headers?]` full-reply results.

use super::types::ReplyBody;
use crate::error::InterceptError;
use crate::headers::HeaderList;
use serde_json::Value;

#[derive(Debug)]
pub(crate) struct FullReply {
    pub status: u16,
    pub body: ReplyBody,
    pub headers: HeaderList,
}

pub(crate) fn parse_full_reply(value: Value) -> Result<FullReply, InterceptError> {
    let Value::Array(parts) = value else {
        return Err(InterceptError::MalformedReply(
            "full reply callback must return an array [status, body, headers]".to_string(),
        ));
    };
    if parts.len() > 3 {
        return Err(InterceptError::MalformedReply(format!(
            "full reply array must have at most 3 elements, got {}",
            parts.len()
        )));
    }

    let mut parts = parts.into_iter();
    let status = match parts.next() {
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|s| u16::try_from(s).ok())
            .ok_or_else(|| {
                InterceptError::MalformedReply(format!("invalid status code {n}"))
            })?,
        Some(other) => {
            return Err(InterceptError::MalformedReply(format!(
                "status code must be an integer, got {other}"
            )))
        }
        None => {
            return Err(InterceptError::MalformedReply(
                "full reply array must contain a status code".to_string(),
            ))
        }
    };

    let body = match parts.next() {
        None | Some(Value::Null) => ReplyBody::Empty,
        Some(Value::String(text)) => ReplyBody::Text(text),
        Some(other) => ReplyBody::Json(other),
    };

    let headers = match parts.next() {
        None | Some(Value::Null) => HeaderList::new(),
        Some(raw) => parse_headers(raw)?,
    };

    Ok(FullReply {
        status,
        body,
        headers,
    })
}

/// Headers as an object, an array of `[name, value]` pairs, or a flat
/// `[name, value, name, value]` array.
pub(crate) fn parse_headers(raw: Value) -> Result<HeaderList, InterceptError> {
    let mut headers = HeaderList::new();
    match raw {
        Value::Object(map) => {
            for (name, value) in map {
                match value {
                    Value::Array(values) => {
                        for v in values {
                            headers.push(name.clone(), header_value(v));
                        }
                    }
                    other => headers.push(name, header_value(other)),
                }
            }
        }
        Value::Array(items) if items.iter().all(Value::is_array) => {
            for item in items {
                let pair = match item {
                    Value::Array(pair) if pair.len() == 2 => pair,
                    _ => {
                        return Err(InterceptError::MalformedReply(
                            "header pairs must be [name, value]".to_string(),
                        ))
                    }
                };
                let mut pair = pair.into_iter();
                if let (Some(name), Some(value)) = (pair.next(), pair.next()) {
                    headers.push(header_value(name), header_value(value));
                }
            }
        }
        Value::Array(items) => {
            if items.len() % 2 != 0 {
                return Err(InterceptError::MalformedReply(
                    "flat header array must have an even number of elements".to_string(),
                ));
            }
            let mut items = items.into_iter();
            while let (Some(name), Some(value)) = (items.next(), items.next()) {
                headers.push(header_value(name), header_value(value));
            }
        }
        other => {
            return Err(InterceptError::MalformedReply(format!(
                "headers must be an object or an array, got {other}"
            )))
        }
    }
    Ok(headers)
}

fn header_value(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
