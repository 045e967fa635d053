//! Target identity and normalized outgoing-request descriptions.

use crate::error::InterceptError;
use crate::headers::HeaderList;
use hyper::Uri;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol of an outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl Protocol {
    pub fn from_scheme(scheme: &str) -> Result<Self, InterceptError> {
        match scheme.to_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            other => Err(InterceptError::InvalidTarget(format!(
                "unsupported protocol '{other}'"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Http => 80,
            Protocol::Https => 443,
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, Protocol::Https)
    }
}

/// Target identity: protocol, host and port.
///
/// Formats as the registry key, e.g. `http://x.test:80`. The port is always
/// explicit so `http://x.test` and `http://x.test:80` are the same target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetKey {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
}

impl TargetKey {
    /// Parse a base URL such as `https://api.example.com` or `http://x.test:8080`.
    pub fn parse(base: &str) -> Result<Self, InterceptError> {
        let base = base.trim();
        if base.is_empty() {
            return Err(InterceptError::EmptyTarget);
        }
        let uri: Uri = base
            .parse()
            .map_err(|_| InterceptError::InvalidTarget(base.to_string()))?;
        Self::from_uri(&uri, base)
    }

    fn from_uri(uri: &Uri, original: &str) -> Result<Self, InterceptError> {
        let protocol = match uri.scheme_str() {
            Some(scheme) => Protocol::from_scheme(scheme)?,
            None => Protocol::Http,
        };
        let host = uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| InterceptError::InvalidTarget(original.to_string()))?
            .to_lowercase();
        let port = uri.port_u16().unwrap_or_else(|| protocol.default_port());
        Ok(Self {
            protocol,
            host,
            port,
        })
    }

    /// `host:port`, the identity the network policy is evaluated against.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Value for a `Host` header: the port is omitted when it is the default.
    pub fn host_header(&self) -> String {
        if self.port == self.protocol.default_port() {
            self.host.clone()
        } else {
            self.authority()
        }
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol.as_str(), self.host, self.port)
    }
}

/// Normalized description of an outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    /// Upper-cased method
    pub method: String,
    pub target: TargetKey,
    /// Path including the query string, always starting with `/`
    pub path: String,
    pub headers: HeaderList,
}

impl RequestHead {
    /// Build a request head from a method and an absolute URL.
    pub fn new(method: &str, url: &str) -> Result<Self, InterceptError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(InterceptError::EmptyTarget);
        }
        let uri: Uri = url
            .parse()
            .map_err(|_| InterceptError::InvalidTarget(url.to_string()))?;
        let target = TargetKey::from_uri(&uri, url)?;
        let path = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "/".to_string());
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        Ok(Self {
            method: method.trim().to_uppercase(),
            target,
            path,
            headers: HeaderList::new(),
        })
    }

    pub fn get(url: &str) -> Result<Self, InterceptError> {
        Self::new("GET", url)
    }

    pub fn post(url: &str) -> Result<Self, InterceptError> {
        Self::new("POST", url)
    }

    /// Builder-style header append.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(name, value);
        self
    }

    /// Full URL with explicit port.
    pub fn url(&self) -> String {
        format!("{}{}", self.target, self.path)
    }

    /// Path without the query string.
    pub fn pathname(&self) -> &str {
        split_path(&self.path).0
    }

    /// Query string without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        split_path(&self.path).1
    }
}

/// Split `/a/b?x=1` into (`/a/b`, Some(`x=1`)).
pub fn split_path(path: &str) -> (&str, Option<&str>) {
    match path.split_once('?') {
        Some((pathname, query)) => (pathname, Some(query)),
        None => (path, None),
    }
}
