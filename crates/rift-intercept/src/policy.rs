//! Network policy gate for requests no expectation handled.

use regex::Regex;
use std::fmt;
use std::sync::Arc;

pub type HostPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Matcher evaluated against `host:port`.
#[derive(Clone)]
pub enum NetConnectMatcher {
    /// Every host
    All,
    /// Substring of `host:port`
    Host(String),
    Pattern(Arc<Regex>),
    Predicate(HostPredicate),
    AnyOf(Vec<NetConnectMatcher>),
}

impl NetConnectMatcher {
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        NetConnectMatcher::Predicate(Arc::new(f))
    }

    pub fn matches(&self, authority: &str) -> bool {
        match self {
            NetConnectMatcher::All => true,
            NetConnectMatcher::Host(host) => authority.contains(host.as_str()),
            NetConnectMatcher::Pattern(regex) => regex.is_match(authority),
            NetConnectMatcher::Predicate(f) => f(authority),
            NetConnectMatcher::AnyOf(matchers) => matchers.iter().any(|m| m.matches(authority)),
        }
    }
}

impl fmt::Debug for NetConnectMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetConnectMatcher::All => f.write_str("All"),
            NetConnectMatcher::Host(host) => f.debug_tuple("Host").field(host).finish(),
            NetConnectMatcher::Pattern(regex) => {
                f.debug_tuple("Pattern").field(&regex.as_str()).finish()
            }
            NetConnectMatcher::Predicate(_) => f.write_str("Predicate(<fn>)"),
            NetConnectMatcher::AnyOf(matchers) => f.debug_list().entries(matchers).finish(),
        }
    }
}

impl From<&str> for NetConnectMatcher {
    fn from(host: &str) -> Self {
        NetConnectMatcher::Host(host.to_lowercase())
    }
}

impl From<String> for NetConnectMatcher {
    fn from(host: String) -> Self {
        NetConnectMatcher::Host(host.to_lowercase())
    }
}

impl From<Regex> for NetConnectMatcher {
    fn from(regex: Regex) -> Self {
        NetConnectMatcher::Pattern(Arc::new(regex))
    }
}

impl<T: Into<NetConnectMatcher>> From<Vec<T>> for NetConnectMatcher {
    fn from(items: Vec<T>) -> Self {
        NetConnectMatcher::AnyOf(items.into_iter().map(Into::into).collect())
    }
}

/// Decides whether an unmatched request may reach the real network.
#[derive(Debug, Clone)]
pub struct NetworkPolicy {
    /// `None` denies everything
    allow: Option<NetConnectMatcher>,
}

impl Default for NetworkPolicy {
    fn default() -> Self {
        Self::allow_all()
    }
}

impl NetworkPolicy {
    pub fn allow_all() -> Self {
        Self {
            allow: Some(NetConnectMatcher::All),
        }
    }

    pub fn deny_all() -> Self {
        Self { allow: None }
    }

    pub fn allow(matcher: NetConnectMatcher) -> Self {
        Self {
            allow: Some(matcher),
        }
    }

    /// `authority` is `host:port`.
    pub fn is_allowed(&self, authority: &str) -> bool {
        self.allow
            .as_ref()
            .map(|m| m.matches(authority))
            .unwrap_or(false)
    }
}
