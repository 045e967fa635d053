//! Configuration types for Rift Intercept.

mod passthrough;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use passthrough::PassthroughConfig;

use crate::policy::{NetConnectMatcher, NetworkPolicy};

/// Environment variable that turns interception off entirely.
pub const BYPASS_ENV: &str = "RIFT_INTERCEPT_OFF";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct InterceptConfig {
    /// Activate interception when the context is built
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Let every request through to the real transport, ignoring expectations
    #[serde(default)]
    pub bypass: bool,

    #[serde(default)]
    pub net_connect: NetConnectConfig,

    #[serde(default)]
    pub passthrough: PassthroughConfig,

    /// Filter directive for `telemetry::init_tracing`, e.g. `rift_intercept=debug`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_filter: Option<String>,
}

impl Default for InterceptConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            bypass: false,
            net_connect: NetConnectConfig::default(),
            passthrough: PassthroughConfig::default(),
            log_filter: None,
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// Which unmatched requests may reach the real network.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum NetConnectConfig {
    #[default]
    AllowAll,
    Deny,
    /// Hosts are substrings of `host:port`, or regexes when wrapped in slashes
    Allow { hosts: Vec<String> },
}

impl NetConnectConfig {
    pub fn to_policy(&self) -> Result<NetworkPolicy, anyhow::Error> {
        match self {
            NetConnectConfig::AllowAll => Ok(NetworkPolicy::allow_all()),
            NetConnectConfig::Deny => Ok(NetworkPolicy::deny_all()),
            NetConnectConfig::Allow { hosts } => {
                let matchers = hosts
                    .iter()
                    .map(|h| parse_host_pattern(h))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(NetworkPolicy::allow(NetConnectMatcher::AnyOf(matchers)))
            }
        }
    }
}

fn parse_host_pattern(raw: &str) -> Result<NetConnectMatcher, anyhow::Error> {
    let trimmed = raw.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('/') && trimmed.ends_with('/') {
        let pattern = &trimmed[1..trimmed.len() - 1];
        let regex = regex::Regex::new(pattern)
            .map_err(|e| anyhow::anyhow!("Invalid net_connect host pattern '{raw}': {e}"))?;
        return Ok(NetConnectMatcher::from(regex));
    }
    Ok(NetConnectMatcher::from(trimmed))
}

impl InterceptConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config '{}': {e}", path.display()))?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, anyhow::Error> {
        let config: InterceptConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if let NetConnectConfig::Allow { hosts } = &self.net_connect {
            if hosts.is_empty() {
                anyhow::bail!(
                    "net_connect mode 'allow' requires at least one host. \
                     Use mode 'deny' to block all real connections"
                );
            }
            if hosts.iter().any(|h| h.trim().is_empty()) {
                anyhow::bail!("net_connect hosts must not be empty strings");
            }
            self.net_connect.to_policy()?;
        }

        if self.passthrough.connect_timeout_secs == 0 {
            anyhow::bail!("passthrough.connect_timeout_secs must be greater than 0");
        }

        Ok(())
    }

    /// Apply overrides from the environment (`RIFT_INTERCEPT_OFF`).
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var(BYPASS_ENV) {
            let value = value.trim().to_lowercase();
            if matches!(value.as_str(), "1" | "true" | "yes" | "on") {
                self.bypass = true;
            }
        }
    }
}
