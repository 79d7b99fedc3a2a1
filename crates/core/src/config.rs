//! Explicit configuration handed to module manager factories
//!
//! Everything a manager needs is passed in a [`ModuleConfig`]; nothing is read
//! from the process environment here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;
use crate::planner::BranchRule;
use crate::retry::RetryPolicy;

/// Parsed `scheme://[user[:pass]@]host[:port]/database` store identity
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionIdentity {
    url: Url,
}

impl ConnectionIdentity {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidConnection {
            value: redact(value),
            reason: reason.to_string(),
        };

        let url = Url::parse(value).map_err(|e| invalid(&e.to_string()))?;
        if url.cannot_be_a_base() {
            return Err(invalid("expected scheme://host/database"));
        }

        let identity = Self { url };
        if identity.scheme() != "memory" && identity.host().is_none() {
            return Err(invalid("missing host"));
        }
        if identity.database().is_empty() {
            return Err(invalid("missing database name"));
        }
        Ok(identity)
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn host(&self) -> Option<&str> {
        self.url.host_str().filter(|h| !h.is_empty())
    }

    pub fn port(&self) -> Option<u16> {
        self.url.port()
    }

    pub fn username(&self) -> Option<&str> {
        Some(self.url.username()).filter(|u| !u.is_empty())
    }

    pub fn database(&self) -> &str {
        self.url.path().trim_start_matches('/')
    }

    /// Full connection string, credentials included. Do not log this.
    pub fn as_secret_str(&self) -> &str {
        self.url.as_str()
    }
}

impl FromStr for ConnectionIdentity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", redact(self.url.as_str()))
    }
}

impl fmt::Debug for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConnectionIdentity").field(&self.to_string()).finish()
    }
}

/// Mask the password of a connection string, if it has one
fn redact(value: &str) -> String {
    match Url::parse(value) {
        Ok(mut url) if url.password().is_some() => {
            let _ = url.set_password(Some("****"));
            url.to_string()
        }
        Ok(url) => url.to_string(),
        Err(_) => "<unparseable>".to_string(),
    }
}

/// Backoff parameters in a file-friendly shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: Option<u64>,
    /// Total backoff budget (the `maxBackoffSec` of the retry policy)
    pub max_backoff_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            base_delay_ms: policy.base_delay.as_millis() as u64,
            multiplier: policy.multiplier,
            max_delay_ms: policy.max_delay.map(|d| d.as_millis() as u64),
            max_backoff_secs: policy.max_total_wait.as_secs(),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.multiplier".to_string(),
                value: self.multiplier.to_string(),
                expected: "a finite number >= 1.0".to_string(),
            });
        }
        if self.base_delay_ms == 0 && self.max_backoff_secs > 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.base_delay_ms".to_string(),
                value: "0".to_string(),
                expected: "a positive delay when retries are enabled".to_string(),
            });
        }
        Ok(())
    }

    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
            max_delay: self.max_delay_ms.map(Duration::from_millis),
            max_total_wait: Duration::from_secs(self.max_backoff_secs),
        }
    }
}

/// Everything needed to build one module's manager
#[derive(Debug, Clone)]
pub struct ModuleConfig {
    pub module: String,
    pub connection: ConnectionIdentity,
    pub scripts_dir: PathBuf,
    pub retry: RetryConfig,
    pub branch_rule: BranchRule,
}

impl ModuleConfig {
    pub fn new(module: impl Into<String>, connection: ConnectionIdentity, scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            module: module.into(),
            connection,
            scripts_dir: scripts_dir.into(),
            retry: RetryConfig::default(),
            branch_rule: BranchRule::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_branch_rule(mut self, branch_rule: BranchRule) -> Self {
        self.branch_rule = branch_rule;
        self
    }
}
