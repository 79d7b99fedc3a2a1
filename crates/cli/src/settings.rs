//! Optional TOML settings file
//!
//! ```toml
//! branch_rule = "highest_target"
//! log_level = "debug"
//!
//! [retry]
//! base_delay_ms = 250
//! max_backoff_secs = 30
//! ```
//!
//! Command-line flags override anything set here.

use serde::Deserialize;
use std::fs;
use std::path::Path;

use anyhow::Context;
use schemig_core::{BranchRule, RetryConfig};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileSettings {
    pub branch_rule: Option<BranchRule>,
    pub retry: Option<RetryConfig>,
    pub log_level: Option<String>,
    pub json_logs: Option<bool>,
}

impl FileSettings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let settings: FileSettings = toml::from_str(content)?;
        if let Some(retry) = &settings.retry {
            retry.validate()?;
        }
        Ok(settings)
    }

    pub fn retry(&self) -> RetryConfig {
        self.retry.clone().unwrap_or_default()
    }

    pub fn branch_rule(&self) -> BranchRule {
        self.branch_rule.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemig_core::ConfigError;
    use tempfile::TempDir;

    #[test]
    fn test_empty_file_uses_defaults() {
        let settings = FileSettings::parse("").unwrap();
        assert_eq!(settings, FileSettings::default());
        assert_eq!(settings.retry(), RetryConfig::default());
        assert_eq!(settings.branch_rule(), BranchRule::Reject);
    }

    #[test]
    fn test_partial_retry_table() {
        let settings = FileSettings::parse(
            r#"
            branch_rule = "highest_target"
            log_level = "debug"

            [retry]
            base_delay_ms = 250
            max_backoff_secs = 30
            "#,
        )
        .unwrap();

        let retry = settings.retry();
        assert_eq!(retry.base_delay_ms, 250);
        assert_eq!(retry.max_backoff_secs, 30);
        assert_eq!(retry.multiplier, RetryConfig::default().multiplier);
        assert_eq!(settings.branch_rule(), BranchRule::HighestTarget);
        assert_eq!(settings.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(FileSettings::parse("retries = 3").is_err());
        assert!(FileSettings::parse("branch_rule = \"lowest\"").is_err());
    }

    #[test]
    fn test_invalid_retry_values_are_rejected() {
        let err = FileSettings::parse("[retry]\nmultiplier = 0.5").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_load_reports_path() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("schemig.toml");
        let err = FileSettings::load(&missing).unwrap_err();
        assert!(err.to_string().contains("schemig.toml"));

        std::fs::write(&missing, "[retry]\nmax_backoff_secs = 5\n").unwrap();
        let settings = FileSettings::load(&missing).unwrap();
        assert_eq!(settings.retry().max_backoff_secs, 5);
    }
}
