use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What to do with change events that queue up while a refresh is running.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoalescePolicy {
    /// One refresh per event, even when several arrived back to back.
    #[default]
    None,
    /// Drain queued events and run a single refresh for all of them.
    Latest,
}

/// What to do when a refresh fails.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshErrorPolicy {
    /// Log and keep the last good data. Subscribers are not told.
    #[default]
    Swallow,
    /// Log, keep the last good data, and call each subscriber's error hook.
    Propagate,
}

pub fn parse_coalesce_policy(raw: &str) -> Result<CoalescePolicy> {
    match raw {
        "none" => Ok(CoalescePolicy::None),
        "latest" => Ok(CoalescePolicy::Latest),
        _ => Err(anyhow!("invalid --coalesce '{raw}' (expected none|latest)")),
    }
}

pub fn parse_refresh_error_policy(raw: &str) -> Result<RefreshErrorPolicy> {
    match raw {
        "swallow" => Ok(RefreshErrorPolicy::Swallow),
        "propagate" => Ok(RefreshErrorPolicy::Propagate),
        _ => Err(anyhow!("invalid --refresh-errors '{raw}' (expected swallow|propagate)")),
    }
}

/// Registry behaviour knobs. Every field has a default.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub coalesce: CoalescePolicy,
    pub refresh_errors: RefreshErrorPolicy,
    /// Upper bound for one refresh call. `None` waits forever.
    pub refresh_timeout_ms: Option<u64>,
    /// Refresh once as soon as a channel opens instead of waiting for the
    /// first change event.
    pub initial_fetch: bool,
}

impl RegistryConfig {
    pub fn refresh_timeout(&self) -> Option<Duration> {
        self.refresh_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_source_behaviour() {
        let config = RegistryConfig::default();
        assert_eq!(config.coalesce, CoalescePolicy::None);
        assert_eq!(config.refresh_errors, RefreshErrorPolicy::Swallow);
        assert!(config.refresh_timeout().is_none());
        assert!(!config.initial_fetch);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: RegistryConfig =
            serde_json::from_str(r#"{"coalesce":"latest","refresh_timeout_ms":250}"#).unwrap();
        assert_eq!(config.coalesce, CoalescePolicy::Latest);
        assert_eq!(config.refresh_errors, RefreshErrorPolicy::Swallow);
        assert_eq!(config.refresh_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn parse_policies() {
        assert_eq!(parse_coalesce_policy("latest").unwrap(), CoalescePolicy::Latest);
        assert_eq!(
            parse_refresh_error_policy("propagate").unwrap(),
            RefreshErrorPolicy::Propagate
        );
        assert!(parse_coalesce_policy("sometimes").is_err());
        assert!(parse_refresh_error_policy("ignore").is_err());
    }
}
