use anyhow::{Context, Result};
use planner_realtime::RegistryConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Daemon configuration, read from `config.toml`.
///
/// ```toml
/// socket_path = "/run/user/1000/planner/planner.sock"
///
/// [registry]
/// coalesce = "latest"
/// refresh_errors = "propagate"
/// refresh_timeout_ms = 5000
/// initial_fetch = true
/// ```
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct NodeConfig {
    pub socket_path: Option<PathBuf>,
    pub registry: RegistryConfig,
}

impl NodeConfig {
    /// Load from `path`, falling back to defaults when the file is missing.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn default_path() -> PathBuf {
        dirs_path().join("config.toml")
    }
}

fn dirs_path() -> PathBuf {
    if let Ok(config_dir) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(config_dir).join("planner")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".config").join("planner")
    } else {
        PathBuf::from("/tmp/planner")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planner_realtime::{CoalescePolicy, RefreshErrorPolicy};

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig::load(&dir.path().join("config.toml")).unwrap();
        assert!(config.socket_path.is_none());
        assert_eq!(config.registry, RegistryConfig::default());
    }

    #[test]
    fn loads_registry_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
socket_path = "/tmp/x/planner.sock"

[registry]
coalesce = "latest"
refresh_errors = "propagate"
refresh_timeout_ms = 1500
"#,
        )
        .unwrap();

        let config = NodeConfig::load(&path).unwrap();
        assert_eq!(config.socket_path, Some(PathBuf::from("/tmp/x/planner.sock")));
        assert_eq!(config.registry.coalesce, CoalescePolicy::Latest);
        assert_eq!(config.registry.refresh_errors, RefreshErrorPolicy::Propagate);
        assert_eq!(config.registry.refresh_timeout_ms, Some(1500));
        assert!(!config.registry.initial_fetch);
    }

    #[test]
    fn invalid_policy_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[registry]\ncoalesce = \"sometimes\"\n").unwrap();
        let err = NodeConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("invalid config"));
    }
}
