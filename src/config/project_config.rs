//! Project-level configuration support
//!
//! Loads per-project configuration from `lineage.toml` or `.lineagerc.json`
//! in the repository root, or from an explicit path.
//!
//! # Configuration Format
//!
//! ```toml
//! # lineage.toml
//!
//! [options]
//! "TicksSinceStart.TickSize" = 12
//! "TreeDiff.EnableBlacklist" = true
//! "TreeDiff.BlacklistedPrefixes" = ["vendor/", "third_party/"]
//!
//! [features]
//! enabled = ["code-structure"]
//!
//! [history]
//! first_parent = false
//! head = "main"
//!
//! [cache]
//! backend = "redb"   # none | memory | redb
//! ttl_secs = 86400
//! ```

use crate::cache::CacheKind;
use crate::core::Options;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Preferred file name
pub const TOML_CONFIG: &str = "lineage.toml";
/// Alternative file name
pub const JSON_CONFIG: &str = ".lineagerc.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Component options by public name
    pub options: Options,
    pub features: FeaturesConfig,
    pub history: HistoryConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    pub enabled: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub first_parent: bool,
    pub head: Option<String>,
    pub max_commits: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheKind,
    /// redb file; defaults to the per-repository cache directory
    pub path: Option<PathBuf>,
    /// Entry lifetime; entries never expire when unset
    pub ttl_secs: Option<u64>,
}

/// Load project configuration from `repo_path`.
///
/// Parse failures are logged and defaults are used.
pub fn load_project_config(repo_path: &Path) -> ProjectConfig {
    // Try TOML first (preferred format)
    let toml_path = repo_path.join(TOML_CONFIG);
    if toml_path.exists() {
        match load_toml_config(&toml_path) {
            Ok(config) => {
                debug!("Loaded project config from {}", toml_path.display());
                return config;
            }
            Err(e) => {
                warn!("Failed to load {}: {:#}", toml_path.display(), e);
            }
        }
    }

    let json_path = repo_path.join(JSON_CONFIG);
    if json_path.exists() {
        match load_json_config(&json_path) {
            Ok(config) => {
                debug!("Loaded project config from {}", json_path.display());
                return config;
            }
            Err(e) => {
                warn!("Failed to load {}: {:#}", json_path.display(), e);
            }
        }
    }

    debug!("No project config found, using defaults");
    ProjectConfig::default()
}

/// Load an explicitly requested file; unlike discovery, failures are errors
pub fn load_config_file(path: &Path) -> anyhow::Result<ProjectConfig> {
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let config = if is_json {
        load_json_config(path)
    } else {
        load_toml_config(path)
    };
    config.with_context(|| format!("Failed to load config file {}", path.display()))
}

fn load_toml_config(path: &Path) -> anyhow::Result<ProjectConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: ProjectConfig = toml::from_str(&content)?;
    Ok(config)
}

fn load_json_config(path: &Path) -> anyhow::Result<ProjectConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: ProjectConfig = serde_json::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::OptionValue;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_without_file() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let config = load_project_config(dir.path());
        assert_eq!(config, ProjectConfig::default());
        assert_eq!(config.cache.backend, CacheKind::Redb);
        Ok(())
    }

    #[test]
    fn test_toml_config() -> anyhow::Result<()> {
        let dir = tempdir()?;
        std::fs::write(
            dir.path().join(TOML_CONFIG),
            r#"
[options]
"TicksSinceStart.TickSize" = 12

[features]
enabled = ["code-structure"]

[history]
first_parent = true

[cache]
backend = "memory"
ttl_secs = 60
"#,
        )?;
        let config = load_project_config(dir.path());
        assert_eq!(
            config.options.get("TicksSinceStart.TickSize"),
            Some(&OptionValue::Int(12))
        );
        assert_eq!(config.features.enabled, vec!["code-structure".to_string()]);
        assert!(config.history.first_parent);
        assert_eq!(config.cache.backend, CacheKind::Memory);
        assert_eq!(config.cache.ttl_secs, Some(60));
        Ok(())
    }

    #[test]
    fn test_json_fallback_and_broken_toml() -> anyhow::Result<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join(TOML_CONFIG), "this is [not toml")?;
        std::fs::write(
            dir.path().join(JSON_CONFIG),
            r#"{"history": {"head": "develop"}, "cache": {"backend": "none"}}"#,
        )?;
        let config = load_project_config(dir.path());
        assert_eq!(config.history.head.as_deref(), Some("develop"));
        assert_eq!(config.cache.backend, CacheKind::None);
        Ok(())
    }

    #[test]
    fn test_explicit_file_errors_are_reported() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[cache]\nbackend = \"floppy\"\n")?;
        assert!(load_config_file(&path).is_err());
        assert!(load_config_file(&dir.path().join("absent.toml")).is_err());
        Ok(())
    }
}
