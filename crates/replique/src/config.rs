//! Store configuration
//!
//! Configuration loaded from .replique.toml file.

use serde::{Deserialize, Serialize};
use std::{env, path::PathBuf};

const CONFIG_FILE: &str = ".replique.toml";

/// Store configuration loaded from .replique.toml
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StoreConfig {
    /// Top-level dispatches allowed to run through the middleware chain at once
    #[serde(default = "default_dispatch_concurrency")]
    pub dispatch_concurrency: usize,

    /// Probe slice reducers on every combined call instead of once
    #[serde(default)]
    pub revalidate_slices: bool,

    /// Whether the demo installs the logging middleware
    #[serde(default = "default_log_actions")]
    pub log_actions: bool,
}

fn default_dispatch_concurrency() -> usize {
    1 // Strictly serialized dispatch
}

fn default_log_actions() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dispatch_concurrency: default_dispatch_concurrency(),
            revalidate_slices: false,
            log_actions: default_log_actions(),
        }
    }
}

impl StoreConfig {
    /// Load config from CWD first, then home directory, or use defaults
    pub fn load() -> Self {
        if let Some(content) = load_config_file() {
            match Self::from_toml(&content) {
                Ok(config) => {
                    log::info!("Loaded store config from file");
                    return config;
                }
                Err(e) => {
                    log::warn!("Failed to parse config file: {}", e);
                }
            }
        }

        log::debug!("Using default store config");
        Self::default()
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// Load config file content from CWD first, then home directory
///
/// Returns the file content if found, None otherwise.
pub fn load_config_file() -> Option<String> {
    if let Ok(content) = std::fs::read_to_string(CONFIG_FILE) {
        log::debug!("Loaded config from {}", CONFIG_FILE);
        return Some(content);
    }

    if let Some(home_config) = home_config_path() {
        if let Ok(content) = std::fs::read_to_string(&home_config) {
            log::debug!("Loaded config from {}", home_config.display());
            return Some(content);
        }
    }

    None
}

/// ~/.replique.toml, if HOME is set
fn home_config_path() -> Option<PathBuf> {
    env::var_os("HOME").map(|home| PathBuf::from(home).join(CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.dispatch_concurrency, 1);
        assert!(!config.revalidate_slices);
        assert!(config.log_actions);
    }

    #[test]
    fn test_config_deserialize() {
        let toml = r#"
            dispatch_concurrency = 4
            revalidate_slices = true
            log_actions = false
        "#;
        let config = StoreConfig::from_toml(toml).unwrap();
        assert_eq!(config.dispatch_concurrency, 4);
        assert!(config.revalidate_slices);
        assert!(!config.log_actions);
    }

    #[test]
    fn test_config_deserialize_partial() {
        let config = StoreConfig::from_toml("revalidate_slices = true").unwrap();
        assert!(config.revalidate_slices);
        // Other fields should use defaults
        assert_eq!(config.dispatch_concurrency, 1);
        assert!(config.log_actions);
    }

    #[test]
    fn test_config_rejects_wrong_types() {
        assert!(StoreConfig::from_toml("dispatch_concurrency = \"many\"").is_err());
    }
}
