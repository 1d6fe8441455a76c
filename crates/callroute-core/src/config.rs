//! Routing configuration
//!
//! Every knob defaults to the behaviour a production telecom stack expects.
//! Configuration can come from code (`with_*` builders), a YAML document, or
//! a YAML file named by the `CALLROUTE_CONFIG` environment variable.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, RoutingError};

/// Environment variable naming a YAML routing config file
pub const CONFIG_ENV_VAR: &str = "CALLROUTE_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RoutingConfig {
    /// Route SIM targets through the user's connection manager
    pub use_connection_manager: bool,
    /// Retry a target directly once when its manager answers
    /// `CONNECTION_MANAGER_NOT_SUPPORTED`
    pub connection_manager_fallback: bool,
    /// Append the connection-manager fallback to emergency candidate lists
    pub emergency_manager_fallback: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            use_connection_manager: true,
            connection_manager_fallback: true,
            emergency_manager_fallback: true,
        }
    }
}

impl RoutingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connection_manager(mut self, enabled: bool) -> Self {
        self.use_connection_manager = enabled;
        self
    }

    pub fn with_connection_manager_fallback(mut self, enabled: bool) -> Self {
        self.connection_manager_fallback = enabled;
        self
    }

    pub fn with_emergency_manager_fallback(mut self, enabled: bool) -> Self {
        self.emergency_manager_fallback = enabled;
        self
    }

    /// Parse a YAML document; missing keys keep their defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RoutingError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Load from `CALLROUTE_CONFIG` if set, otherwise the defaults.
    ///
    /// An unreadable or invalid file is an error rather than a silent
    /// fallback.
    pub fn from_env_override() -> Result<Self> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) if !path.trim().is_empty() => {
                info!("Loading routing config from: {}", path);
                Self::from_yaml_file(&path).map_err(|e| {
                    warn!("Failed to load routing config from {}: {}", path, e);
                    e
                })
            }
            _ => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_enable_every_fallback() {
        let config = RoutingConfig::default();
        assert!(config.use_connection_manager);
        assert!(config.connection_manager_fallback);
        assert!(config.emergency_manager_fallback);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = RoutingConfig::from_yaml_str("connection_manager_fallback: false\n").unwrap();
        assert!(!config.connection_manager_fallback);
        assert!(config.use_connection_manager);
        assert!(config.emergency_manager_fallback);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(RoutingConfig::from_yaml_str("  \n").unwrap(), RoutingConfig::default());
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let err = RoutingConfig::from_yaml_str("retry_forever: true\n").unwrap_err();
        assert!(matches!(err, RoutingError::Yaml(_)));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = RoutingConfig::from_yaml_file("/nonexistent/callroute.yaml").unwrap_err();
        assert!(matches!(err, RoutingError::Configuration { .. }));
    }

    #[test]
    fn test_builders() {
        let config = RoutingConfig::new()
            .with_connection_manager(false)
            .with_emergency_manager_fallback(false);
        assert!(!config.use_connection_manager);
        assert!(!config.emergency_manager_fallback);
        assert!(config.connection_manager_fallback);
    }
}
