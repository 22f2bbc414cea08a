//! Container configuration.
//!
//! Settings are read from the environment with sensible defaults:
//!
//! | Variable                            | Default      |
//! |-------------------------------------|--------------|
//! | `BINDLET_LIFECYCLE_POLL_RETRIES`    | `50`         |
//! | `BINDLET_LIFECYCLE_POLL_INTERVAL_MS`| `100`        |
//! | `BINDLET_RESTRICTED_PARAM`          | `restricted` |

use crate::error::ContainerError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of extra polls when waiting for a lifecycle state
pub const DEFAULT_POLL_RETRIES: usize = 50;

/// Default pause between two polls
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Default init-parameter name of the restricted flag
pub const DEFAULT_RESTRICTED_PARAM: &str = "restricted";

/// Settings shared by every level of the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Extra polls made by [`wait_for`](bindlet_core::LifecycleManager::wait_for)
    /// before giving up
    pub lifecycle_poll_retries: usize,
    /// Pause between two polls, in milliseconds
    pub lifecycle_poll_interval_ms: u64,
    /// Handler init-parameter that marks a handler as restricted
    pub restricted_param: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            lifecycle_poll_retries: DEFAULT_POLL_RETRIES,
            lifecycle_poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            restricted_param: DEFAULT_RESTRICTED_PARAM.to_string(),
        }
    }
}

impl ContainerConfig {
    /// Defaults overridden by `BINDLET_*` environment variables
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::Config`] if a variable is set but does not
    /// parse, or the result fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self, ContainerError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the `BINDLET_*`
    /// names
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ContainerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("BINDLET_LIFECYCLE_POLL_RETRIES") {
            config.lifecycle_poll_retries = value.trim().parse().map_err(|_| {
                ContainerError::Config(format!("BINDLET_LIFECYCLE_POLL_RETRIES is not a count: {value}"))
            })?;
        }
        if let Some(value) = lookup("BINDLET_LIFECYCLE_POLL_INTERVAL_MS") {
            config.lifecycle_poll_interval_ms = value.trim().parse().map_err(|_| {
                ContainerError::Config(format!(
                    "BINDLET_LIFECYCLE_POLL_INTERVAL_MS is not a number of milliseconds: {value}"
                ))
            })?;
        }
        if let Some(value) = lookup("BINDLET_RESTRICTED_PARAM") {
            config.restricted_param = value.trim().to_string();
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the polling budget
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_lifecycle_polling(mut self, retries: usize, interval: Duration) -> Self {
        self.lifecycle_poll_retries = retries;
        self.lifecycle_poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the restricted-flag parameter name
    #[must_use]
    pub fn with_restricted_param(mut self, name: impl Into<String>) -> Self {
        self.restricted_param = name.into();
        self
    }

    /// Pause between two polls
    #[must_use]
    pub const fn lifecycle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lifecycle_poll_interval_ms)
    }

    /// Check the configuration
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::Config`] if the restricted parameter name is
    /// blank or the poll interval is zero.
    pub fn validate(&self) -> Result<(), ContainerError> {
        if self.restricted_param.trim().is_empty() {
            return Err(ContainerError::Config("restricted_param cannot be empty".to_string()));
        }
        if self.lifecycle_poll_interval_ms == 0 {
            return Err(ContainerError::Config("lifecycle_poll_interval_ms must be > 0".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ContainerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ContainerConfig::default());
        assert_eq!(config.lifecycle_poll_interval(), Duration::from_millis(100));
        assert_eq!(config.restricted_param, "restricted");
    }

    #[test]
    fn test_overrides() {
        let config = ContainerConfig::from_lookup(lookup(&[
            ("BINDLET_LIFECYCLE_POLL_RETRIES", "3"),
            ("BINDLET_LIFECYCLE_POLL_INTERVAL_MS", " 5 "),
            ("BINDLET_RESTRICTED_PARAM", "secured"),
        ]))
        .unwrap();
        assert_eq!(config.lifecycle_poll_retries, 3);
        assert_eq!(config.lifecycle_poll_interval(), Duration::from_millis(5));
        assert_eq!(config.restricted_param, "secured");
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            ContainerConfig::from_lookup(lookup(&[("BINDLET_LIFECYCLE_POLL_RETRIES", "many")])),
            Err(ContainerError::Config(_))
        ));
        assert!(matches!(
            ContainerConfig::from_lookup(lookup(&[("BINDLET_LIFECYCLE_POLL_INTERVAL_MS", "0")])),
            Err(ContainerError::Config(_))
        ));
        assert!(matches!(
            ContainerConfig::from_lookup(lookup(&[("BINDLET_RESTRICTED_PARAM", "  ")])),
            Err(ContainerError::Config(_))
        ));
    }

    #[test]
    fn test_deserializes_partial_toml() {
        let config: ContainerConfig = toml::from_str("restricted_param = \"guarded\"").unwrap();
        assert_eq!(config.restricted_param, "guarded");
        assert_eq!(config.lifecycle_poll_retries, DEFAULT_POLL_RETRIES);
    }
}
