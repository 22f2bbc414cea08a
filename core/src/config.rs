//! Configuration lookup contract.
//!
//! The generic key/value store of the host process is not part of the
//! container; it is consumed through [`ConfigLookup`], a name → string view
//! with an enumerable key set. [`MapConfig`] is the in-memory implementation
//! used for handler init-parameters and configuration snapshots.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Read-only name → value view
pub trait ConfigLookup: Send + Sync {
    /// Value for `name`, if present
    fn get(&self, name: &str) -> Option<String>;

    /// All names that have a value
    fn keys(&self) -> Vec<String>;

    /// Parse `name` as a boolean (`true`/`false`, case-insensitive)
    ///
    /// Returns `None` when absent or unparsable.
    fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(|value| match value.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        })
    }

    /// Value for `name`, or `default`
    fn get_or(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }

    /// Whether `name` has a value
    fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

/// Ordered in-memory configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MapConfig {
    entries: BTreeMap<String, String>,
}

impl MapConfig {
    /// Empty configuration
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set `name`, returning the previous value
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries.insert(name.into(), value.into())
    }

    /// Remove `name`, returning its value
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries.remove(name)
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copy every entry of `other` that is not already set here
    pub fn inherit(&mut self, other: &dyn ConfigLookup) {
        for key in other.keys() {
            if !self.entries.contains_key(&key) {
                if let Some(value) = other.get(&key) {
                    self.entries.insert(key, value);
                }
            }
        }
    }
}

impl ConfigLookup for MapConfig {
    fn get(&self, name: &str) -> Option<String> {
        self.entries.get(name).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

impl<K, V> FromIterator<(K, V)> for MapConfig
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl From<BTreeMap<String, String>> for MapConfig {
    fn from(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_parsing() {
        let config = MapConfig::new()
            .with("restricted", "TRUE")
            .with("cached", "false")
            .with("noise", "yes");

        assert_eq!(config.get_bool("restricted"), Some(true));
        assert_eq!(config.get_bool("cached"), Some(false));
        assert_eq!(config.get_bool("noise"), None);
        assert_eq!(config.get_bool("missing"), None);
    }

    #[test]
    fn test_keys_are_sorted() {
        let config: MapConfig = [("b", "2"), ("a", "1")].into_iter().collect();
        assert_eq!(config.keys(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(config.get_or("c", "3"), "3");
    }

    #[test]
    fn test_inherit_keeps_own_values() {
        let parent = MapConfig::new().with("timeout", "30").with("charset", "utf-8");
        let mut child = MapConfig::new().with("timeout", "5");
        child.inherit(&parent);

        assert_eq!(child.get("timeout").as_deref(), Some("5"));
        assert_eq!(child.get("charset").as_deref(), Some("utf-8"));
        assert_eq!(child.len(), 2);
    }
}
