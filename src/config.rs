//! Graph configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Tunables for a [`Graph`](crate::Graph). Every field has a default, so a
/// partial JSON document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub name: String,
    /// Lock wait used when an operation's timeout is omitted. 0 = non-blocking.
    pub default_timeout_ms: u64,
    /// Per-thread, per-vertex re-entry ceiling.
    pub recursion_limit: u8,
    pub max_identifier_len: usize,
    pub max_relationships: usize,
    pub max_vertex_types: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            name: "graph".into(),
            default_timeout_ms: 0,
            recursion_limit: 0x70,
            max_identifier_len: 2047,
            max_relationships: 0x3FFF,
            max_vertex_types: 0xFF,
        }
    }
}

impl GraphConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_recursion_limit(mut self, limit: u8) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg = GraphConfig::from_json(r#"{"name": "social", "default_timeout_ms": 250}"#).unwrap();
        assert_eq!(cfg.name, "social");
        assert_eq!(cfg.default_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.recursion_limit, 0x70);
        assert_eq!(cfg.max_identifier_len, 2047);
    }

    #[test]
    fn test_bad_json_is_serialization_error() {
        assert!(matches!(
            GraphConfig::from_json("{not json"),
            Err(crate::Error::Serialization(_))
        ));
    }
}
