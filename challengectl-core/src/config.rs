//! Top-level controller configuration document (§6.5).
//!
//! Loaded from YAML at startup and reloadable at runtime; reload is
//! additive — new challenges are inserted, existing ones' parameters are
//! updated, removals are ignored (§6.5).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::challenge_spec::ChallengeSpec;
use crate::error::{ConfigError, CoreResult};

/// A named frequency range available to `FrequencySpec::NamedRanges`
/// (§4.5.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedFrequencyRange {
    pub name: String,
    pub min_hz: i64,
    pub max_hz: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConferenceMetadata {
    pub name: Option<String>,
    pub start: Option<String>,
    pub stop: Option<String>,
    pub timezone: Option<String>,
    #[serde(default)]
    pub daily_hours: HashMap<String, String>,
}

/// A challenge to seed or update on config load, keyed by `name` (§6.5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialChallengeSpec {
    pub name: String,
    #[serde(flatten)]
    pub spec: ChallengeSpec,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
}

fn default_true() -> bool {
    true
}

/// The full document (§6.5): bind address/port, the named frequency-range
/// catalog, conference metadata, and an optional seed list of challenges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,
    #[serde(default)]
    pub frequency_ranges: Vec<NamedFrequencyRange>,
    #[serde(default)]
    pub conference: ConferenceMetadata,
    #[serde(default)]
    pub challenges: Vec<InitialChallengeSpec>,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_bind_port() -> u16 {
    8080
}

impl ControllerConfig {
    pub fn from_yaml_str(raw: &str) -> CoreResult<Self> {
        let config: ControllerConfig =
            serde_yaml::from_str(raw).map_err(|e| ConfigError::InvalidValue {
                field: "<document>".into(),
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::InvalidValue {
            field: "path".into(),
            reason: e.to_string(),
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Environment-variable overrides for bind address/port, mirroring
    /// the teacher's `from_env()` pattern for the parts that are commonly
    /// overridden per-deployment without touching the YAML document.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(addr) = std::env::var("CHALLENGECTL_BIND_ADDRESS") {
            self.bind_address = addr;
        }
        if let Ok(port) = std::env::var("CHALLENGECTL_BIND_PORT") {
            if let Ok(port) = port.parse() {
                self.bind_port = port;
            }
        }
        self
    }

    fn validate(&self) -> CoreResult<()> {
        for range in &self.frequency_ranges {
            if range.min_hz > range.max_hz {
                return Err(ConfigError::InvalidValue {
                    field: format!("frequency_ranges[{}]", range.name),
                    reason: "min_hz exceeds max_hz".into(),
                }
                .into());
            }
        }
        for challenge in &self.challenges {
            challenge.spec.validate()?;
        }
        Ok(())
    }

    pub fn named_range(&self, name: &str) -> Option<&NamedFrequencyRange> {
        self.frequency_ranges.iter().find(|r| r.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = ControllerConfig::from_yaml_str("{}").expect("empty doc parses");
        assert_eq!(config.bind_port, 8080);
        assert!(config.frequency_ranges.is_empty());
    }

    #[test]
    fn rejects_inverted_named_range() {
        let raw = r#"
frequency_ranges:
  - name: twometer
    min_hz: 148000000
    max_hz: 144000000
"#;
        assert!(ControllerConfig::from_yaml_str(raw).is_err());
    }

    #[test]
    fn env_override_replaces_bind_port() {
        std::env::set_var("CHALLENGECTL_BIND_PORT", "9090");
        let config = ControllerConfig::default().apply_env_overrides();
        std::env::remove_var("CHALLENGECTL_BIND_PORT");
        assert_eq!(config.bind_port, 9090);
    }
}
