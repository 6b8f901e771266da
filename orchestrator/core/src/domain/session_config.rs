// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Session Configuration
//
// Construction parameters for one negotiation session, fixed at session start:
// - temperature decay per round and the freeze threshold
// - round limit and escalation threshold
// - collaborator timeouts
// - MERGE ownership policy
//
// Stored as a Kubernetes-style manifest (apiVersion/kind/metadata/spec).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::arbiter::MergeOwnership;
use crate::domain::spec::{Spec, DEFAULT_TEMPERATURE_DECAY};

pub const API_VERSION: &str = "concord/v1";
pub const KIND: &str = "NegotiationSession";

/// Top-level session configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfigManifest {
    /// API version (must be "concord/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "NegotiationSession")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

/// Negotiation parameters (content under spec:)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Subtracted from the temperature on every round
    pub temperature_decay: f64,

    /// Session is done once temperature is at or below this value
    pub freeze_threshold: f64,

    /// Session is done once this many rounds have run
    pub round_limit: u64,

    /// Consecutive stuck rounds before the arbiter is consulted
    pub escalation_threshold: u32,

    /// Per-call budget for a triad's negotiation answer
    pub negotiation_timeout_ms: u64,

    /// Per-call budget for an arbiter decision
    pub arbiter_timeout_ms: u64,

    pub merge_ownership: MergeOwnership,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            temperature_decay: DEFAULT_TEMPERATURE_DECAY,
            freeze_threshold: 0.0,
            round_limit: 10,
            escalation_threshold: 2,
            negotiation_timeout_ms: 5_000,
            arbiter_timeout_ms: 10_000,
            merge_ownership: MergeOwnership::Synthetic,
        }
    }
}

impl SessionConfig {
    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }

    pub fn arbiter_timeout(&self) -> Duration {
        Duration::from_millis(self.arbiter_timeout_ms)
    }

    /// Empty document configured with this session's decay and merge policy.
    pub fn new_spec(&self) -> Spec {
        Spec::with_settings(self.temperature_decay, self.merge_ownership)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.temperature_decay > 0.0 && self.temperature_decay <= 1.0) {
            anyhow::bail!(
                "temperature_decay must be in (0.0, 1.0], got {}",
                self.temperature_decay
            );
        }
        if !(0.0..=1.0).contains(&self.freeze_threshold) {
            anyhow::bail!(
                "freeze_threshold must be in [0.0, 1.0], got {}",
                self.freeze_threshold
            );
        }
        if self.round_limit == 0 {
            anyhow::bail!("round_limit must be at least 1");
        }
        if self.escalation_threshold == 0 {
            anyhow::bail!("escalation_threshold must be at least 1");
        }
        if self.negotiation_timeout_ms == 0 {
            anyhow::bail!("negotiation_timeout_ms must be greater than zero");
        }
        if self.arbiter_timeout_ms == 0 {
            anyhow::bail!("arbiter_timeout_ms must be greater than zero");
        }
        Ok(())
    }
}

impl Default for SessionConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "default-session".to_string(),
                labels: None,
            },
            spec: SessionConfig::default(),
        }
    }
}

impl SessionConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. CONCORD_CONFIG_PATH environment variable
    /// 2. ./concord-config.yaml (working directory)
    /// 3. ~/.concord/config.yaml (user home)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("CONCORD_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./concord-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".concord").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::debug!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        override_from_env("CONCORD_ROUND_LIMIT", &mut self.spec.round_limit);
        override_from_env(
            "CONCORD_ESCALATION_THRESHOLD",
            &mut self.spec.escalation_threshold,
        );
        override_from_env("CONCORD_TEMPERATURE_DECAY", &mut self.spec.temperature_decay);
        override_from_env(
            "CONCORD_NEGOTIATION_TIMEOUT_MS",
            &mut self.spec.negotiation_timeout_ms,
        );
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        self.spec.validate()
    }
}

fn override_from_env<T>(var: &str, target: &mut T)
where
    T: std::str::FromStr + std::fmt::Display,
{
    let Ok(raw) = std::env::var(var) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => {
            tracing::info!("Environment override: {}={}", var, value);
            *target = value;
        }
        Err(_) => {
            tracing::warn!("Invalid value for {}: '{}'. Ignoring.", var, raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = SessionConfigManifest::default();
        assert_eq!(manifest.api_version, "concord/v1");
        assert_eq!(manifest.kind, "NegotiationSession");
        assert_eq!(manifest.spec.round_limit, 10);
        assert_eq!(manifest.spec.escalation_threshold, 2);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_partial_spec_uses_defaults() {
        let yaml = r#"
apiVersion: concord/v1
kind: NegotiationSession
metadata:
  name: homepage
spec:
  round_limit: 4
  merge_ownership: first_contributor
"#;
        let manifest = SessionConfigManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(manifest.spec.round_limit, 4);
        assert_eq!(manifest.spec.merge_ownership, MergeOwnership::FirstContributor);
        assert_eq!(manifest.spec.temperature_decay, DEFAULT_TEMPERATURE_DECAY);
        assert_eq!(manifest.spec.negotiation_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.yaml");

        let mut manifest = SessionConfigManifest::default();
        manifest.metadata.name = "roundtrip".to_string();
        manifest.spec.escalation_threshold = 5;
        manifest.to_yaml_file(&path).unwrap();

        let loaded = SessionConfigManifest::from_yaml_file(&path).unwrap();
        assert_eq!(loaded.metadata.name, "roundtrip");
        assert_eq!(loaded.spec, manifest.spec);
    }

    #[test]
    fn test_validation() {
        let mut manifest = SessionConfigManifest::default();

        manifest.api_version = "concord/v0".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.kind = "Session".to_string();
        assert!(manifest.validate().is_err());
        manifest.kind = KIND.to_string();

        manifest.spec.temperature_decay = 0.0;
        assert!(manifest.validate().is_err());
        manifest.spec.temperature_decay = 0.25;

        manifest.spec.freeze_threshold = 1.5;
        assert!(manifest.validate().is_err());
        manifest.spec.freeze_threshold = 0.1;

        manifest.spec.round_limit = 0;
        assert!(manifest.validate().is_err());
        manifest.spec.round_limit = 3;

        manifest.spec.escalation_threshold = 0;
        assert!(manifest.validate().is_err());
        manifest.spec.escalation_threshold = 1;

        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_new_spec_uses_decay() {
        let config = SessionConfig {
            temperature_decay: 0.5,
            ..SessionConfig::default()
        };
        let mut spec = config.new_spec();
        spec.advance_round();
        assert_eq!(spec.temperature(), 0.5);
    }
}
