//! Unified configuration for the deduplication engine.
//!
//! Configuration is loaded with precedence: overrides > Env vars > Config file > Defaults
//!
//! # Example config file (dedupe.toml)
//! ```toml
//! [candidate_selection]
//! default_window_size = 20
//!
//! [classifier]
//! failure_policy = "strict"
//!
//! [clustering]
//! edge_policy = "duplicates-only"
//! first_cluster_id = 1000
//! ```

mod defaults;

pub use defaults::*;

use crate::clustering::EdgePolicy;
use crate::error::DedupeError;
use crate::pipeline::ClassificationFailurePolicy;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration for the deduplication pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupeConfig {
    pub candidate_selection: CandidateSelectionConfig,
    pub classifier: ClassifierConfig,
    pub clustering: ClusteringConfig,
}

impl DedupeConfig {
    /// Load configuration with precedence: overrides > Env > File > Defaults
    ///
    /// # Arguments
    /// * `config_path` - Optional path to TOML config file
    /// * `overrides` - Programmatic overrides to apply on top
    pub fn load(config_path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(DedupeConfig::default()));

        // Layer 1: Config file (if provided)
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Layer 2: Environment variables with DEDUPE_ prefix
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split(ENV_SPLIT));

        // Layer 3: overrides
        figment = figment.merge(Serialized::defaults(overrides));

        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment and optional config file only (no overrides)
    pub fn from_env(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load(config_path, ConfigOverrides::default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let window_size = self.candidate_selection.default_window_size;
        if window_size < MIN_WINDOW_SIZE {
            return Err(ConfigError {
                message: format!("candidate_selection.default_window_size is < {MIN_WINDOW_SIZE}: {window_size}"),
            });
        }
        // a merge needs a second id after the first cluster's
        if self.clustering.first_cluster_id == u64::MAX {
            return Err(ConfigError {
                message: format!(
                    "clustering.first_cluster_id leaves no room for further ids: {}",
                    self.clustering.first_cluster_id
                ),
            });
        }
        Ok(())
    }
}

/// Sorted-neighborhood candidate selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateSelectionConfig {
    /// Window used by passes that do not set their own
    pub default_window_size: usize,
}

impl Default for CandidateSelectionConfig {
    fn default() -> Self {
        Self {
            default_window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// What the pipeline does when a classifier reports an error
    pub failure_policy: ClassificationFailurePolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Which classifications link records
    pub edge_policy: EdgePolicy,
    /// First id of the sequential cluster id generator
    pub first_cluster_id: u64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            edge_policy: EdgePolicy::default(),
            first_cluster_id: DEFAULT_FIRST_CLUSTER_ID,
        }
    }
}

/// Overrides that take precedence over file and env config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_selection: Option<CandidateSelectionOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifier: Option<ClassifierOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clustering: Option<ClusteringOverrides>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateSelectionOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_window_size: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<ClassificationFailurePolicy>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge_policy: Option<EdgePolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_cluster_id: Option<u64>,
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}

impl From<ConfigError> for DedupeError {
    fn from(e: ConfigError) -> Self {
        DedupeError::InvalidConfig { message: e.message }
    }
}
