//! TOML configuration for recallctl.
//!
//! Priority order (highest to lowest):
//! 1. ./recall.toml (project-specific)
//! 2. ~/.recall/config.toml (user defaults)
//! 3. Built-in defaults
//!
//! Environment variables always win over file config for secrets
//! (DATABASE_URL, RECALL_EMBED_API_KEY, RECALL_LICENSE_KEY).

use std::path::PathBuf;

use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RecallConfig {
    #[serde(default)]
    pub search: SearchSection,

    #[serde(default)]
    pub embedding: EmbeddingSection,

    #[serde(default)]
    pub worker: WorkerSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchSection {
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    #[serde(default = "default_strategy")]
    pub default_strategy: String,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            default_strategy: default_strategy(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingSection {
    #[serde(default = "default_embed_url")]
    pub endpoint: String,

    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            endpoint: default_embed_url(),
            model: default_model(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSection {
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_limit() -> usize {
    10
}

fn default_strategy() -> String {
    "baseline".to_owned()
}

fn default_embed_url() -> String {
    "http://localhost:8080".to_owned()
}

fn default_model() -> String {
    recall_embed::DEFAULT_MODEL.to_owned()
}

fn default_workers() -> usize {
    2
}

fn default_batch_size() -> usize {
    5
}

/// The recall config directory (~/.recall).
pub fn config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".recall"))
}

impl RecallConfig {
    /// Load config files, local overriding global; missing or malformed
    /// files fall back to defaults rather than failing the command.
    pub fn load() -> Self {
        let mut config = RecallConfig::default();

        if let Some(global) = config_dir().map(|d| d.join("config.toml")) {
            if let Some(parsed) = read_config(&global) {
                config = parsed;
            }
        }
        if let Some(parsed) = read_config(&PathBuf::from("recall.toml")) {
            config = parsed;
        }

        config
    }
}

fn read_config(path: &PathBuf) -> Option<RecallConfig> {
    if !path.exists() {
        return None;
    }
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str::<RecallConfig>(&contents) {
            Ok(config) => {
                debug!("loaded config from {}", path.display());
                Some(config)
            }
            Err(err) => {
                warn!("failed to parse {}: {}", path.display(), err);
                None
            }
        },
        Err(err) => {
            debug!("failed to read {}: {}", path.display(), err);
            None
        }
    }
}
