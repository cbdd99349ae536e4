//! License key resolution and feature gating.
//!
//! Keys unlock premium importers. Resolution order: explicit constructor
//! key, then the `RECALL_LICENSE_KEY` environment variable, then the
//! `license_key` row in settings. Validation is a prefix check; the set of
//! unlocked features is computed once at load time.

use std::collections::HashSet;

use anyhow::Result;
use sqlx::PgPool;
use tracing::debug;

use recall_store::UnitOfWork;

pub const LICENSE_KEY_ENV: &str = "RECALL_LICENSE_KEY";
pub const LICENSE_KEY_SETTING: &str = "license_key";

/// Features that require a license, with display names.
pub const LICENSED_FEATURES: &[(&str, &str)] = &[("chatgpt_importer", "ChatGPT Importer")];

/// Capability oracle consulted by the import service before running a
/// licensed extractor. Policy lives behind this trait; the pipeline only
/// asks yes/no questions.
pub trait CapabilityOracle: Send + Sync {
    fn has_feature(&self, name: &str) -> bool;
}

/// Everything is allowed; used by tests and unrestricted deployments.
pub struct AllowAll;

impl CapabilityOracle for AllowAll {
    fn has_feature(&self, _name: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
pub struct LicenseStatus {
    pub has_license: bool,
    pub enabled_features: Vec<String>,
    pub missing_features: Vec<String>,
}

/// Snapshot of license state; build with [`LicenseManager::load`] (checks
/// the settings table) or [`LicenseManager::from_key`] (no database).
pub struct LicenseManager {
    has_key: bool,
    features: HashSet<String>,
}

impl LicenseManager {
    /// Resolve the key from constructor > environment > settings.
    pub async fn load(pool: &PgPool, explicit_key: Option<String>) -> Result<Self> {
        let key = match explicit_key {
            Some(key) if !key.trim().is_empty() => Some(key),
            _ => match std::env::var(LICENSE_KEY_ENV) {
                Ok(key) if !key.trim().is_empty() => Some(key),
                _ => {
                    let mut uow = UnitOfWork::begin(pool).await?;
                    let key = uow.settings().get_value(LICENSE_KEY_SETTING).await?;
                    uow.commit().await?;
                    key
                }
            },
        };
        debug!(has_key = key.is_some(), "license key resolved");
        Ok(Self::from_resolved(key))
    }

    /// Build directly from an optional key, skipping environment and
    /// settings lookups.
    pub fn from_key(key: Option<String>) -> Self {
        Self::from_resolved(key.filter(|k| !k.trim().is_empty()))
    }

    fn from_resolved(key: Option<String>) -> Self {
        let features = key.as_deref().map(validate_key).unwrap_or_default();
        Self {
            has_key: key.is_some(),
            features,
        }
    }

    pub fn status(&self) -> LicenseStatus {
        let enabled: Vec<String> = self.features.iter().cloned().collect();
        let missing: Vec<String> = LICENSED_FEATURES
            .iter()
            .map(|(name, _)| (*name).to_owned())
            .filter(|name| !self.features.contains(name))
            .collect();
        LicenseStatus {
            has_license: self.has_key,
            enabled_features: enabled,
            missing_features: missing,
        }
    }
}

impl CapabilityOracle for LicenseManager {
    fn has_feature(&self, name: &str) -> bool {
        self.features.contains(name)
    }
}

/// Pro and Enterprise key prefixes unlock every licensed importer.
fn validate_key(key: &str) -> HashSet<String> {
    let mut features = HashSet::new();
    if key.starts_with("RECALL-PRO-") || key.starts_with("RECALL-ENT-") {
        for (name, _) in LICENSED_FEATURES {
            features.insert((*name).to_owned());
        }
    }
    features
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pro_key_unlocks_chatgpt_importer() {
        let manager = LicenseManager::from_key(Some("RECALL-PRO-abc123".into()));
        assert!(manager.has_feature("chatgpt_importer"));
        assert!(manager.status().has_license);
        assert!(manager.status().missing_features.is_empty());
    }

    #[test]
    fn enterprise_key_unlocks_features() {
        let manager = LicenseManager::from_key(Some("RECALL-ENT-xyz".into()));
        assert!(manager.has_feature("chatgpt_importer"));
    }

    #[test]
    fn malformed_key_unlocks_nothing() {
        let manager = LicenseManager::from_key(Some("TRIAL-123".into()));
        assert!(!manager.has_feature("chatgpt_importer"));
        // Key present but invalid still reports as having a key.
        assert!(manager.status().has_license);
        assert_eq!(manager.status().missing_features, vec!["chatgpt_importer"]);
    }

    #[test]
    fn no_key_means_no_features() {
        let manager = LicenseManager::from_key(None);
        assert!(!manager.has_feature("chatgpt_importer"));
        assert!(!manager.status().has_license);
    }

    #[test]
    fn blank_key_is_treated_as_absent() {
        let manager = LicenseManager::from_key(Some("   ".into()));
        assert!(!manager.status().has_license);
    }

    #[test]
    fn allow_all_is_permissive() {
        assert!(AllowAll.has_feature("chatgpt_importer"));
        assert!(AllowAll.has_feature("anything_else"));
    }
}
