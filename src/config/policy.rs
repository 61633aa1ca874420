//! Retention policy file loader.
//!
//! ```yaml
//! default:
//!   max_age_days: 2555
//!   action: rollup
//! tenants:
//!   district-42:
//!     max_age_days: 1825
//!     action: archive
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::audit::checkpoint::{RetentionAction, RetentionPolicy};
use crate::error::{LedgerError, LedgerResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicies {
    pub default: RetentionPolicy,
    #[serde(default)]
    pub tenants: HashMap<String, RetentionPolicy>,
}

impl Default for RetentionPolicies {
    fn default() -> Self {
        Self {
            default: RetentionPolicy::new(2555, RetentionAction::Rollup),
            tenants: HashMap::new(),
        }
    }
}

impl RetentionPolicies {
    pub fn load(path: &Path) -> LedgerResult<Self> {
        info!("Loading retention policies from: {:?}", path);

        if !path.exists() {
            return Err(LedgerError::ConfigError(format!(
                "Retention policy file not found: {:?}",
                path
            )));
        }
        let contents = fs::read_to_string(path)
            .map_err(|e| LedgerError::ConfigError(format!("Failed to read {:?}: {}", path, e)))?;

        let policies = Self::from_yaml(&contents)
            .map_err(|e| LedgerError::ConfigError(format!("{:?}: {}", path, e)))?;
        info!(tenant_overrides = policies.tenants.len(), "retention policies loaded");
        Ok(policies)
    }

    pub fn from_yaml(contents: &str) -> LedgerResult<Self> {
        let policies: Self = serde_yaml::from_str(contents)
            .map_err(|e| LedgerError::ConfigError(format!("Failed to parse retention policies: {}", e)))?;
        policies.validate()?;
        Ok(policies)
    }

    pub fn validate(&self) -> LedgerResult<()> {
        self.default
            .validate()
            .map_err(|e| LedgerError::ConfigError(format!("default policy: {}", e)))?;
        for (tenant_id, policy) in &self.tenants {
            policy
                .validate()
                .map_err(|e| LedgerError::ConfigError(format!("policy for {}: {}", tenant_id, e)))?;
        }
        Ok(())
    }

    pub fn for_tenant(&self, tenant_id: &str) -> &RetentionPolicy {
        self.tenants.get(tenant_id).unwrap_or(&self.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICIES: &str = r#"
default:
  max_age_days: 365
  action: rollup
tenants:
  district-42:
    max_age_days: 30
    action: archive
"#;

    #[test]
    fn test_tenant_override_and_fallback() {
        let policies = RetentionPolicies::from_yaml(POLICIES).unwrap();
        assert_eq!(
            policies.for_tenant("district-42"),
            &RetentionPolicy::new(30, RetentionAction::Archive)
        );
        assert_eq!(
            policies.for_tenant("anyone-else"),
            &RetentionPolicy::new(365, RetentionAction::Rollup)
        );
    }

    #[test]
    fn test_zero_age_rejected() {
        let yaml = "default:\n  max_age_days: 0\n  action: anonymize\n";
        assert!(matches!(
            RetentionPolicies::from_yaml(yaml),
            Err(LedgerError::ConfigError(_))
        ));
    }

    #[test]
    fn test_unknown_action_rejected() {
        let yaml = "default:\n  max_age_days: 10\n  action: shred\n";
        assert!(RetentionPolicies::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("retention.yml");
        std::fs::write(&path, POLICIES).unwrap();
        let policies = RetentionPolicies::load(&path).unwrap();
        assert_eq!(policies.tenants.len(), 1);

        assert!(RetentionPolicies::load(&dir.path().join("missing.yml")).is_err());
    }
}
