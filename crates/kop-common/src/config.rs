//! Operator configuration
//!
//! Loaded once at startup from a YAML file. A missing file yields the
//! defaults so the operator can run with nothing but in-cluster credentials.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::yaml::from_yaml;
use crate::{Error, Result};

/// Storage profile name that stands in for "no object store configured"
pub const DUMMY_STORAGE_PROFILE: &str = "s3-profile-of-dummy-store";

/// Default namespace Velero runs in
pub const DEFAULT_VELERO_NAMESPACE: &str = "velero";

/// Default staleness multiplier for recovery points
pub const DEFAULT_STALE_RECOVERY_POINT_MULTIPLIER: u32 = 3;

/// Top-level operator configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperatorConfig {
    /// Kube object protection settings
    #[serde(default)]
    pub kube_object_protection: KubeObjectProtectionConfig,

    /// S3 stores workloads may reference by profile name
    #[serde(default)]
    pub s3_store_profiles: Vec<StorageProfile>,
}

/// Kube object protection settings
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubeObjectProtectionConfig {
    /// Disable kube object protection for every workload
    #[serde(default)]
    pub disabled: bool,

    /// Namespace external jobs are created in
    #[serde(default = "default_velero_namespace")]
    pub velero_namespace_name: String,

    /// A failed capture keeps the previous recovery point reported as good
    /// while it is younger than this many capture intervals
    #[serde(default = "default_stale_multiplier")]
    pub stale_recovery_point_multiplier: u32,
}

impl Default for KubeObjectProtectionConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            velero_namespace_name: default_velero_namespace(),
            stale_recovery_point_multiplier: DEFAULT_STALE_RECOVERY_POINT_MULTIPLIER,
        }
    }
}

fn default_velero_namespace() -> String {
    DEFAULT_VELERO_NAMESPACE.to_string()
}

fn default_stale_multiplier() -> u32 {
    DEFAULT_STALE_RECOVERY_POINT_MULTIPLIER
}

/// One S3-compatible storage backend
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageProfile {
    /// Profile name referenced from `ProtectionGroup.spec.s3Profiles`
    #[serde(rename = "s3ProfileName")]
    pub name: String,
    /// Endpoint URL (e.g., "http://minio.minio:9000")
    pub s3_compatible_endpoint: String,
    /// Bucket holding all workload data
    pub s3_bucket: String,
    /// Region, "us-east-1" when unset
    #[serde(default = "default_region")]
    pub s3_region: String,
    /// Secret in the Velero namespace holding the job system's credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velero_namespace_secret_key_ref: Option<SecretKeyRef>,
    /// Access key used by the operator itself for snapshot uploads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    /// Secret key paired with `access_key_id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Reference to a key in a Secret
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct SecretKeyRef {
    /// Secret name
    pub name: String,
    /// Key within the secret
    pub key: String,
}

impl OperatorConfig {
    /// Load configuration from a YAML file; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(Error::internal_with_context(
                    "config",
                    format!("failed to read {}: {}", path.display(), e),
                ))
            }
        };
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = from_yaml(content)
            .map_err(|e| Error::serialization_for_kind("OperatorConfig", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.kube_object_protection.velero_namespace_name.is_empty() {
            return Err(Error::validation_for_field(
                "OperatorConfig",
                "kubeObjectProtection.veleroNamespaceName",
                "must not be empty",
            ));
        }
        if self.kube_object_protection.stale_recovery_point_multiplier == 0 {
            return Err(Error::validation_for_field(
                "OperatorConfig",
                "kubeObjectProtection.staleRecoveryPointMultiplier",
                "must be at least 1",
            ));
        }
        let mut seen = std::collections::BTreeSet::new();
        for profile in &self.s3_store_profiles {
            if !seen.insert(profile.name.as_str()) {
                return Err(Error::validation_for_field(
                    "OperatorConfig",
                    "s3StoreProfiles",
                    format!("duplicate profile name '{}'", profile.name),
                ));
            }
        }
        Ok(())
    }

    /// Look up a storage profile by name
    pub fn profile(&self, name: &str) -> Option<&StorageProfile> {
        self.s3_store_profiles.iter().find(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
kubeObjectProtection:
  veleroNamespaceName: backup-system
s3StoreProfiles:
  - s3ProfileName: minio-east
    s3CompatibleEndpoint: http://minio.east:9000
    s3Bucket: kop
    veleroNamespaceSecretKeyRef:
      name: minio-creds
      key: cloud
  - s3ProfileName: minio-west
    s3CompatibleEndpoint: http://minio.west:9000
    s3Bucket: kop
    s3Region: us-west-1
"#;

    #[test]
    fn test_parse_full_config() {
        let config = OperatorConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(
            config.kube_object_protection.velero_namespace_name,
            "backup-system"
        );
        assert!(!config.kube_object_protection.disabled);
        assert_eq!(config.kube_object_protection.stale_recovery_point_multiplier, 3);
        assert_eq!(config.s3_store_profiles.len(), 2);

        let east = config.profile("minio-east").unwrap();
        assert_eq!(east.s3_region, "us-east-1");
        assert_eq!(
            east.velero_namespace_secret_key_ref,
            Some(SecretKeyRef {
                name: "minio-creds".to_string(),
                key: "cloud".to_string()
            })
        );
        assert_eq!(config.profile("minio-west").unwrap().s3_region, "us-west-1");
        assert!(config.profile("missing").is_none());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = OperatorConfig::from_yaml_str("").unwrap();
        assert_eq!(config, OperatorConfig::default());
        assert_eq!(
            config.kube_object_protection.velero_namespace_name,
            DEFAULT_VELERO_NAMESPACE
        );
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = OperatorConfig::load(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config, OperatorConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"kubeObjectProtection:\n  disabled: true\n")
            .unwrap();
        let config = OperatorConfig::load(file.path()).unwrap();
        assert!(config.kube_object_protection.disabled);
    }

    #[test]
    fn test_duplicate_profiles_rejected() {
        let yaml = r#"
s3StoreProfiles:
  - s3ProfileName: a
    s3CompatibleEndpoint: http://a
    s3Bucket: b
  - s3ProfileName: a
    s3CompatibleEndpoint: http://a
    s3Bucket: b
"#;
        let err = OperatorConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_zero_multiplier_rejected() {
        let yaml = "kubeObjectProtection:\n  staleRecoveryPointMultiplier: 0\n";
        assert!(OperatorConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_malformed_yaml_is_serialization_error() {
        let err = OperatorConfig::from_yaml_str("s3StoreProfiles: {{").unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
    }
}
