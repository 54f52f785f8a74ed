//! Velero resource types
//!
//! Typed structs for the Velero resources kop creates (Backup, Restore,
//! BackupStorageLocation). They implement `HasApiResource` so dynamic API
//! calls and serialized `apiVersion`/`kind` always agree.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kop_common::config::SecretKeyRef;
use kop_common::crd::{HookSpec, LabelSelector, OperationSpec};
use kop_common::kube_utils::{HasApiResource, ObjectMeta};

use crate::request::RequestStatus;

/// Velero API version shared by every kind below
const VELERO_API_VERSION: &str = "velero.io/v1";

// =============================================================================
// BackupStorageLocation
// =============================================================================

/// Velero BackupStorageLocation resource
///
/// Each job gets its own location so its artifacts land under the job's
/// capture path.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupStorageLocation {
    /// API version
    #[serde(default = "BackupStorageLocation::default_api_version")]
    pub api_version: String,
    /// Resource kind
    #[serde(default = "BackupStorageLocation::default_kind")]
    pub kind: String,
    /// Resource metadata
    pub metadata: ObjectMeta,
    /// BSL specification
    pub spec: BackupStorageLocationSpec,
}

impl HasApiResource for BackupStorageLocation {
    const API_VERSION: &'static str = VELERO_API_VERSION;
    const KIND: &'static str = "BackupStorageLocation";
}

impl BackupStorageLocation {
    fn default_api_version() -> String {
        <Self as HasApiResource>::API_VERSION.to_string()
    }
    fn default_kind() -> String {
        <Self as HasApiResource>::KIND.to_string()
    }

    /// Create a new BackupStorageLocation
    pub fn new(metadata: ObjectMeta, spec: BackupStorageLocationSpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
        }
    }
}

/// BackupStorageLocation spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupStorageLocationSpec {
    /// Provider name
    pub provider: String,
    /// Bucket and prefix
    pub object_storage: ObjectStorageLocation,
    /// Provider-specific configuration (s3Url, region, s3ForcePathStyle)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
    /// Credential reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<SecretKeyRef>,
}

impl BackupStorageLocationSpec {
    /// S3-compatible location at `prefix` within `bucket`
    pub fn s3(
        endpoint: &str,
        bucket: &str,
        region: &str,
        prefix: &str,
        credential: Option<SecretKeyRef>,
    ) -> Self {
        Self {
            provider: "aws".to_string(),
            object_storage: ObjectStorageLocation {
                bucket: bucket.to_string(),
                prefix: Some(prefix.trim_end_matches('/').to_string()),
            },
            config: BTreeMap::from([
                ("region".to_string(), region.to_string()),
                ("s3ForcePathStyle".to_string(), "true".to_string()),
                ("s3Url".to_string(), endpoint.to_string()),
            ]),
            credential,
        }
    }
}

/// Object storage configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStorageLocation {
    /// Bucket name
    pub bucket: String,
    /// Prefix within the bucket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

// =============================================================================
// Backup
// =============================================================================

/// Velero Backup resource
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    /// API version
    #[serde(default = "Backup::default_api_version")]
    pub api_version: String,
    /// Resource kind
    #[serde(default = "Backup::default_kind")]
    pub kind: String,
    /// Resource metadata
    pub metadata: ObjectMeta,
    /// Backup specification
    pub spec: BackupSpec,
    /// Status written by Velero
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
}

impl HasApiResource for Backup {
    const API_VERSION: &'static str = VELERO_API_VERSION;
    const KIND: &'static str = "Backup";
}

impl Backup {
    fn default_api_version() -> String {
        <Self as HasApiResource>::API_VERSION.to_string()
    }
    fn default_kind() -> String {
        <Self as HasApiResource>::KIND.to_string()
    }

    /// Create a new Backup
    pub fn new(metadata: ObjectMeta, spec: BackupSpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
            status: None,
        }
    }

    /// Map the Velero phase to a request status
    pub fn request_status(&self) -> RequestStatus {
        let status = self.status.as_ref();
        let phase = status.and_then(|s| s.phase.as_deref()).unwrap_or_default();
        match phase {
            "Completed" => RequestStatus::Done,
            "" | "New" | "InProgress" => RequestStatus::Processing(phase_or_new(phase)),
            p if p.starts_with("WaitingForPluginOperations")
                || p.starts_with("Finalizing")
                || p.starts_with("Uploading") =>
            {
                RequestStatus::Processing(p.to_string())
            }
            p => RequestStatus::Failed(failure_message(p, status)),
        }
    }
}

/// Backup spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupSpec {
    /// Included namespaces
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included_namespaces: Vec<String>,
    /// Included resources
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included_resources: Vec<String>,
    /// Excluded resources
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_resources: Vec<String>,
    /// Label selector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,
    /// Alternative label selectors
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub or_label_selectors: Vec<LabelSelector>,
    /// Whether cluster-scoped resources are included
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_cluster_resources: Option<bool>,
    /// Storage location name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_location: Option<String>,
    /// Volumes are protected by replication, never by Velero
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_volumes: Option<bool>,
    /// Hooks run during the backup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hooks: Option<BackupHooks>,
}

impl BackupSpec {
    /// Backup of the objects an operation selects, stored at `storage_location`
    pub fn from_operation(spec: &OperationSpec, storage_location: &str) -> Self {
        let hooks = if spec.hooks.is_empty() {
            None
        } else {
            Some(BackupHooks {
                resources: spec
                    .hooks
                    .iter()
                    .map(|h| BackupResourceHookSpec::from_hook(h, spec))
                    .collect(),
            })
        };

        Self {
            included_namespaces: spec.included_namespaces.clone(),
            included_resources: spec.included_resources.clone(),
            excluded_resources: spec.excluded_resources.clone(),
            label_selector: spec.label_selector.clone(),
            or_label_selectors: spec.or_label_selectors.clone(),
            include_cluster_resources: spec.include_cluster_resources,
            storage_location: Some(storage_location.to_string()),
            snapshot_volumes: Some(false),
            hooks,
        }
    }
}

/// Backup hooks
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupHooks {
    /// Per-resource hooks
    #[serde(default)]
    pub resources: Vec<BackupResourceHookSpec>,
}

/// Hooks applied to the pods one selector matches
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupResourceHookSpec {
    /// Hook name
    pub name: String,
    /// Namespaces of the target pods
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included_namespaces: Vec<String>,
    /// Resource kinds the hook applies to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included_resources: Vec<String>,
    /// Pod selector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,
    /// Commands run before the pods are backed up
    #[serde(default)]
    pub pre: Vec<BackupResourceHook>,
}

impl BackupResourceHookSpec {
    fn from_hook(hook: &HookSpec, spec: &OperationSpec) -> Self {
        Self {
            name: hook.name.clone(),
            included_namespaces: spec.included_namespaces.clone(),
            included_resources: spec.included_resources.clone(),
            label_selector: hook.label_selector.clone(),
            pre: vec![BackupResourceHook {
                exec: ExecHook {
                    container: hook.container.clone(),
                    command: hook.command.clone(),
                    on_error: Some("Fail".to_string()),
                    timeout: hook.timeout_seconds.map(|s| format!("{}s", s)),
                },
            }],
        }
    }
}

/// One hook action
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupResourceHook {
    /// Command executed in a container
    pub exec: ExecHook,
}

/// Exec hook
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecHook {
    /// Container name; the pod's first container when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    /// Command and arguments
    pub command: Vec<String>,
    /// "Continue" or "Fail"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<String>,
    /// Duration string (e.g., "30s")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

// =============================================================================
// Restore
// =============================================================================

/// Velero Restore resource
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Restore {
    /// API version
    #[serde(default = "Restore::default_api_version")]
    pub api_version: String,
    /// Resource kind
    #[serde(default = "Restore::default_kind")]
    pub kind: String,
    /// Resource metadata
    pub metadata: ObjectMeta,
    /// Restore specification
    pub spec: RestoreSpec,
    /// Status written by Velero
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
}

impl HasApiResource for Restore {
    const API_VERSION: &'static str = VELERO_API_VERSION;
    const KIND: &'static str = "Restore";
}

impl Restore {
    fn default_api_version() -> String {
        <Self as HasApiResource>::API_VERSION.to_string()
    }
    fn default_kind() -> String {
        <Self as HasApiResource>::KIND.to_string()
    }

    /// Create a new Restore
    pub fn new(metadata: ObjectMeta, spec: RestoreSpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
            status: None,
        }
    }

    /// Map the Velero phase to a request status
    pub fn request_status(&self) -> RequestStatus {
        let status = self.status.as_ref();
        let phase = status.and_then(|s| s.phase.as_deref()).unwrap_or_default();
        match phase {
            "Completed" => RequestStatus::Done,
            "" | "New" | "InProgress" => RequestStatus::Processing(phase_or_new(phase)),
            p if p.starts_with("WaitingForPluginOperations") => {
                RequestStatus::Processing(p.to_string())
            }
            p => RequestStatus::Failed(failure_message(p, status)),
        }
    }
}

/// Restore spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSpec {
    /// Name of the Velero Backup to restore from
    pub backup_name: String,
    /// Included namespaces
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included_namespaces: Vec<String>,
    /// Included resources
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included_resources: Vec<String>,
    /// Excluded resources
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_resources: Vec<String>,
    /// Label selector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,
    /// Alternative label selectors
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub or_label_selectors: Vec<LabelSelector>,
    /// Whether cluster-scoped resources are included
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_cluster_resources: Option<bool>,
    /// Source to target namespace remapping
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub namespace_mapping: BTreeMap<String, String>,
    /// What to do with objects that already exist
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_resource_policy: Option<String>,
    /// Volumes are restored by replication, never by Velero
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_p_vs: Option<bool>,
}

impl RestoreSpec {
    /// Restore of `backup_name` filtered the way a recover group selects
    pub fn from_operation(
        spec: &OperationSpec,
        backup_name: &str,
        namespace_mapping: &BTreeMap<String, String>,
        existing_resource_policy: Option<&str>,
    ) -> Self {
        Self {
            backup_name: backup_name.to_string(),
            included_namespaces: spec.included_namespaces.clone(),
            included_resources: spec.included_resources.clone(),
            excluded_resources: spec.excluded_resources.clone(),
            label_selector: spec.label_selector.clone(),
            or_label_selectors: spec.or_label_selectors.clone(),
            include_cluster_resources: spec.include_cluster_resources,
            namespace_mapping: namespace_mapping.clone(),
            existing_resource_policy: existing_resource_policy.map(str::to_string),
            restore_p_vs: Some(false),
        }
    }
}

// =============================================================================
// Shared Types
// =============================================================================

/// Status fields shared by Backup and Restore
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    /// Velero phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// When Velero started the job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<DateTime<Utc>>,
    /// When Velero finished the job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_timestamp: Option<DateTime<Utc>>,
    /// Reason for a failed phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Number of errors encountered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<i64>,
    /// Validation failures
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<String>,
}

fn phase_or_new(phase: &str) -> String {
    if phase.is_empty() {
        "New".to_string()
    } else {
        phase.to_string()
    }
}

fn failure_message(phase: &str, status: Option<&JobStatus>) -> String {
    let Some(status) = status else {
        return phase.to_string();
    };
    let mut msg = phase.to_string();
    if let Some(reason) = &status.failure_reason {
        msg.push_str(": ");
        msg.push_str(reason);
    }
    if !status.validation_errors.is_empty() {
        msg.push_str(": ");
        msg.push_str(&status.validation_errors.join("; "));
    }
    msg
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn backup_with_phase(phase: Option<&str>) -> Backup {
        let mut b = Backup::new(ObjectMeta::new("b", "velero"), BackupSpec::default());
        b.status = phase.map(|p| JobStatus {
            phase: Some(p.to_string()),
            ..Default::default()
        });
        b
    }

    fn restore_with_phase(phase: &str) -> Restore {
        let mut r = Restore::new(ObjectMeta::new("r", "velero"), RestoreSpec::default());
        r.status = Some(JobStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        });
        r
    }

    #[test]
    fn test_backup_phase_mapping() {
        assert_eq!(
            backup_with_phase(Some("Completed")).request_status(),
            RequestStatus::Done
        );
        for phase in [
            "New",
            "InProgress",
            "WaitingForPluginOperations",
            "WaitingForPluginOperationsPartiallyFailed",
            "Finalizing",
            "FinalizingPartiallyFailed",
            "Uploading",
            "UploadingPartialFailure",
        ] {
            assert_eq!(
                backup_with_phase(Some(phase)).request_status(),
                RequestStatus::Processing(phase.to_string()),
                "{}",
                phase
            );
        }
        for phase in ["FailedValidation", "PartiallyFailed", "Failed", "Deleting"] {
            assert!(
                matches!(
                    backup_with_phase(Some(phase)).request_status(),
                    RequestStatus::Failed(_)
                ),
                "{}",
                phase
            );
        }
    }

    #[test]
    fn test_backup_without_status_is_processing() {
        assert_eq!(
            backup_with_phase(None).request_status(),
            RequestStatus::Processing("New".to_string())
        );
        assert_eq!(
            backup_with_phase(Some("")).request_status(),
            RequestStatus::Processing("New".to_string())
        );
    }

    #[test]
    fn test_restore_phase_mapping() {
        assert_eq!(restore_with_phase("Completed").request_status(), RequestStatus::Done);
        assert!(matches!(
            restore_with_phase("WaitingForPluginOperations").request_status(),
            RequestStatus::Processing(_)
        ));
        for phase in ["FailedValidation", "PartiallyFailed", "Failed"] {
            assert!(matches!(
                restore_with_phase(phase).request_status(),
                RequestStatus::Failed(_)
            ));
        }
    }

    #[test]
    fn test_failure_message_includes_reason() {
        let mut b = backup_with_phase(Some("FailedValidation"));
        if let Some(s) = b.status.as_mut() {
            s.validation_errors = vec!["invalid included namespace".to_string()];
        }
        assert_eq!(
            b.request_status(),
            RequestStatus::Failed("FailedValidation: invalid included namespace".to_string())
        );
    }

    #[test]
    fn test_backup_spec_from_hook_operation() {
        let op = OperationSpec {
            included_namespaces: vec!["apps".to_string()],
            included_resources: vec!["pods".to_string()],
            include_cluster_resources: Some(false),
            label_selector: LabelSelector::parse("app=db").unwrap(),
            hooks: vec![HookSpec {
                name: "db-quiesce".to_string(),
                type_: "exec".to_string(),
                command: vec!["sync".to_string()],
                timeout_seconds: Some(30),
                container: None,
                label_selector: LabelSelector::parse("app=db").unwrap(),
            }],
            ..Default::default()
        };
        let spec = BackupSpec::from_operation(&op, "apps--busybox--1--db-quiesce--minio");
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["storageLocation"], "apps--busybox--1--db-quiesce--minio");
        assert_eq!(json["snapshotVolumes"], false);
        let hook = &json["hooks"]["resources"][0];
        assert_eq!(hook["name"], "db-quiesce");
        assert_eq!(hook["includedNamespaces"][0], "apps");
        assert_eq!(hook["pre"][0]["exec"]["timeout"], "30s");
        assert_eq!(hook["pre"][0]["exec"]["onError"], "Fail");
        assert_eq!(hook["labelSelector"]["matchLabels"]["app"], "db");
    }

    #[test]
    fn test_backup_spec_without_hooks() {
        let spec = BackupSpec::from_operation(&OperationSpec::default(), "loc");
        assert!(spec.hooks.is_none());
        let json = serde_json::to_value(&spec).unwrap();
        assert!(json.get("hooks").is_none());
        assert!(json.get("includedNamespaces").is_none());
    }

    #[test]
    fn test_restore_spec_wire_format() {
        let spec = RestoreSpec::from_operation(
            &OperationSpec::default(),
            "apps--busybox--0--config--minio",
            &BTreeMap::from([("apps".to_string(), "apps-dr".to_string())]),
            Some("update"),
        );
        let restore = Restore::new(ObjectMeta::new("apps--busybox--0", "velero"), spec);
        let json = serde_json::to_value(&restore).unwrap();
        assert_eq!(json["apiVersion"], "velero.io/v1");
        assert_eq!(json["kind"], "Restore");
        assert_eq!(json["spec"]["backupName"], "apps--busybox--0--config--minio");
        assert_eq!(json["spec"]["namespaceMapping"]["apps"], "apps-dr");
        assert_eq!(json["spec"]["existingResourcePolicy"], "update");
        assert_eq!(json["spec"]["restorePVs"], false);
        assert!(json.get("status").is_none());
    }

    #[test]
    fn test_bsl_spec_for_s3() {
        let spec = BackupStorageLocationSpec::s3(
            "http://minio:9000",
            "kop",
            "us-east-1",
            "apps/busybox/kube-objects/1/",
            Some(SecretKeyRef {
                name: "creds".to_string(),
                key: "cloud".to_string(),
            }),
        );
        let bsl = BackupStorageLocation::new(ObjectMeta::new("x", "velero"), spec);
        let json = serde_json::to_value(&bsl).unwrap();
        assert_eq!(json["kind"], "BackupStorageLocation");
        assert_eq!(json["spec"]["objectStorage"]["prefix"], "apps/busybox/kube-objects/1");
        assert_eq!(json["spec"]["config"]["s3Url"], "http://minio:9000");
        assert_eq!(json["spec"]["credential"]["key"], "cloud");

        let parsed: BackupStorageLocation = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, bsl);
    }

    #[test]
    fn test_backup_reads_velero_status() {
        let json = serde_json::json!({
            "apiVersion": "velero.io/v1",
            "kind": "Backup",
            "metadata": {
                "name": "apps--busybox--1--config--minio",
                "namespace": "velero",
                "uid": "ignored",
                "labels": {"kop.dev/owner-name": "busybox"}
            },
            "spec": {"includedNamespaces": ["apps"]},
            "status": {
                "phase": "Completed",
                "startTimestamp": "2024-01-01T00:00:00Z",
                "completionTimestamp": "2024-01-01T00:01:00Z"
            }
        });
        let b: Backup = serde_json::from_value(json).unwrap();
        assert_eq!(b.request_status(), RequestStatus::Done);
        let status = b.status.unwrap();
        assert_eq!(status.start_timestamp.unwrap().timestamp(), 1_704_067_200);
    }
}
