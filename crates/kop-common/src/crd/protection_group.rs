//! ProtectionGroup Custom Resource Definition
//!
//! A ProtectionGroup marks one replicated workload for protection. On the
//! primary cluster its Kubernetes objects are captured on an interval; on
//! failover the cluster that becomes primary recovers them from the last
//! complete capture.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::selector::LabelSelector;
use super::types::{find_condition, Condition};
use super::workflow::{CaptureIdentifier, ResolvedRecipe};
use crate::duration::capture_interval_or_default;
use crate::Result;

/// Condition reporting that the workload's objects are recovered and usable
pub const CONDITION_CLUSTER_DATA_READY: &str = "ClusterDataReady";

/// Condition reporting that the workload's objects are captured to every store
pub const CONDITION_CLUSTER_DATA_PROTECTED: &str = "ClusterDataProtected";

/// Finalizer kop adds so stored data is cleaned up on deletion
pub const PROTECTION_GROUP_FINALIZER: &str = "kop.dev/protection-group";

/// Replication role of the workload on this cluster
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ReplicationState {
    /// The workload runs here and is captured
    #[default]
    Primary,
    /// The workload runs elsewhere; this cluster only receives
    Secondary,
}

impl std::fmt::Display for ReplicationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "Primary"),
            Self::Secondary => write!(f, "Secondary"),
        }
    }
}

/// Reference to a Recipe
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct RecipeRef {
    /// Recipe namespace; the workload namespace when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Recipe name
    pub name: String,
}

/// Kube object protection settings of a workload
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubeObjectProtectionSpec {
    /// Time between capture cycle starts (e.g., "5m", "1h30m")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_interval: Option<String>,

    /// Recipe describing what to capture and how to recover it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe_ref: Option<RecipeRef>,

    /// Values substituted for `${name}` placeholders in the recipe
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub recipe_parameters: BTreeMap<String, Vec<String>>,
}

/// Kube object protection state of a workload
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubeObjectProtectionStatus {
    /// Last complete capture cycle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_to_recover_from: Option<CaptureIdentifier>,

    /// What the recipe resolved to on the last reconcile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe: Option<ResolvedRecipe>,
}

/// Status of a ProtectionGroup
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProtectionGroupStatus {
    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Generation the status was computed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Capture and recover state
    #[serde(default)]
    pub kube_object_protection: KubeObjectProtectionStatus,

    /// Last time the status changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
}

impl ProtectionGroupStatus {
    /// Whether a condition of the given type is `True`
    pub fn condition_true(&self, type_: &str) -> bool {
        find_condition(&self.conditions, type_).is_some_and(Condition::is_true)
    }
}

/// Specification for a ProtectionGroup
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kop.dev",
    version = "v1alpha1",
    kind = "ProtectionGroup",
    plural = "protectiongroups",
    shortname = "pg",
    namespaced,
    status = "ProtectionGroupStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".spec.replicationState"}"#,
    printcolumn = r#"{"name":"Slot","type":"integer","jsonPath":".status.kubeObjectProtection.captureToRecoverFrom.slot"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ProtectionGroupSpec {
    /// Role of the workload on this cluster
    #[serde(default)]
    pub replication_state: ReplicationState,

    /// Capture one last time when the workload becomes secondary
    #[serde(default)]
    pub run_final_sync: bool,

    /// Storage profiles captures are written to
    #[serde(default)]
    pub s3_profiles: Vec<String>,

    /// PVCs protected when no recipe names volumes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pvc_selector: Option<LabelSelector>,

    /// Kube object protection; disabled when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube_object_protection: Option<KubeObjectProtectionSpec>,
}

impl ProtectionGroupSpec {
    /// Capture interval, defaulting to five minutes
    pub fn capture_interval(&self) -> Result<Duration> {
        capture_interval_or_default(
            self.kube_object_protection
                .as_ref()
                .and_then(|k| k.capture_interval.as_deref()),
        )
    }
}
