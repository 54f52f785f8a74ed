//! Resolved workflow types
//!
//! These are the fully expanded units of work handed to the capture and
//! recover orchestrators. They are also recorded in the ProtectionGroup
//! status so operators can see what a recipe resolved to.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::selector::LabelSelector;

/// Recover-side backup name meaning "run this group as a capture against
/// the target instead of restoring it"
pub const USE_BACKUP_NOT_RESTORE: &str = "use-backup-not-restore";

/// Resource filters, selectors and hooks of one unit of work
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperationSpec {
    /// Namespaces to include
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included_namespaces: Vec<String>,

    /// Resource kinds to include
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included_resources: Vec<String>,

    /// Resource kinds to exclude
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_resources: Vec<String>,

    /// Objects must match this selector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,

    /// Objects must match at least one of these selectors
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub or_label_selectors: Vec<LabelSelector>,

    /// Whether cluster-scoped resources are included
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_cluster_resources: Option<bool>,

    /// Hooks run as part of this unit
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<HookSpec>,
}

/// One capture group
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSpec {
    /// Group name; part of the job name
    #[serde(default)]
    pub name: String,

    /// What the group captures
    #[serde(flatten)]
    pub spec: OperationSpec,
}

/// One recover group
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecoverSpec {
    /// Capture group the restore reads from
    #[serde(default)]
    pub backup_name: String,

    /// What the group restores
    #[serde(flatten)]
    pub spec: OperationSpec,

    /// Source namespace to target namespace remapping
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub namespace_mapping: BTreeMap<String, String>,

    /// What to do with objects that already exist ("none", "update")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_resource_policy: Option<String>,
}

/// A command executed in matching pods
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HookSpec {
    /// Hook name
    pub name: String,

    /// Hook type ("exec")
    #[serde(default, rename = "type")]
    pub type_: String,

    /// Command and arguments
    #[serde(default)]
    pub command: Vec<String>,

    /// How long the command may run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i64>,

    /// Container to exec in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,

    /// Pods the command runs in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,
}

/// Which PVCs of the workload are protected
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PvcSelector {
    /// PVC label selector
    #[serde(default)]
    pub label_selector: LabelSelector,

    /// Namespaces the PVCs live in
    #[serde(default)]
    pub namespace_names: Vec<String>,
}

/// A recipe expanded for one workload
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedRecipe {
    /// PVCs protected alongside the objects
    #[serde(default)]
    pub pvc_selector: PvcSelector,

    /// Capture groups in execution order
    #[serde(default)]
    pub capture_workflow: Vec<CaptureSpec>,

    /// Recover groups in execution order
    #[serde(default)]
    pub recover_workflow: Vec<RecoverSpec>,
}

/// The last fully completed capture cycle (the recovery point)
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureIdentifier {
    /// Slot (0 or 1) the cycle's artifacts were written to
    pub slot: i64,

    /// Start time of the cycle's first job
    pub start_time: DateTime<Utc>,

    /// Workload generation when the cycle started
    pub start_generation: i64,
}

impl Default for CaptureIdentifier {
    fn default() -> Self {
        Self {
            slot: 0,
            start_time: DateTime::<Utc>::default(),
            start_generation: 0,
        }
    }
}

impl RecoverSpec {
    /// Whether this group runs as a capture rather than a restore
    pub fn runs_as_capture(&self) -> bool {
        self.backup_name == USE_BACKUP_NOT_RESTORE
    }
}

impl CaptureIdentifier {
    /// The slot the next cycle writes to
    pub fn next_slot(&self) -> i64 {
        1 - self.slot
    }
}
