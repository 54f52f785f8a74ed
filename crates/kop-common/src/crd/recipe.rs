//! Recipe Custom Resource Definition
//!
//! A Recipe describes how to capture and recover an application's
//! Kubernetes objects: named resource groups, hooks that run commands in
//! pods, and workflows that order groups and hook operations.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Workflow the capture orchestrator runs
pub const CAPTURE_WORKFLOW_NAME: &str = "backup";

/// Workflow the recover orchestrator runs
pub const RECOVER_WORKFLOW_NAME: &str = "restore";

/// Sequence tag referencing an entry of `spec.groups`
pub const GROUP_TAG: &str = "group";

/// Sequence tag referencing a hook operation
pub const HOOK_TAG: &str = "hook";

/// Specification for a Recipe
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kop.dev",
    version = "v1alpha1",
    kind = "Recipe",
    plural = "recipes",
    namespaced,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RecipeSpec {
    /// Volumes to protect; defaults to the workload's PVC selector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<RecipeGroup>,

    /// Named resource groups referenced by workflows
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<RecipeGroup>,

    /// Hooks whose operations workflows can run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<RecipeHook>,

    /// Ordered workflows, looked up by name
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workflows: Vec<RecipeWorkflow>,
}

impl RecipeSpec {
    /// Look up a workflow by name
    pub fn workflow(&self, name: &str) -> Option<&RecipeWorkflow> {
        self.workflows.iter().find(|w| w.name == name)
    }

    /// Look up a group by exact name
    pub fn group(&self, name: &str) -> Option<&RecipeGroup> {
        self.groups.iter().find(|g| g.name == name)
    }
}

/// A set of resources captured or recovered together
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecipeGroup {
    /// Group name, unique within the recipe
    pub name: String,

    /// Group type ("resource" or "volume")
    #[serde(default, rename = "type")]
    pub type_: String,

    /// Name of the capture group a recover group restores from;
    /// defaults to this group's name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_ref: Option<String>,

    /// Namespaces to include
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included_namespaces: Vec<String>,

    /// Label selector in string form; empty means no selector
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label_selector: String,

    /// Resource kinds to include
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included_resource_types: Vec<String>,

    /// Resource kinds to exclude
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_resource_types: Vec<String>,

    /// Whether cluster-scoped resources are included
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_cluster_resources: Option<bool>,
}

/// A set of operations run in pods matched by a selector
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecipeHook {
    /// Hook name, unique within the recipe
    pub name: String,

    /// Namespace of the target pods; defaults to the workload namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Hook type ("exec")
    #[serde(default, rename = "type")]
    pub type_: String,

    /// Pod label selector in string form
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label_selector: String,

    /// Operations this hook defines
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ops: Vec<RecipeHookOp>,
}

impl RecipeHook {
    /// Look up an operation by name
    pub fn op(&self, name: &str) -> Option<&RecipeHookOp> {
        self.ops.iter().find(|o| o.name == name)
    }
}

/// One command a hook can run
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecipeHookOp {
    /// Operation name, unique within the hook
    pub name: String,

    /// Command and arguments
    #[serde(default)]
    pub command: Vec<String>,

    /// Container to exec in; the first container when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,

    /// How long the command may run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i64>,
}

/// An ordered list of `{typeTag: refName}` steps
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecipeWorkflow {
    /// Workflow name ("backup", "restore")
    pub name: String,

    /// Steps in execution order; each map has exactly one entry
    #[serde(default)]
    pub sequence: Vec<BTreeMap<String, String>>,
}
