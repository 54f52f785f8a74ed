//! Custom Resource Definitions for kop
//!
//! `Recipe` and `ProtectionGroup` are the CRDs kop owns. The workflow types
//! are the resolved form both orchestrators consume.

mod protection_group;
mod recipe;
mod selector;
mod types;
mod workflow;

pub use protection_group::{
    KubeObjectProtectionSpec, KubeObjectProtectionStatus, ProtectionGroup, ProtectionGroupSpec,
    ProtectionGroupStatus, RecipeRef, ReplicationState, CONDITION_CLUSTER_DATA_PROTECTED,
    CONDITION_CLUSTER_DATA_READY, PROTECTION_GROUP_FINALIZER,
};
pub use recipe::{
    Recipe, RecipeGroup, RecipeHook, RecipeHookOp, RecipeSpec, RecipeWorkflow,
    CAPTURE_WORKFLOW_NAME, GROUP_TAG, HOOK_TAG, RECOVER_WORKFLOW_NAME,
};
pub use selector::{LabelSelector, LabelSelectorOperator, LabelSelectorRequirement};
pub use types::{find_condition, set_condition, Condition, ConditionStatus};
pub use workflow::{
    CaptureIdentifier, CaptureSpec, HookSpec, OperationSpec, PvcSelector, RecoverSpec,
    ResolvedRecipe, USE_BACKUP_NOT_RESTORE,
};
