//! Recipe resolution for kube object protection
//!
//! Expands a workload's Recipe into:
//! - the PVC selector for its volumes
//! - the ordered capture workflow (`backup`)
//! - the ordered recover workflow (`restore`)

#![deny(missing_docs)]

pub mod error;
pub mod expand;
pub mod resolver;
pub mod workflow;

pub use error::RecipeError;
pub use expand::expand_parameters;
pub use resolver::{KubeRecipeReader, RecipeReader, RecipeResolver};
pub use workflow::{
    capture_workflow, default_capture_workflow, default_recover_workflow, find_hook_op,
    recover_workflow,
};
