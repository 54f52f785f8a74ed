//! Controller error types

use kop_recipe::RecipeError;

/// Errors that fail a ProtectionGroup reconcile
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// Store, config or status patch failure
    #[error("{0}")]
    Common(#[from] kop_common::Error),

    /// Recipe could not be expanded
    #[error("recipe resolution failed: {0}")]
    Recipe(#[from] RecipeError),

    /// Kubernetes API failure
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The ProtectionGroup has no namespace
    #[error("missing namespace on ProtectionGroup")]
    MissingNamespace,
}
