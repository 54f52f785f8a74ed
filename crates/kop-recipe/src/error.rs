//! Recipe resolution error types

/// Errors raised while resolving a recipe
#[derive(Debug, thiserror::Error)]
pub enum RecipeError {
    /// A referenced group, hook, op or workflow step does not exist
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Kind of the missing reference (e.g., "group", "hook")
        kind: String,
        /// Name as written in the recipe
        name: String,
    },

    /// A label selector string in the recipe does not parse
    #[error("invalid label selector in {owner}: {source}")]
    InvalidSelector {
        /// Group or hook carrying the selector
        owner: String,
        /// Parse failure
        source: kop_common::Error,
    },

    /// Kubernetes API failure while reading the recipe
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Parameter expansion produced text that no longer parses
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RecipeError {
    pub(crate) fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Errors caused by what the recipe references rather than by the
    /// cluster or the expansion pass. Callers fall back to the default
    /// workflows on these.
    pub fn is_resolution_error(&self) -> bool {
        match self {
            Self::NotFound { .. } | Self::InvalidSelector { .. } => true,
            Self::Kube(kube::Error::Api(ae)) => ae.code == 404,
            _ => false,
        }
    }
}
