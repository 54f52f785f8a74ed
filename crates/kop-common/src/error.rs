//! Error types for kube object protection
//!
//! Errors carry the workload, storage profile, or request they concern so a
//! single log line is enough to locate the failing piece in production.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for kop operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for CRD specs or configuration
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the resource with invalid configuration
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.kubeObjectProtection.captureInterval")
        field: Option<String>,
    },

    /// A referenced object does not exist
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Kind of the missing object (e.g., "Recipe", "S3Profile")
        kind: String,
        /// Name of the missing object
        name: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Object store (S3) error
    #[error("object store error [{profile}]: {message}")]
    ObjectStore {
        /// Storage profile the store belongs to
        profile: String,
        /// Description of what failed
        message: String,
    },

    /// External backup/restore request error
    #[error("request error [{request}]: {message}")]
    Request {
        /// Name of the request
        request: String,
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "telemetry")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an object store error for a storage profile
    pub fn object_store(profile: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ObjectStore {
            profile: profile.into(),
            message: msg.into(),
        }
    }

    /// Create a request error for a named backup/restore request
    pub fn request(request: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Request {
            request: request.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation, not-found and serialization errors need a spec or recipe
    /// fix. Store and request errors are retried on the next tick.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409 && ae.code != 429
            ),
            Error::Validation { .. } => false,
            Error::NotFound { .. } => false,
            Error::Serialization { .. } => false,
            Error::ObjectStore { .. } => true,
            Error::Request { .. } => true,
            Error::Internal { .. } => true,
        }
    }

    /// Whether this is a Kubernetes "already exists" (409) error
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 409)
    }

    /// Whether this is a not-found error, from kop or from the API server
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            _ => false,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            Error::ObjectStore { profile, .. } => Some(profile),
            Error::Request { request, .. } => Some(request),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> Error {
        Error::Kube {
            source: kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".to_string(),
                message: "test".to_string(),
                reason: "Test".to_string(),
                code,
            }),
        }
    }

    /// Story: a missing recipe is reported by kind and name and not retried
    #[test]
    fn story_missing_recipe_is_not_retryable() {
        let err = Error::not_found("Recipe", "busybox-recipe");
        assert_eq!(err.to_string(), "Recipe 'busybox-recipe' not found");
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }

    /// Story: an unreachable S3 profile is retried on the next tick
    #[test]
    fn story_object_store_errors_are_retryable() {
        let err = Error::object_store("minio-east", "connection refused");
        assert!(err.to_string().contains("[minio-east]"));
        assert!(err.is_retryable());
        assert_eq!(err.context(), Some("minio-east"));
    }

    #[test]
    fn test_request_error_context() {
        let err = Error::request("app--busybox--0--default--minio", "backup Failed");
        assert!(err.is_retryable());
        assert_eq!(err.context(), Some("app--busybox--0--default--minio"));
    }

    #[test]
    fn test_validation_field_path() {
        let err = Error::validation_for_field(
            "busybox",
            "spec.kubeObjectProtection.captureInterval",
            "invalid duration",
        );
        match &err {
            Error::Validation { field, .. } => assert_eq!(
                field.as_deref(),
                Some("spec.kubeObjectProtection.captureInterval")
            ),
            _ => panic!("Expected Validation variant"),
        }
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_kube_error_classification() {
        assert!(api_error(409).is_already_exists());
        assert!(api_error(404).is_not_found());
        assert!(!api_error(404).is_retryable());
        assert!(api_error(409).is_retryable());
        assert!(api_error(500).is_retryable());
        assert!(!api_error(500).is_already_exists());
    }

    #[test]
    fn test_serde_json_error_converts_to_serialization() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_internal_error_default_context() {
        let err = Error::internal("unexpected state");
        assert_eq!(err.context(), Some(UNKNOWN_CONTEXT));
        assert!(err.to_string().contains("[unknown]"));
        let err = Error::internal_with_context("reconciler", "unexpected state");
        assert_eq!(err.context(), Some("reconciler"));
    }
}
