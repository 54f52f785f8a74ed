//! Common types for kop: CRDs, errors, configuration, and utilities

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod duration;
pub mod error;
pub mod kube_utils;
pub mod labels;
pub mod telemetry;
pub mod yaml;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group for all kop custom resources
pub const API_GROUP: &str = "kop.dev";

/// Namespace the operator runs in when none is configured
pub const KOP_SYSTEM_NAMESPACE: &str = "kop-system";

/// Standard label key for the resource name
pub const LABEL_NAME: &str = "app.kubernetes.io/name";

/// Standard label key for the managing controller
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of [`LABEL_MANAGED_BY`] on resources created by kop
pub const LABEL_MANAGED_BY_KOP: &str = "kop";

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "kop-controller";
