//! ProtectionGroup controller for kube object protection
//!
//! Wires the recipe resolver and the capture and recover orchestrators into
//! a `kube::runtime::Controller`.

#![deny(missing_docs)]

pub mod context;
pub mod controller;
pub mod error;
pub mod runner;

pub use context::Context;
pub use controller::{error_policy, reconcile, KubeClient, KubeClientImpl};
pub use error::ControllerError;
pub use runner::run_controller;
