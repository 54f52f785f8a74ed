//! Capture and recovery of Kubernetes objects for protected workloads
//!
//! A workload's objects are captured by external jobs (Velero Backups) into
//! one of two slots in every configured S3 store, and recovered by external
//! jobs (Velero Restores) from the last complete slot after failover.
//!
//! - [`capture::CaptureOrchestrator`] runs the capture cycle state machine
//! - [`recover::RecoverOrchestrator`] runs ordered group recovery
//! - [`request::RequestStore`] abstracts the external job system
//! - [`storage::ObjectStorer`] abstracts the S3 stores

#![deny(missing_docs)]

pub mod capture;
pub mod naming;
pub mod recover;
pub mod request;
pub mod schedule;
pub mod snapshot;
pub mod storage;
pub mod velero;
pub mod velero_store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use capture::{CaptureOrchestrator, CaptureOutcome, CaptureTick, Protection};
pub use naming::WorkloadRef;
pub use recover::{RecoverOrchestrator, RecoverOutcome, RecoverTick};
pub use request::{Request, RequestStatus, RequestStore, RequestTarget};
pub use schedule::{decide, CaptureDecision, Requeue, TriggerPolicy};
pub use storage::{
    InMemoryStorerProvider, ObjectStorer, ObjectStorers, ProfileStore, S3StorerProvider,
    StorerProvider,
};
pub use velero_store::VeleroRequestStore;
