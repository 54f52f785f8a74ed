//! Request store contract
//!
//! A request is one externally executing capture (protect) or recover job.
//! Everything the orchestrators know about in-flight work is read back from
//! the store on each tick through the owner labels. Nothing is cached
//! between ticks, so a restarted controller resumes by recomputing names.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[cfg(test)]
use mockall::automock;

use kop_common::config::{SecretKeyRef, StorageProfile};
use kop_common::crd::{CaptureSpec, RecoverSpec};
use kop_common::Result;

use crate::velero::{Backup, Restore};

/// Observed state of one request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestStatus {
    /// The job finished successfully
    Done,
    /// The job is still running; carries the job system's state text
    Processing(String),
    /// The job failed and will not make progress
    Failed(String),
}

impl RequestStatus {
    /// Whether the job finished successfully
    pub fn is_done(&self) -> bool {
        matches!(self, RequestStatus::Done)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestStatus::Done => write!(f, "Done"),
            RequestStatus::Processing(state) => write!(f, "Processing({})", state),
            RequestStatus::Failed(reason) => write!(f, "Failed({})", reason),
        }
    }
}

/// Handle to one external job
#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    /// Capture job
    Protect(Backup),
    /// Recover job
    Recover(Restore),
}

impl Request {
    /// Job name
    pub fn name(&self) -> &str {
        match self {
            Request::Protect(b) => &b.metadata.name,
            Request::Recover(r) => &r.metadata.name,
        }
    }

    /// Namespace the job lives in
    pub fn namespace(&self) -> &str {
        match self {
            Request::Protect(b) => &b.metadata.namespace,
            Request::Recover(r) => &r.metadata.namespace,
        }
    }

    /// Job labels
    pub fn labels(&self) -> &BTreeMap<String, String> {
        match self {
            Request::Protect(b) => &b.metadata.labels,
            Request::Recover(r) => &r.metadata.labels,
        }
    }

    /// Job annotations
    pub fn annotations(&self) -> &BTreeMap<String, String> {
        match self {
            Request::Protect(b) => &b.metadata.annotations,
            Request::Recover(r) => &r.metadata.annotations,
        }
    }

    /// Current status of the job
    pub fn status(&self) -> RequestStatus {
        match self {
            Request::Protect(b) => b.request_status(),
            Request::Recover(r) => r.request_status(),
        }
    }

    /// When the job system started the job
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        let status = match self {
            Request::Protect(b) => b.status.as_ref(),
            Request::Recover(r) => r.status.as_ref(),
        };
        status.and_then(|s| s.start_timestamp)
    }

    /// When the job system finished the job
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        let status = match self {
            Request::Protect(b) => b.status.as_ref(),
            Request::Recover(r) => r.status.as_ref(),
        };
        status.and_then(|s| s.completion_timestamp)
    }

    /// Kind of the underlying job object
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Protect(_) => "Backup",
            Request::Recover(_) => "Restore",
        }
    }
}

/// Where and under which identity a new job is created
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestTarget {
    /// S3-compatible endpoint URL
    pub endpoint: String,
    /// Bucket name
    pub bucket: String,
    /// Bucket region
    pub region: String,
    /// Credentials secret in the job namespace
    pub secret: Option<SecretKeyRef>,
    /// Capture path within the bucket
    pub path: String,
    /// Namespace of the protected workload
    pub source_namespace: String,
    /// Namespace the job object is created in
    pub request_namespace: String,
    /// Deterministic job name
    pub name: String,
    /// Labels used to find the job again
    pub labels: BTreeMap<String, String>,
    /// Annotations recorded on the job
    pub annotations: BTreeMap<String, String>,
}

impl RequestTarget {
    /// Target in one storage profile
    pub fn for_profile(
        profile: &StorageProfile,
        path: impl Into<String>,
        source_namespace: impl Into<String>,
        request_namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: profile.s3_compatible_endpoint.clone(),
            bucket: profile.s3_bucket.clone(),
            region: profile.s3_region.clone(),
            secret: profile.velero_namespace_secret_key_ref.clone(),
            path: path.into(),
            source_namespace: source_namespace.into(),
            request_namespace: request_namespace.into(),
            name: name.into(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    /// Set the labels
    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    /// Set the annotations
    pub fn with_annotations(mut self, annotations: BTreeMap<String, String>) -> Self {
        self.annotations = annotations;
        self
    }
}

/// Creates, lists, polls and deletes external jobs.
///
/// Create calls are idempotent under a name: creating a job that already
/// exists returns the existing job.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Create (or get) a capture job
    async fn create_protect(&self, target: &RequestTarget, spec: &CaptureSpec) -> Result<Request>;

    /// Create (or get) a recover job reading the capture `backup_name`
    async fn create_recover(
        &self,
        target: &RequestTarget,
        backup_name: &str,
        spec: &RecoverSpec,
    ) -> Result<Request>;

    /// List capture jobs carrying all `labels`
    async fn list_protects(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Request>>;

    /// List recover jobs carrying all `labels`
    async fn list_recovers(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Request>>;

    /// Delete capture jobs carrying all `labels`
    async fn delete_protects(&self, namespace: &str, labels: &BTreeMap<String, String>)
        -> Result<()>;

    /// Delete recover jobs carrying all `labels`
    async fn delete_recovers(&self, namespace: &str, labels: &BTreeMap<String, String>)
        -> Result<()>;

    /// Delete one job and what it owns. A missing job is not an error.
    async fn deallocate(&self, request: &Request) -> Result<()>;

    /// Layout of capture artifacts under a capture path
    fn protects_path(&self) -> &'static str;

    /// Layout of recover artifacts under a capture path
    fn recovers_path(&self) -> &'static str;
}

/// Index a freshly listed set of requests by name
pub fn requests_by_name(requests: Vec<Request>) -> HashMap<String, Request> {
    requests
        .into_iter()
        .map(|r| (r.name().to_string(), r))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::velero::{BackupSpec, JobStatus, RestoreSpec};
    use kop_common::kube_utils::ObjectMeta;

    fn backup(name: &str, phase: &str) -> Request {
        let mut b = Backup::new(ObjectMeta::new(name, "velero"), BackupSpec::default());
        b.status = Some(JobStatus {
            phase: Some(phase.to_string()),
            start_timestamp: DateTime::<Utc>::from_timestamp(100, 0),
            completion_timestamp: DateTime::<Utc>::from_timestamp(160, 0),
            ..Default::default()
        });
        Request::Protect(b)
    }

    #[test]
    fn test_request_accessors() {
        let r = backup("apps--busybox--1--config--minio", "Completed");
        assert_eq!(r.name(), "apps--busybox--1--config--minio");
        assert_eq!(r.namespace(), "velero");
        assert_eq!(r.kind(), "Backup");
        assert!(r.status().is_done());
        assert_eq!(r.start_time().unwrap().timestamp(), 100);
        assert_eq!(r.end_time().unwrap().timestamp(), 160);
    }

    #[test]
    fn test_recover_request_without_status() {
        let r = Request::Recover(Restore::new(
            ObjectMeta::new("apps--busybox--0", "velero"),
            RestoreSpec::default(),
        ));
        assert_eq!(r.kind(), "Restore");
        assert!(r.start_time().is_none());
        assert!(matches!(r.status(), RequestStatus::Processing(_)));
    }

    #[test]
    fn test_requests_by_name() {
        let map = requests_by_name(vec![backup("a", "Completed"), backup("b", "InProgress")]);
        assert_eq!(map.len(), 2);
        assert!(map["a"].status().is_done());
        assert_eq!(
            map["b"].status(),
            RequestStatus::Processing("InProgress".to_string())
        );
    }

    #[test]
    fn test_target_for_profile() {
        let profile = StorageProfile {
            name: "minio".to_string(),
            s3_compatible_endpoint: "http://minio:9000".to_string(),
            s3_bucket: "kop".to_string(),
            s3_region: "us-east-1".to_string(),
            velero_namespace_secret_key_ref: None,
            access_key_id: None,
            secret_access_key: None,
        };
        let target = RequestTarget::for_profile(
            &profile,
            "apps/busybox/kube-objects/1/",
            "apps",
            "velero",
            "apps--busybox--1--config--minio",
        )
        .with_labels(BTreeMap::from([("k".to_string(), "v".to_string())]));
        assert_eq!(target.bucket, "kop");
        assert_eq!(target.endpoint, "http://minio:9000");
        assert_eq!(target.labels.len(), 1);
        assert!(target.annotations.is_empty());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(RequestStatus::Done.to_string(), "Done");
        assert_eq!(
            RequestStatus::Failed("Failed: boom".to_string()).to_string(),
            "Failed(Failed: boom)"
        );
    }
}
