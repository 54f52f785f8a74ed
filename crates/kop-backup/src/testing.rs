//! In-memory request store for orchestrator tests
//!
//! Create is idempotent by name like the real job system. Tests drive job
//! progress by setting Velero phases directly.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use kop_common::crd::{CaptureSpec, RecoverSpec};
use kop_common::kube_utils::ObjectMeta;
use kop_common::{Error, Result};

use crate::request::{Request, RequestStore, RequestTarget};
use crate::velero::{Backup, BackupSpec, JobStatus, Restore, RestoreSpec};

/// Request store keeping Velero jobs in memory
#[derive(Default)]
pub struct FakeRequestStore {
    protects: Mutex<BTreeMap<String, Backup>>,
    recovers: Mutex<BTreeMap<String, Restore>>,
    targets: Mutex<HashMap<String, RequestTarget>>,
    created: Mutex<Vec<String>>,
    create_calls: Mutex<usize>,
    deallocated: Mutex<Vec<String>>,
    fail_lists: AtomicBool,
    fail_creates: AtomicBool,
}

fn has_labels(have: &BTreeMap<String, String>, want: &BTreeMap<String, String>) -> bool {
    want.iter().all(|(k, v)| have.get(k) == Some(v))
}

fn meta(target: &RequestTarget) -> ObjectMeta {
    ObjectMeta::new(&target.name, &target.request_namespace)
        .with_labels(&target.labels)
        .with_annotations(&target.annotations)
}

impl FakeRequestStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a job Completed with the given start time
    pub fn complete(&self, name: &str, started: DateTime<Utc>) {
        self.set_status(name, "Completed", Some(started));
    }

    /// Set a job's phase
    pub fn set_phase(&self, name: &str, phase: &str) {
        self.set_status(name, phase, None);
    }

    /// Complete every job currently known
    pub fn complete_all(&self, started: DateTime<Utc>) {
        let names: Vec<String> = self
            .protect_names()
            .into_iter()
            .chain(self.recover_names())
            .collect();
        for name in names {
            self.complete(&name, started);
        }
    }

    fn set_status(&self, name: &str, phase: &str, started: Option<DateTime<Utc>>) {
        let status = JobStatus {
            phase: Some(phase.to_string()),
            start_timestamp: started,
            completion_timestamp: started,
            ..Default::default()
        };
        if let Some(b) = self.protects.lock().unwrap().get_mut(name) {
            b.status = Some(status.clone());
        }
        if let Some(r) = self.recovers.lock().unwrap().get_mut(name) {
            r.status = Some(status);
        }
    }

    /// Names of live capture jobs
    pub fn protect_names(&self) -> Vec<String> {
        self.protects.lock().unwrap().keys().cloned().collect()
    }

    /// Names of live restore jobs
    pub fn recover_names(&self) -> Vec<String> {
        self.recovers.lock().unwrap().keys().cloned().collect()
    }

    /// Names in the order they were first created
    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    /// Create calls, including repeated and rejected ones
    pub fn create_calls(&self) -> usize {
        *self.create_calls.lock().unwrap()
    }

    /// Names of deallocated jobs in order
    pub fn deallocated(&self) -> Vec<String> {
        self.deallocated.lock().unwrap().clone()
    }

    /// Target a job was created with
    pub fn target(&self, name: &str) -> Option<RequestTarget> {
        self.targets.lock().unwrap().get(name).cloned()
    }

    /// Live restore job by name
    pub fn restore(&self, name: &str) -> Option<Restore> {
        self.recovers.lock().unwrap().get(name).cloned()
    }

    /// Make every list call fail
    pub fn fail_lists(&self, fail: bool) {
        self.fail_lists.store(fail, Ordering::SeqCst);
    }

    /// Make every create call fail
    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    fn record_create(&self, target: &RequestTarget) -> Result<()> {
        *self.create_calls.lock().unwrap() += 1;
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(Error::request(&target.name, "create rejected"));
        }
        Ok(())
    }

    fn record_new(&self, target: &RequestTarget) {
        self.created.lock().unwrap().push(target.name.clone());
        self.targets
            .lock()
            .unwrap()
            .insert(target.name.clone(), target.clone());
    }

    fn check_list(&self) -> Result<()> {
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(Error::internal_with_context("fake-store", "list failed"));
        }
        Ok(())
    }
}

#[async_trait]
impl RequestStore for FakeRequestStore {
    async fn create_protect(&self, target: &RequestTarget, spec: &CaptureSpec) -> Result<Request> {
        self.record_create(target)?;
        let mut protects = self.protects.lock().unwrap();
        if let Some(existing) = protects.get(&target.name) {
            return Ok(Request::Protect(existing.clone()));
        }
        let backup = Backup::new(meta(target), BackupSpec::from_operation(&spec.spec, &target.name));
        protects.insert(target.name.clone(), backup.clone());
        drop(protects);
        self.record_new(target);
        Ok(Request::Protect(backup))
    }

    async fn create_recover(
        &self,
        target: &RequestTarget,
        backup_name: &str,
        spec: &RecoverSpec,
    ) -> Result<Request> {
        self.record_create(target)?;
        let mut recovers = self.recovers.lock().unwrap();
        if let Some(existing) = recovers.get(&target.name) {
            return Ok(Request::Recover(existing.clone()));
        }
        let restore = Restore::new(
            meta(target),
            RestoreSpec::from_operation(
                &spec.spec,
                backup_name,
                &spec.namespace_mapping,
                spec.existing_resource_policy.as_deref(),
            ),
        );
        recovers.insert(target.name.clone(), restore.clone());
        drop(recovers);
        self.record_new(target);
        Ok(Request::Recover(restore))
    }

    async fn list_protects(
        &self,
        _namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Request>> {
        self.check_list()?;
        Ok(self
            .protects
            .lock()
            .unwrap()
            .values()
            .filter(|b| has_labels(&b.metadata.labels, labels))
            .cloned()
            .map(Request::Protect)
            .collect())
    }

    async fn list_recovers(
        &self,
        _namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Request>> {
        self.check_list()?;
        Ok(self
            .recovers
            .lock()
            .unwrap()
            .values()
            .filter(|r| has_labels(&r.metadata.labels, labels))
            .cloned()
            .map(Request::Recover)
            .collect())
    }

    async fn delete_protects(
        &self,
        _namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.protects
            .lock()
            .unwrap()
            .retain(|_, b| !has_labels(&b.metadata.labels, labels));
        Ok(())
    }

    async fn delete_recovers(
        &self,
        _namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.recovers
            .lock()
            .unwrap()
            .retain(|_, r| !has_labels(&r.metadata.labels, labels));
        Ok(())
    }

    async fn deallocate(&self, request: &Request) -> Result<()> {
        match request {
            Request::Protect(_) => {
                self.protects.lock().unwrap().remove(request.name());
            }
            Request::Recover(_) => {
                self.recovers.lock().unwrap().remove(request.name());
            }
        }
        self.deallocated
            .lock()
            .unwrap()
            .push(request.name().to_string());
        Ok(())
    }

    fn protects_path(&self) -> &'static str {
        "backups/"
    }

    fn recovers_path(&self) -> &'static str {
        "restores/"
    }
}
