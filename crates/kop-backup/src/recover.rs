//! Recover orchestration
//!
//! Restores a workload's objects from the recovery point its previous
//! primary recorded. Groups run strictly in order: a group's job is not
//! created until every earlier group's job is Done.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use kop_common::crd::{CaptureIdentifier, CaptureSpec, RecoverSpec};
use kop_common::labels::generation_annotations;

use crate::naming::{capture_request_name, WorkloadRef};
use crate::request::{requests_by_name, Request, RequestStatus, RequestStore, RequestTarget};
use crate::schedule::Requeue;
use crate::snapshot::{download, SourcePoint};
use crate::storage::ObjectStorers;

/// Result of one recover tick
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecoverOutcome {
    /// The source never completed a capture
    NothingToRecover,
    /// A group's job is running or was just created
    Pending,
    /// Every group is recovered
    Complete {
        /// Time from the first group's start to now
        duration: Duration,
        /// Recovery point the objects were restored from
        point: CaptureIdentifier,
    },
    /// The tick failed and should be retried
    Failed(String),
}

impl RecoverOutcome {
    /// When to run again
    pub fn requeue(&self) -> Requeue {
        match self {
            RecoverOutcome::Failed(_) => Requeue::Immediate,
            _ => Requeue::Idle,
        }
    }

    /// Whether recovery needs no further ticks
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            RecoverOutcome::NothingToRecover | RecoverOutcome::Complete { .. }
        )
    }
}

/// Inputs of one recover tick
pub struct RecoverTick<'a> {
    /// Workload being recovered
    pub workload: &'a WorkloadRef,
    /// Resolved recover groups in order
    pub workflow: &'a [RecoverSpec],
    /// Stores holding the source workload's snapshot and captures
    pub storers: &'a ObjectStorers,
    /// Current time
    pub now: DateTime<Utc>,
}

/// Drives ordered group recovery through a request store
pub struct RecoverOrchestrator {
    store: Arc<dyn RequestStore>,
    request_namespace: String,
}

impl RecoverOrchestrator {
    /// Create an orchestrator creating jobs in `request_namespace`
    pub fn new(store: Arc<dyn RequestStore>, request_namespace: impl Into<String>) -> Self {
        Self {
            store,
            request_namespace: request_namespace.into(),
        }
    }

    /// Run one tick of recovery
    pub async fn run(&self, tick: &RecoverTick<'_>) -> RecoverOutcome {
        let w = tick.workload;
        let source = match download(&w.namespace, &w.name, tick.storers).await {
            Ok(Some(source)) => source,
            Ok(None) => {
                info!(workload = %w.name, "no recovery point recorded; nothing to recover");
                return RecoverOutcome::NothingToRecover;
            }
            Err(e) => return failed(format!("downloading workload snapshot: {}", e)),
        };

        let labels = w.owner_labels();
        let recovers = match self
            .store
            .list_recovers(&self.request_namespace, &labels)
            .await
        {
            Ok(r) => requests_by_name(r),
            Err(e) => return failed(format!("listing recover requests: {}", e)),
        };
        let protects = match self
            .store
            .list_protects(&self.request_namespace, &labels)
            .await
        {
            Ok(r) => requests_by_name(r),
            Err(e) => return failed(format!("listing capture requests: {}", e)),
        };

        let mut started = None;
        for (index, group) in tick.workflow.iter().enumerate() {
            let name = w.recover_request_name(index);
            let existing = if group.runs_as_capture() {
                protects.get(&name)
            } else {
                recovers.get(&name)
            };

            match existing.map(|r| (r, r.status())) {
                Some((request, RequestStatus::Done)) => {
                    started.get_or_insert(request.start_time().unwrap_or(tick.now));
                }
                Some((_, RequestStatus::Processing(state))) => {
                    debug!(request = %name, state = %state, "recover request in progress");
                    return RecoverOutcome::Pending;
                }
                Some((request, RequestStatus::Failed(reason))) => {
                    error!(request = %name, reason = %reason, "recover request failed");
                    self.deallocate(request).await;
                    return failed(format!("recover request {} failed: {}", name, reason));
                }
                None => {
                    return match self.create(tick, &source, index, group).await {
                        Ok(()) => RecoverOutcome::Pending,
                        Err(message) => failed(message),
                    };
                }
            }
        }

        if let Err(e) = self.cleanup(&labels).await {
            return failed(format!("deleting recover requests: {}", e));
        }

        let duration = started
            .and_then(|s| (tick.now - s).to_std().ok())
            .unwrap_or_default();
        info!(
            workload = %w.name,
            slot = source.point.slot,
            duration_secs = duration.as_secs(),
            "recovery complete"
        );
        RecoverOutcome::Complete {
            duration,
            point: source.point,
        }
    }

    async fn create(
        &self,
        tick: &RecoverTick<'_>,
        source: &SourcePoint<'_>,
        index: usize,
        group: &RecoverSpec,
    ) -> Result<(), String> {
        let w = tick.workload;
        let name = w.recover_request_name(index);
        let profile = &source.source.profile;
        let slot = source.point.slot;

        let result = if group.runs_as_capture() {
            // Snapshot the target into the slot the source point does not use
            let target = RequestTarget::for_profile(
                profile,
                w.capture_path(source.point.next_slot()),
                &w.namespace,
                &self.request_namespace,
                &name,
            )
            .with_labels(w.owner_labels())
            .with_annotations(generation_annotations(w.generation));
            let spec = CaptureSpec {
                name: name.clone(),
                spec: group.spec.clone(),
            };
            self.store.create_protect(&target, &spec).await
        } else {
            let target = RequestTarget::for_profile(
                profile,
                w.capture_path(slot),
                &w.namespace,
                &self.request_namespace,
                &name,
            )
            .with_labels(w.owner_labels());
            let backup_name =
                capture_request_name(&w.capture_name_prefix(slot), &group.backup_name, &profile.name);
            self.store
                .create_recover(&target, &backup_name, group)
                .await
        };

        match result {
            Ok(_) => {
                info!(request = %name, group = index, profile = %profile.name, "recover request created");
                Ok(())
            }
            Err(e) => {
                error!(request = %name, error = %e, "failed to create recover request");
                Err(format!("creating recover request {}: {}", name, e))
            }
        }
    }

    async fn cleanup(&self, labels: &BTreeMap<String, String>) -> kop_common::Result<()> {
        self.store
            .delete_recovers(&self.request_namespace, labels)
            .await?;
        self.store
            .delete_protects(&self.request_namespace, labels)
            .await
    }

    /// Delete every recover request of a workload
    pub async fn delete_requests(&self, workload: &WorkloadRef) -> kop_common::Result<()> {
        self.store
            .delete_recovers(&self.request_namespace, &workload.owner_labels())
            .await
    }

    async fn deallocate(&self, request: &Request) {
        if let Err(e) = self.store.deallocate(request).await {
            warn!(request = %request.name(), error = %e, "failed to deallocate request");
        }
    }
}

fn failed(message: String) -> RecoverOutcome {
    error!(error = %message, "recovery failed");
    RecoverOutcome::Failed(message)
}
