//! Capture orchestration
//!
//! One call is one reconcile tick of a workload's capture cycle. A cycle
//! writes to the slot the last recovery point does not use, so the previous
//! point stays intact until the new one is complete. Every job the tick
//! needs is found again by recomputing its name; nothing survives between
//! ticks except the jobs themselves.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use kop_common::crd::{CaptureIdentifier, CaptureSpec};
use kop_common::labels::{generation_annotations, generation_from_annotations};

use crate::naming::{capture_request_name, WorkloadRef};
use crate::request::{requests_by_name, Request, RequestStatus, RequestStore, RequestTarget};
use crate::schedule::{decide, CaptureDecision, Requeue, TriggerPolicy};
use crate::storage::ObjectStorers;

/// Protection state to report after a tick
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Protection {
    /// A new recovery point was recorded
    Protected,
    /// Capturing failed and no fresh recovery point covers the workload
    Unprotected(String),
}

/// Result of one capture tick
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CaptureOutcome {
    /// When to run again
    pub requeue: Requeue,
    /// New recovery point, set only when a cycle completed
    pub recovery_point: Option<CaptureIdentifier>,
    /// New protection state; `None` leaves the reported state unchanged
    pub protection: Option<Protection>,
}

/// Inputs of one capture tick
pub struct CaptureTick<'a> {
    /// Workload being captured
    pub workload: &'a WorkloadRef,
    /// Last recovery point, if any cycle ever completed
    pub last: Option<&'a CaptureIdentifier>,
    /// Resolved capture groups in order
    pub workflow: &'a [CaptureSpec],
    /// Stores to capture into
    pub storers: &'a ObjectStorers,
    /// When a new cycle may start
    pub policy: TriggerPolicy,
    /// Age after which the last recovery point no longer masks a failure
    pub stale_after: Duration,
    /// Current time
    pub now: DateTime<Utc>,
}

/// Drives capture cycles through a request store
pub struct CaptureOrchestrator {
    store: Arc<dyn RequestStore>,
    request_namespace: String,
}

impl CaptureOrchestrator {
    /// Create an orchestrator creating jobs in `request_namespace`
    pub fn new(store: Arc<dyn RequestStore>, request_namespace: impl Into<String>) -> Self {
        Self {
            store,
            request_namespace: request_namespace.into(),
        }
    }

    /// Run one tick: start, resume, or delay a capture cycle
    pub async fn run(&self, tick: &CaptureTick<'_>) -> CaptureOutcome {
        let w = tick.workload;
        // No recovery point yet: the first cycle writes slot 1
        let slot = tick.last.map_or(1, CaptureIdentifier::next_slot);
        let labels = w.owner_labels();

        let existing = match self
            .store
            .list_protects(&self.request_namespace, &labels)
            .await
        {
            Ok(existing) => existing,
            Err(e) => return self.failed(tick, format!("listing capture requests: {}", e)),
        };

        let generation = if existing.is_empty() {
            let decision = match tick.last {
                Some(last) => decide(tick.policy, last, tick.now),
                None => CaptureDecision::StartNow,
            };
            match decision {
                CaptureDecision::StartNow => {}
                CaptureDecision::DelayUntil(delay) => {
                    debug!(workload = %w.name, delay_secs = delay.as_secs(), "capture not due");
                    return CaptureOutcome {
                        requeue: Requeue::After(delay),
                        ..Default::default()
                    };
                }
                CaptureDecision::AlreadyCurrent => {
                    debug!(workload = %w.name, "recovery point is current");
                    return CaptureOutcome::default();
                }
            }

            if let Err(message) = self.delete_stale_artifacts(w, slot, tick.storers).await {
                return self.failed(tick, message);
            }
            info!(workload = %w.name, slot, generation = w.generation, "starting capture cycle");
            w.generation
        } else {
            let generation = existing
                .iter()
                .find_map(|r| generation_from_annotations(r.annotations()))
                .unwrap_or(w.generation);
            debug!(workload = %w.name, slot, requests = existing.len(), "resuming capture cycle");
            generation
        };

        let by_name = requests_by_name(existing);
        let start_time = match self.walk_groups(tick, slot, generation, &by_name).await {
            Ok(Some(start_time)) => start_time,
            Ok(None) => return CaptureOutcome::default(),
            Err(message) => return self.failed(tick, message),
        };

        if let Err(e) = self
            .store
            .delete_protects(&self.request_namespace, &labels)
            .await
        {
            return self.failed(tick, format!("deleting capture requests: {}", e));
        }

        let point = CaptureIdentifier {
            slot,
            start_time,
            start_generation: generation,
        };
        info!(
            workload = %w.name,
            slot,
            start_generation = generation,
            "capture cycle complete"
        );

        CaptureOutcome {
            requeue: Requeue::from_decision(decide(tick.policy, &point, tick.now)),
            recovery_point: Some(point),
            protection: Some(Protection::Protected),
        }
    }

    /// Remove artifacts an abandoned attempt left in the target slot
    async fn delete_stale_artifacts(
        &self,
        w: &WorkloadRef,
        slot: i64,
        storers: &ObjectStorers,
    ) -> Result<(), String> {
        let prefix = format!("{}{}", w.capture_path(slot), self.store.protects_path());
        for p in storers.iter() {
            p.storer.delete_prefix(&prefix).await.map_err(|e| {
                format!(
                    "deleting stale capture artifacts in profile {}: {}",
                    p.profile.name, e
                )
            })?;
        }
        Ok(())
    }

    /// Walk groups in order, creating or polling each group's jobs.
    ///
    /// Returns the cycle's start time once every group is complete, `None`
    /// while a group is still running, and a message on failure.
    async fn walk_groups(
        &self,
        tick: &CaptureTick<'_>,
        slot: i64,
        generation: i64,
        by_name: &HashMap<String, Request>,
    ) -> Result<Option<DateTime<Utc>>, String> {
        let w = tick.workload;
        let prefix = w.capture_name_prefix(slot);
        let path = w.capture_path(slot);
        let mut start_time = None;

        for group in tick.workflow {
            let mut to_create = Vec::new();
            let mut complete = true;

            for p in tick.storers.iter() {
                let name = capture_request_name(&prefix, &group.name, &p.profile.name);
                match by_name.get(&name) {
                    Some(request) => match request.status() {
                        RequestStatus::Done => {
                            if start_time.is_none() {
                                start_time = Some(request.start_time().unwrap_or(tick.now));
                            }
                        }
                        RequestStatus::Processing(state) => {
                            debug!(request = %name, state = %state, "capture request in progress");
                            complete = false;
                        }
                        RequestStatus::Failed(reason) => {
                            error!(request = %name, reason = %reason, "capture request failed");
                            self.deallocate(request).await;
                            return Err(format!("capture request {} failed: {}", name, reason));
                        }
                    },
                    None => {
                        complete = false;
                        to_create.push(
                            RequestTarget::for_profile(
                                &p.profile,
                                path.clone(),
                                &w.namespace,
                                &self.request_namespace,
                                name,
                            )
                            .with_labels(w.owner_labels())
                            .with_annotations(generation_annotations(generation)),
                        );
                    }
                }
            }

            if !to_create.is_empty() {
                self.create_all(group, &to_create).await?;
            }
            if !complete {
                info!(workload = %w.name, group = %group.name, "capture group incomplete");
                return Ok(None);
            }
        }

        Ok(Some(start_time.unwrap_or(tick.now)))
    }

    async fn create_all(&self, group: &CaptureSpec, targets: &[RequestTarget]) -> Result<(), String> {
        let creates = targets
            .iter()
            .map(|target| self.store.create_protect(target, group));
        let mut failures = Vec::new();
        for (target, result) in targets.iter().zip(join_all(creates).await) {
            match result {
                Ok(_) => info!(request = %target.name, "capture request created"),
                Err(e) => {
                    error!(request = %target.name, error = %e, "failed to create capture request");
                    failures.push(format!("{}: {}", target.name, e));
                }
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(format!("creating capture requests: {}", failures.join("; ")))
        }
    }

    async fn deallocate(&self, request: &Request) {
        if let Err(e) = self.store.deallocate(request).await {
            warn!(request = %request.name(), error = %e, "failed to deallocate request");
        }
    }

    fn failed(&self, tick: &CaptureTick<'_>, message: String) -> CaptureOutcome {
        let fresh = tick.last.is_some_and(|last| {
            (tick.now - last.start_time)
                .to_std()
                .map(|age| age < tick.stale_after)
                .unwrap_or(true)
        });
        if fresh {
            warn!(workload = %tick.workload.name, error = %message, "capture failed; previous recovery point still fresh");
        } else {
            error!(workload = %tick.workload.name, error = %message, "capture failed");
        }
        CaptureOutcome {
            requeue: Requeue::Immediate,
            recovery_point: None,
            protection: (!fresh).then_some(Protection::Unprotected(message)),
        }
    }
}
