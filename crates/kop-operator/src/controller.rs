//! ProtectionGroup controller
//!
//! Each reconcile runs one tick of the workload's kube object protection:
//!
//! - recover the workload's objects after it becomes primary
//! - run the capture cycle and upload the workload snapshot
//! - capture one final time when it becomes secondary, if asked to
//!
//! Long-running work happens in Velero jobs. A tick only creates or polls
//! them and reports when it wants to run again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use kop_backup::snapshot;
use kop_backup::{
    CaptureOutcome, CaptureTick, ObjectStorers, Protection, RecoverOutcome, RecoverTick, Requeue,
    TriggerPolicy, WorkloadRef,
};
use kop_common::crd::{
    set_condition, Condition, ConditionStatus, ProtectionGroup, ProtectionGroupStatus,
    ReplicationState, ResolvedRecipe, CONDITION_CLUSTER_DATA_PROTECTED,
    CONDITION_CLUSTER_DATA_READY, PROTECTION_GROUP_FINALIZER,
};
use kop_common::kube_utils::{patch_finalizers, patch_resource_status};
use kop_common::FIELD_MANAGER;

use crate::context::Context;
use crate::error::ControllerError;

/// Requeue after adding the finalizer so the next tick sees it
const FINALIZER_REQUEUE: Duration = Duration::from_secs(1);

/// Requeue after a failed reconcile
const ERROR_REQUEUE: Duration = Duration::from_secs(5);

/// Writes to ProtectionGroup resources
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Merge-patch a ProtectionGroup's status
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ProtectionGroupStatus,
    ) -> Result<(), ControllerError>;

    /// Replace a ProtectionGroup's finalizers
    async fn set_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), ControllerError>;
}

/// [`KubeClient`] backed by the Kubernetes API
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ProtectionGroupStatus,
    ) -> Result<(), ControllerError> {
        patch_resource_status::<ProtectionGroup>(&self.client, name, namespace, status, FIELD_MANAGER)
            .await?;
        Ok(())
    }

    async fn set_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), ControllerError> {
        patch_finalizers::<ProtectionGroup>(&self.client, name, namespace, &finalizers, FIELD_MANAGER)
            .await?;
        Ok(())
    }
}

/// Reconcile a ProtectionGroup
#[instrument(skip(pg, ctx), fields(protection_group = %pg.name_any()))]
pub async fn reconcile(
    pg: Arc<ProtectionGroup>,
    ctx: Arc<Context>,
) -> Result<Action, ControllerError> {
    reconcile_at(&pg, &ctx, Utc::now()).await
}

/// Reconcile as of `now`
pub async fn reconcile_at(
    pg: &ProtectionGroup,
    ctx: &Context,
    now: DateTime<Utc>,
) -> Result<Action, ControllerError> {
    let namespace = pg.namespace().ok_or(ControllerError::MissingNamespace)?;
    let name = pg.name_any();
    let generation = pg.metadata.generation.unwrap_or(0);
    let workload = WorkloadRef::new(&namespace, &name, generation);

    if pg.metadata.deletion_timestamp.is_some() {
        return finalize(pg, &workload, ctx).await;
    }

    if !pg.finalizers().iter().any(|f| f == PROTECTION_GROUP_FINALIZER) {
        let mut finalizers = pg.finalizers().to_vec();
        finalizers.push(PROTECTION_GROUP_FINALIZER.to_string());
        ctx.kube.set_finalizers(&namespace, &name, finalizers).await?;
        debug!(protection_group = %name, "added finalizer");
        return Ok(Action::requeue(FINALIZER_REQUEUE));
    }

    let mut status = pg.status.clone().unwrap_or_default();
    let requeue = protect_objects(pg, &workload, ctx, &mut status, now).await?;

    status.observed_generation = Some(generation);
    if pg.status.as_ref() != Some(&status) {
        status.last_update_time = Some(now);
        ctx.kube.patch_status(&namespace, &name, &status).await?;
        debug!(protection_group = %name, "status updated");
    }

    Ok(requeue.into_action())
}

/// Log and retry
pub fn error_policy(pg: Arc<ProtectionGroup>, error: &ControllerError, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        protection_group = %pg.name_any(),
        "reconciliation failed"
    );
    Action::requeue(ERROR_REQUEUE)
}

/// Whether kube objects are protected at all for this workload
fn kube_objects_protected(pg: &ProtectionGroup, ctx: &Context) -> bool {
    pg.spec.kube_object_protection.is_some() && !ctx.config.kube_object_protection.disabled
}

async fn protect_objects(
    pg: &ProtectionGroup,
    workload: &WorkloadRef,
    ctx: &Context,
    status: &mut ProtectionGroupStatus,
    now: DateTime<Utc>,
) -> Result<Requeue, ControllerError> {
    let generation = workload.generation;
    let recipe = ctx.recipes.resolve(pg).await?;
    status.kube_object_protection.recipe = Some(recipe.clone());

    if !kube_objects_protected(pg, ctx) {
        debug!(protection_group = %workload.name, "kube object protection disabled");
        let ready = pg.spec.replication_state == ReplicationState::Primary;
        mark(status, CONDITION_CLUSTER_DATA_READY, generation, ready, "KubeObjectProtectionDisabled", "");
        return Ok(Requeue::Idle);
    }

    let interval = pg.spec.capture_interval()?;
    let storers = match ObjectStorers::resolve(ctx.storers.as_ref(), &ctx.config, &pg.spec.s3_profiles)
    {
        Ok(storers) => storers,
        Err(e) => {
            warn!(protection_group = %workload.name, error = %e, "storage profile unavailable");
            mark(status, CONDITION_CLUSTER_DATA_PROTECTED, generation, false, "ProfileUnavailable", e.to_string());
            return Ok(Requeue::Immediate);
        }
    };

    match pg.spec.replication_state {
        ReplicationState::Primary => {
            run_primary(pg, workload, ctx, status, &recipe, &storers, interval, now).await
        }
        ReplicationState::Secondary => {
            run_secondary(pg, workload, ctx, status, &recipe, &storers, interval, now).await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_primary(
    pg: &ProtectionGroup,
    workload: &WorkloadRef,
    ctx: &Context,
    status: &mut ProtectionGroupStatus,
    recipe: &ResolvedRecipe,
    storers: &ObjectStorers,
    interval: Duration,
    now: DateTime<Utc>,
) -> Result<Requeue, ControllerError> {
    let generation = workload.generation;

    if !status.condition_true(CONDITION_CLUSTER_DATA_READY) {
        let tick = RecoverTick {
            workload,
            workflow: &recipe.recover_workflow,
            storers,
            now,
        };
        match ctx.recovers.run(&tick).await {
            RecoverOutcome::Complete { duration, point } => {
                info!(
                    protection_group = %workload.name,
                    slot = point.slot,
                    duration_secs = duration.as_secs(),
                    "kube objects recovered"
                );
                status.kube_object_protection.capture_to_recover_from = Some(point);
                mark(status, CONDITION_CLUSTER_DATA_READY, generation, true, "Recovered", "");
            }
            RecoverOutcome::NothingToRecover => {
                mark(status, CONDITION_CLUSTER_DATA_READY, generation, true, "NothingToRecover", "");
            }
            RecoverOutcome::Pending => {
                mark(status, CONDITION_CLUSTER_DATA_READY, generation, false, "Recovering", "");
                return Ok(Requeue::Idle);
            }
            RecoverOutcome::Failed(message) => {
                mark(status, CONDITION_CLUSTER_DATA_READY, generation, false, "RecoverError", message);
                return Ok(Requeue::Immediate);
            }
        }
    }

    if storers.is_empty() {
        debug!(protection_group = %workload.name, "no storage profiles, skipping capture");
        return Ok(Requeue::Idle);
    }

    let multiplier = ctx.config.kube_object_protection.stale_recovery_point_multiplier;
    let tick = CaptureTick {
        workload,
        last: status.kube_object_protection.capture_to_recover_from.as_ref(),
        workflow: &recipe.capture_workflow,
        storers,
        policy: TriggerPolicy::Primary { interval },
        stale_after: interval * multiplier,
        now,
    };
    let outcome = ctx.captures.run(&tick).await;
    let requeue = apply_capture(status, generation, outcome);

    Ok(requeue.min(upload_snapshot(pg, workload, status, storers).await))
}

#[allow(clippy::too_many_arguments)]
async fn run_secondary(
    pg: &ProtectionGroup,
    workload: &WorkloadRef,
    ctx: &Context,
    status: &mut ProtectionGroupStatus,
    recipe: &ResolvedRecipe,
    storers: &ObjectStorers,
    interval: Duration,
    now: DateTime<Utc>,
) -> Result<Requeue, ControllerError> {
    let generation = workload.generation;
    mark(status, CONDITION_CLUSTER_DATA_READY, generation, false, "Secondary", "");

    if !pg.spec.run_final_sync || storers.is_empty() {
        return Ok(Requeue::Idle);
    }

    let multiplier = ctx.config.kube_object_protection.stale_recovery_point_multiplier;
    let tick = CaptureTick {
        workload,
        last: status.kube_object_protection.capture_to_recover_from.as_ref(),
        workflow: &recipe.capture_workflow,
        storers,
        policy: TriggerPolicy::Secondary { generation },
        stale_after: interval * multiplier,
        now,
    };
    let outcome = ctx.captures.run(&tick).await;
    let recorded = outcome.recovery_point.is_some();
    let requeue = apply_capture(status, generation, outcome);

    if recorded {
        info!(protection_group = %workload.name, "final sync captured");
        return Ok(requeue.min(upload_snapshot(pg, workload, status, storers).await));
    }
    Ok(requeue)
}

fn apply_capture(status: &mut ProtectionGroupStatus, generation: i64, outcome: CaptureOutcome) -> Requeue {
    if let Some(point) = outcome.recovery_point {
        status.kube_object_protection.capture_to_recover_from = Some(point);
    }
    match outcome.protection {
        Some(Protection::Protected) => {
            mark(status, CONDITION_CLUSTER_DATA_PROTECTED, generation, true, "Protected", "");
        }
        Some(Protection::Unprotected(message)) => {
            mark(status, CONDITION_CLUSTER_DATA_PROTECTED, generation, false, "CaptureError", message);
        }
        None => {}
    }
    outcome.requeue
}

/// Upload the workload with its current status to every profile
async fn upload_snapshot(
    pg: &ProtectionGroup,
    workload: &WorkloadRef,
    status: &mut ProtectionGroupStatus,
    storers: &ObjectStorers,
) -> Requeue {
    let mut snapshot = pg.clone();
    snapshot.status = Some(status.clone());
    match snapshot::protect(&snapshot, &workload.namespace, storers).await {
        Ok(()) => Requeue::Idle,
        Err(e) => {
            warn!(protection_group = %workload.name, error = %e, "workload snapshot upload failed");
            mark(status, CONDITION_CLUSTER_DATA_PROTECTED, workload.generation, false, "UploadError", e.to_string());
            Requeue::Immediate
        }
    }
}

/// Clean up requests and stored data, then release the finalizer
async fn finalize(
    pg: &ProtectionGroup,
    workload: &WorkloadRef,
    ctx: &Context,
) -> Result<Action, ControllerError> {
    if !pg.finalizers().iter().any(|f| f == PROTECTION_GROUP_FINALIZER) {
        return Ok(Action::await_change());
    }

    info!(protection_group = %workload.name, "cleaning up deleted workload");
    ctx.recovers.delete_requests(workload).await?;
    ctx.requests
        .delete_protects(ctx.request_namespace(), &workload.owner_labels())
        .await?;

    if pg.spec.replication_state == ReplicationState::Primary {
        match ObjectStorers::resolve(ctx.storers.as_ref(), &ctx.config, &pg.spec.s3_profiles) {
            Ok(storers) => {
                snapshot::unprotect(&workload.namespace, &workload.name, &storers).await?
            }
            Err(e) => warn!(
                protection_group = %workload.name,
                error = %e,
                "storage profile unavailable, leaving stored objects"
            ),
        }
    }

    let finalizers = pg
        .finalizers()
        .iter()
        .filter(|f| *f != PROTECTION_GROUP_FINALIZER)
        .cloned()
        .collect();
    ctx.kube
        .set_finalizers(&workload.namespace, &workload.name, finalizers)
        .await?;
    Ok(Action::await_change())
}

fn mark(
    status: &mut ProtectionGroupStatus,
    type_: &str,
    generation: i64,
    ok: bool,
    reason: &str,
    message: impl Into<String>,
) {
    let condition_status = if ok {
        ConditionStatus::True
    } else {
        ConditionStatus::False
    };
    set_condition(
        &mut status.conditions,
        Condition::new(type_, condition_status, generation, reason, message),
    );
}
