//! Controller wiring
//!
//! The ProtectionGroup controller also watches the Velero jobs it creates,
//! so a job changing phase wakes up the owning workload instead of waiting
//! for the next timed requeue.

use std::sync::Arc;

use futures::StreamExt;
use kube::api::DynamicObject;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use kop_backup::velero::{Backup, Restore};
use kop_common::config::OperatorConfig;
use kop_common::crd::ProtectionGroup;
use kop_common::kube_utils::HasApiResource;
use kop_common::labels::owner_namespace_and_name;

use crate::context::Context;
use crate::controller::{error_policy, reconcile};

/// Watcher timeout (seconds); must stay below the client read timeout (30s)
/// so idle watches are closed by the API server first
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Run the ProtectionGroup controller until a shutdown signal arrives
pub async fn run_controller(client: Client, config: OperatorConfig) {
    let namespace = config.kube_object_protection.velero_namespace_name.clone();
    let ctx = Arc::new(Context::new(client.clone(), config));
    let groups: Api<ProtectionGroup> = Api::all(client.clone());

    let backup_ar = Backup::api_resource();
    let restore_ar = Restore::api_resource();
    let backups: Api<DynamicObject> = Api::namespaced_with(client.clone(), &namespace, &backup_ar);
    let restores: Api<DynamicObject> = Api::namespaced_with(client, &namespace, &restore_ar);

    tracing::info!(velero_namespace = %namespace, "- ProtectionGroup controller");

    Controller::new(groups, watcher_config())
        .watches_with(backups, backup_ar, watcher_config(), owner_ref)
        .watches_with(restores, restore_ar, watcher_config(), owner_ref)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result("ProtectionGroup"))
        .await;
}

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// The ProtectionGroup a job belongs to, from its owner labels
fn owner_ref(job: DynamicObject) -> Option<ObjectRef<ProtectionGroup>> {
    let (namespace, name) = owner_namespace_and_name(job.metadata.labels.as_ref()?)?;
    Some(ObjectRef::new(&name).within(&namespace))
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kop_common::labels::owner_labels;
    use kube::api::ObjectMeta;

    fn job(labels: Option<std::collections::BTreeMap<String, String>>) -> DynamicObject {
        let mut obj = DynamicObject::new("apps--busybox--1--config--east", &Backup::api_resource());
        obj.metadata = ObjectMeta {
            name: obj.metadata.name.clone(),
            namespace: Some("velero".to_string()),
            labels,
            ..Default::default()
        };
        obj
    }

    #[test]
    fn test_job_maps_to_owner() {
        let owner = owner_ref(job(Some(owner_labels("apps", "busybox")))).unwrap();
        assert_eq!(owner, ObjectRef::new("busybox").within("apps"));
    }

    #[test]
    fn test_unlabeled_job_is_ignored() {
        assert!(owner_ref(job(None)).is_none());
        let mut partial = owner_labels("apps", "busybox");
        partial.retain(|k, _| k == kop_common::labels::LABEL_OWNER_NAME);
        assert!(owner_ref(job(Some(partial))).is_none());
    }
}
