//! Workload snapshot persistence
//!
//! The ProtectionGroup itself, including its recovery point, is uploaded to
//! every storage profile. After failover the peer cluster downloads it to
//! learn which capture slot to recover from.

use bytes::Bytes;
use futures::future::join_all;
use tracing::{debug, info, warn};

use kop_common::crd::{CaptureIdentifier, ProtectionGroup};
use kop_common::{Error, Result};

use crate::naming::{snapshot_key, workload_path};
use crate::storage::{ObjectStorer, ObjectStorers, ProfileStore};

/// Upload the workload to every profile
pub async fn protect(pg: &ProtectionGroup, namespace: &str, storers: &ObjectStorers) -> Result<()> {
    let name = pg.metadata.name.as_deref().unwrap_or_default();
    let key = snapshot_key(namespace, name);
    let body = Bytes::from(
        serde_json::to_vec(pg)
            .map_err(|e| Error::serialization_for_kind("ProtectionGroup", e.to_string()))?,
    );

    let uploads = storers
        .iter()
        .map(|p| {
            let key = key.clone();
            let body = body.clone();
            async move { p.storer.put(&key, body).await }
        })
        .collect::<Vec<_>>();
    for result in join_all(uploads).await {
        result?;
    }
    debug!(workload = %name, profiles = storers.len(), "uploaded workload snapshot");
    Ok(())
}

/// Delete everything stored for the workload from every profile
pub async fn unprotect(namespace: &str, name: &str, storers: &ObjectStorers) -> Result<()> {
    let prefix = workload_path(namespace, name);
    for p in storers.iter() {
        let removed = p.storer.delete_prefix(&prefix).await?;
        info!(workload = %name, profile = %p.profile.name, removed, "deleted workload objects");
    }
    Ok(())
}

/// A recovery point and the profile it was read from
#[derive(Clone)]
pub struct SourcePoint<'a> {
    /// Last complete capture of the source workload
    pub point: CaptureIdentifier,
    /// Profile holding the snapshot and its captures
    pub source: &'a ProfileStore,
}

/// Download the recovery point recorded in a workload snapshot.
///
/// Profiles are tried in order and the first snapshot found wins. `None`
/// means every profile was read and none holds a recovery point. When no
/// point was found and some profile could not be read, its error is
/// returned: the unread profile may hold the only snapshot.
pub async fn download<'a>(
    namespace: &str,
    name: &str,
    storers: &'a ObjectStorers,
) -> Result<Option<SourcePoint<'a>>> {
    let key = snapshot_key(namespace, name);
    let mut last_err = None;

    for p in storers.iter() {
        match read_recovery_point(p.storer.as_ref(), &key).await {
            Ok(Some(point)) => return Ok(Some(SourcePoint { point, source: p })),
            Ok(None) => {}
            Err(e) => {
                warn!(profile = %p.profile.name, error = %e, "failed to read workload snapshot");
                last_err = Some(e);
            }
        }
    }

    match last_err {
        Some(e) => Err(e),
        None => Ok(None),
    }
}

async fn read_recovery_point(
    storer: &dyn ObjectStorer,
    key: &str,
) -> Result<Option<CaptureIdentifier>> {
    let Some(bytes) = storer.get(key).await? else {
        return Ok(None);
    };
    let pg: ProtectionGroup = serde_json::from_slice(&bytes)
        .map_err(|e| Error::serialization_for_kind("ProtectionGroup", e.to_string()))?;
    Ok(pg
        .status
        .and_then(|s| s.kube_object_protection.capture_to_recover_from))
}
