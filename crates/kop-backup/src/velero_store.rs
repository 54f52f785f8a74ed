//! Velero-backed request store
//!
//! Every request is a Velero `Backup` or `Restore` plus a
//! `BackupStorageLocation` of the same name and labels pointing at the
//! request's capture path. Velero kinds are not part of k8s-openapi, so
//! they are reached through `DynamicObject` and converted to the typed
//! structs in [`crate::velero`] with serde.

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use kop_common::crd::{CaptureSpec, RecoverSpec};
use kop_common::kube_utils::{HasApiResource, ObjectMeta};
use kop_common::labels::selector_string;
use kop_common::{Error, Result};

use crate::request::{Request, RequestStore, RequestTarget};
use crate::velero::{
    Backup, BackupSpec, BackupStorageLocation, BackupStorageLocationSpec, Restore, RestoreSpec,
};

/// Velero writes backup artifacts under this prefix of a location
const BACKUPS_PATH: &str = "backups/";

/// Velero writes restore artifacts under this prefix of a location
const RESTORES_PATH: &str = "restores/";

/// Request store creating Velero resources
pub struct VeleroRequestStore {
    client: Client,
}

impl VeleroRequestStore {
    /// Create a store using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<T: HasApiResource>(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &T::api_resource())
    }

    /// Create a resource; an existing one with the same name is returned as is.
    async fn create_or_get<T>(&self, resource: &T, namespace: &str, name: &str) -> Result<T>
    where
        T: Serialize + DeserializeOwned + HasApiResource,
    {
        let api = self.api::<T>(namespace);
        let obj: DynamicObject = to_dynamic(resource)?;
        let created = match api.create(&PostParams::default(), &obj).await {
            Ok(created) => {
                info!(kind = T::KIND, name = %name, namespace = %namespace, "created");
                created
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(kind = T::KIND, name = %name, "already exists");
                api.get(name).await?
            }
            Err(e) => return Err(e.into()),
        };
        from_dynamic(created)
    }

    async fn create_location(&self, target: &RequestTarget) -> Result<BackupStorageLocation> {
        let bsl = BackupStorageLocation::new(
            self.metadata(target),
            BackupStorageLocationSpec::s3(
                &target.endpoint,
                &target.bucket,
                &target.region,
                &target.path,
                target.secret.clone(),
            ),
        );
        self.create_or_get(&bsl, &target.request_namespace, &target.name)
            .await
    }

    fn metadata(&self, target: &RequestTarget) -> ObjectMeta {
        ObjectMeta::new(&target.name, &target.request_namespace)
            .with_labels(&target.labels)
            .with_annotations(&target.annotations)
    }

    async fn list<T>(&self, namespace: &str, labels: &BTreeMap<String, String>) -> Result<Vec<T>>
    where
        T: DeserializeOwned + HasApiResource,
    {
        let params = ListParams::default().labels(&selector_string(labels));
        let list = self.api::<T>(namespace).list(&params).await?;
        list.items.into_iter().map(from_dynamic).collect()
    }

    async fn delete_all<T: HasApiResource>(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<()> {
        let params = ListParams::default().labels(&selector_string(labels));
        self.api::<T>(namespace)
            .delete_collection(&DeleteParams::default(), &params)
            .await?;
        Ok(())
    }

    async fn delete_one<T: HasApiResource>(&self, namespace: &str, name: &str) -> Result<()> {
        match self
            .api::<T>(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl RequestStore for VeleroRequestStore {
    async fn create_protect(&self, target: &RequestTarget, spec: &CaptureSpec) -> Result<Request> {
        self.create_location(target).await?;

        let mut backup_spec = BackupSpec::from_operation(&spec.spec, &target.name);
        if backup_spec.included_namespaces.is_empty() {
            backup_spec.included_namespaces = vec![target.source_namespace.clone()];
        }
        let backup = Backup::new(self.metadata(target), backup_spec);
        let backup = self
            .create_or_get(&backup, &target.request_namespace, &target.name)
            .await?;
        Ok(Request::Protect(backup))
    }

    async fn create_recover(
        &self,
        target: &RequestTarget,
        backup_name: &str,
        spec: &RecoverSpec,
    ) -> Result<Request> {
        // Velero syncs the backup from the location before the restore can read it
        self.create_location(target).await?;

        let restore = Restore::new(
            self.metadata(target),
            RestoreSpec::from_operation(
                &spec.spec,
                backup_name,
                &spec.namespace_mapping,
                spec.existing_resource_policy.as_deref(),
            ),
        );
        let restore = self
            .create_or_get(&restore, &target.request_namespace, &target.name)
            .await?;
        Ok(Request::Recover(restore))
    }

    async fn list_protects(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Request>> {
        let backups: Vec<Backup> = self.list(namespace, labels).await?;
        Ok(backups.into_iter().map(Request::Protect).collect())
    }

    async fn list_recovers(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Request>> {
        let restores: Vec<Restore> = self.list(namespace, labels).await?;
        Ok(restores.into_iter().map(Request::Recover).collect())
    }

    async fn delete_protects(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.delete_all::<Backup>(namespace, labels).await?;
        self.delete_all::<BackupStorageLocation>(namespace, labels)
            .await
    }

    async fn delete_recovers(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.delete_all::<Restore>(namespace, labels).await?;
        self.delete_all::<BackupStorageLocation>(namespace, labels)
            .await
    }

    async fn deallocate(&self, request: &Request) -> Result<()> {
        let (namespace, name) = (request.namespace(), request.name());
        match request {
            Request::Protect(_) => self.delete_one::<Backup>(namespace, name).await?,
            Request::Recover(_) => self.delete_one::<Restore>(namespace, name).await?,
        }
        self.delete_one::<BackupStorageLocation>(namespace, name)
            .await?;
        info!(kind = request.kind(), name = %name, "deallocated request");
        Ok(())
    }

    fn protects_path(&self) -> &'static str {
        BACKUPS_PATH
    }

    fn recovers_path(&self) -> &'static str {
        RESTORES_PATH
    }
}

/// Convert a typed Velero resource to a dynamic object
fn to_dynamic<T: Serialize + HasApiResource>(resource: &T) -> Result<DynamicObject> {
    let value = serde_json::to_value(resource)
        .map_err(|e| Error::serialization_for_kind(T::KIND, e.to_string()))?;
    serde_json::from_value(value).map_err(|e| Error::serialization_for_kind(T::KIND, e.to_string()))
}

/// Convert a dynamic object read from the API to a typed Velero resource
fn from_dynamic<T: DeserializeOwned + HasApiResource>(obj: DynamicObject) -> Result<T> {
    let value = serde_json::to_value(&obj)
        .map_err(|e| Error::serialization_for_kind(T::KIND, e.to_string()))?;
    serde_json::from_value(value).map_err(|e| Error::serialization_for_kind(T::KIND, e.to_string()))
}
