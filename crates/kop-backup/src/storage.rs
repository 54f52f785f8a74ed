//! Object storage for workload snapshots and capture artifacts
//!
//! All backends sit behind `Arc<dyn ObjectStore>`. S3-compatible profiles are
//! built with `AmazonS3Builder` using path-style requests so MinIO and other
//! self-hosted endpoints work. Tests use `object_store::memory::InMemory`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use kop_common::config::{OperatorConfig, StorageProfile, DUMMY_STORAGE_PROFILE};
use kop_common::{Error, Result};

/// Byte blob storage at a path
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStorer: Send + Sync {
    /// Write `data` at `key`, replacing any existing object
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Read the object at `key`; `None` when it does not exist
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Delete every object under `prefix`, returning how many were removed
    async fn delete_prefix(&self, prefix: &str) -> Result<usize>;
}

/// `ObjectStorer` over any `object_store` backend
pub struct StoreObjectStorer {
    profile: String,
    store: Arc<dyn ObjectStore>,
}

impl StoreObjectStorer {
    /// Wrap an existing store
    pub fn new(profile: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            profile: profile.into(),
            store,
        }
    }

    /// Build an S3 client for a storage profile
    pub fn s3(profile: &StorageProfile) -> Result<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&profile.s3_bucket)
            .with_region(&profile.s3_region)
            .with_endpoint(&profile.s3_compatible_endpoint)
            .with_virtual_hosted_style_request(false);

        if profile.s3_compatible_endpoint.starts_with("http://") {
            builder = builder.with_allow_http(true);
        }
        if let Some(ak) = &profile.access_key_id {
            builder = builder.with_access_key_id(ak);
        }
        if let Some(sk) = &profile.secret_access_key {
            builder = builder.with_secret_access_key(sk);
        }

        let store = builder
            .build()
            .map_err(|e| Error::object_store(&profile.name, e.to_string()))?;
        Ok(Self::new(&profile.name, Arc::new(store)))
    }

    fn err(&self, e: object_store::Error) -> Error {
        Error::object_store(&self.profile, e.to_string())
    }
}

#[async_trait]
impl ObjectStorer for StoreObjectStorer {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.store
            .put(&ObjectPath::from(key), data.into())
            .await
            .map_err(|e| self.err(e))?;
        debug!(profile = %self.profile, key = %key, "uploaded object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let result = match self.store.get(&ObjectPath::from(key)).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(self.err(e)),
        };
        let bytes = result.bytes().await.map_err(|e| self.err(e))?;
        Ok(Some(bytes))
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let prefix = ObjectPath::from(prefix);
        let mut locations = Vec::new();
        let mut stream = self.store.list(Some(&prefix));
        while let Some(meta) = stream.next().await {
            locations.push(meta.map_err(|e| self.err(e))?.location);
        }

        for location in &locations {
            match self.store.delete(location).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(self.err(e)),
            }
        }
        if !locations.is_empty() {
            debug!(profile = %self.profile, prefix = %prefix, count = locations.len(), "deleted objects");
        }
        Ok(locations.len())
    }
}

/// Builds the store for a storage profile
pub trait StorerProvider: Send + Sync {
    /// Store for `profile`
    fn storer(&self, profile: &StorageProfile) -> Result<Arc<dyn ObjectStorer>>;
}

/// Provider connecting to each profile's S3 endpoint
#[derive(Default)]
pub struct S3StorerProvider;

impl StorerProvider for S3StorerProvider {
    fn storer(&self, profile: &StorageProfile) -> Result<Arc<dyn ObjectStorer>> {
        Ok(Arc::new(StoreObjectStorer::s3(profile)?))
    }
}

/// Provider keeping one in-memory store per profile name
#[derive(Default)]
pub struct InMemoryStorerProvider {
    stores: Mutex<HashMap<String, Arc<dyn ObjectStorer>>>,
}

impl StorerProvider for InMemoryStorerProvider {
    fn storer(&self, profile: &StorageProfile) -> Result<Arc<dyn ObjectStorer>> {
        let mut stores = self
            .stores
            .lock()
            .map_err(|_| Error::internal_with_context("storage", "in-memory store lock poisoned"))?;
        let storer = stores.entry(profile.name.clone()).or_insert_with(|| {
            Arc::new(StoreObjectStorer::new(&profile.name, Arc::new(InMemory::new())))
        });
        Ok(Arc::clone(storer))
    }
}

/// A storage profile paired with its store
#[derive(Clone)]
pub struct ProfileStore {
    /// Profile configuration
    pub profile: StorageProfile,
    /// Store for the profile
    pub storer: Arc<dyn ObjectStorer>,
}

/// Stores for the profiles a workload names, in the workload's order
#[derive(Clone, Default)]
pub struct ObjectStorers {
    entries: Vec<ProfileStore>,
}

impl ObjectStorers {
    /// Resolve every profile name against the operator config.
    ///
    /// The dummy profile is skipped. An unknown profile or a store that
    /// cannot be built fails the whole resolution.
    pub fn resolve(
        provider: &dyn StorerProvider,
        config: &OperatorConfig,
        names: &[String],
    ) -> Result<Self> {
        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            if name == DUMMY_STORAGE_PROFILE {
                debug!(profile = %name, "skipping dummy storage profile");
                continue;
            }
            let profile = config
                .profile(name)
                .ok_or_else(|| Error::not_found("S3Profile", name))?;
            entries.push(ProfileStore {
                profile: profile.clone(),
                storer: provider.storer(profile)?,
            });
        }
        Ok(Self { entries })
    }

    /// Build directly from resolved entries
    pub fn from_entries(entries: Vec<ProfileStore>) -> Self {
        Self { entries }
    }

    /// Profiles in order
    pub fn iter(&self) -> impl Iterator<Item = &ProfileStore> {
        self.entries.iter()
    }

    /// Whether no usable profile was resolved
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of usable profiles
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// First usable profile
    pub fn first(&self) -> Option<&ProfileStore> {
        self.entries.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(name: &str) -> StorageProfile {
        StorageProfile {
            name: name.to_string(),
            s3_compatible_endpoint: "http://minio:9000".to_string(),
            s3_bucket: "kop".to_string(),
            s3_region: "us-east-1".to_string(),
            velero_namespace_secret_key_ref: None,
            access_key_id: Some("minio".to_string()),
            secret_access_key: Some("minio123".to_string()),
        }
    }

    fn memory(name: &str) -> StoreObjectStorer {
        StoreObjectStorer::new(name, Arc::new(InMemory::new()))
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let storer = memory("minio");
        storer
            .put("apps/busybox/ProtectionGroup/a", Bytes::from_static(b"{}"))
            .await
            .unwrap();
        let got = storer.get("apps/busybox/ProtectionGroup/a").await.unwrap();
        assert_eq!(got.unwrap(), Bytes::from_static(b"{}"));
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let storer = memory("minio");
        assert!(storer.get("nothing/here").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_prefix_only_touches_prefix() {
        let storer = memory("minio");
        for key in [
            "apps/busybox/kube-objects/1/backups/a/x.json",
            "apps/busybox/kube-objects/1/backups/b/y.json",
            "apps/busybox/kube-objects/0/backups/a/x.json",
            "apps/busybox/ProtectionGroup/a",
        ] {
            storer.put(key, Bytes::from_static(b"x")).await.unwrap();
        }

        let removed = storer
            .delete_prefix("apps/busybox/kube-objects/1/backups/")
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert!(storer
            .get("apps/busybox/kube-objects/0/backups/a/x.json")
            .await
            .unwrap()
            .is_some());
        assert!(storer
            .get("apps/busybox/ProtectionGroup/a")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_delete_prefix_empty_is_zero() {
        let storer = memory("minio");
        assert_eq!(storer.delete_prefix("apps/").await.unwrap(), 0);
    }

    #[test]
    fn test_s3_builder_accepts_profile() {
        assert!(StoreObjectStorer::s3(&profile("minio")).is_ok());
    }

    #[test]
    fn test_resolve_skips_dummy_and_keeps_order() {
        let config = OperatorConfig {
            s3_store_profiles: vec![profile("east"), profile("west")],
            ..Default::default()
        };
        let names = vec![
            "west".to_string(),
            DUMMY_STORAGE_PROFILE.to_string(),
            "east".to_string(),
        ];
        let storers =
            ObjectStorers::resolve(&InMemoryStorerProvider::default(), &config, &names).unwrap();
        let order: Vec<_> = storers.iter().map(|p| p.profile.name.as_str()).collect();
        assert_eq!(order, vec!["west", "east"]);
        assert_eq!(storers.len(), 2);
    }

    #[test]
    fn test_resolve_unknown_profile_fails() {
        let config = OperatorConfig::default();
        let result = ObjectStorers::resolve(
            &InMemoryStorerProvider::default(),
            &config,
            &["missing".to_string()],
        );
        assert!(matches!(result, Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_in_memory_provider_shares_store_per_profile() {
        let provider = InMemoryStorerProvider::default();
        let a = provider.storer(&profile("east")).unwrap();
        a.put("k", Bytes::from_static(b"v")).await.unwrap();
        let b = provider.storer(&profile("east")).unwrap();
        assert!(b.get("k").await.unwrap().is_some());
        let c = provider.storer(&profile("west")).unwrap();
        assert!(c.get("k").await.unwrap().is_none());
    }
}
