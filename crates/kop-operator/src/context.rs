//! Shared state handed to every ProtectionGroup reconcile

use std::sync::Arc;

use kube::Client;

use kop_backup::{
    CaptureOrchestrator, RecoverOrchestrator, RequestStore, S3StorerProvider, StorerProvider,
    VeleroRequestStore,
};
use kop_common::config::OperatorConfig;
use kop_recipe::{KubeRecipeReader, RecipeReader, RecipeResolver};

use crate::controller::{KubeClient, KubeClientImpl};

/// Controller context
pub struct Context {
    /// ProtectionGroup status and finalizer writes
    pub kube: Arc<dyn KubeClient>,
    /// Recipe expansion
    pub recipes: RecipeResolver,
    /// External job system, shared by both orchestrators
    pub requests: Arc<dyn RequestStore>,
    /// Capture cycle driver
    pub captures: CaptureOrchestrator,
    /// Ordered recovery driver
    pub recovers: RecoverOrchestrator,
    /// Builds a store per storage profile
    pub storers: Arc<dyn StorerProvider>,
    /// Operator configuration
    pub config: OperatorConfig,
}

impl Context {
    /// Create a context talking to the cluster and each profile's S3 endpoint
    pub fn new(client: Client, config: OperatorConfig) -> Self {
        Self::assemble(
            Arc::new(KubeClientImpl::new(client.clone())),
            Arc::new(KubeRecipeReader::new(client.clone())),
            Arc::new(VeleroRequestStore::new(client)),
            Arc::new(S3StorerProvider),
            config,
        )
    }

    /// Create a context for testing with custom collaborators
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        recipes: Arc<dyn RecipeReader>,
        requests: Arc<dyn RequestStore>,
        storers: Arc<dyn StorerProvider>,
        config: OperatorConfig,
    ) -> Self {
        Self::assemble(kube, recipes, requests, storers, config)
    }

    fn assemble(
        kube: Arc<dyn KubeClient>,
        recipes: Arc<dyn RecipeReader>,
        requests: Arc<dyn RequestStore>,
        storers: Arc<dyn StorerProvider>,
        config: OperatorConfig,
    ) -> Self {
        let namespace = config.kube_object_protection.velero_namespace_name.clone();
        Self {
            kube,
            recipes: RecipeResolver::new(recipes),
            captures: CaptureOrchestrator::new(Arc::clone(&requests), namespace.clone()),
            recovers: RecoverOrchestrator::new(Arc::clone(&requests), namespace),
            requests,
            storers,
            config,
        }
    }

    /// Namespace external jobs are created in
    pub fn request_namespace(&self) -> &str {
        &self.config.kube_object_protection.velero_namespace_name
    }
}
