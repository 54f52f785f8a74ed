//! Per-workload recipe resolution
//!
//! Fetches the referenced Recipe, expands its parameters, and resolves the
//! PVC selector and both workflows. Missing recipes, groups and hooks are
//! logged and replaced by the default workflows; expansion errors and API
//! failures propagate.

use std::sync::Arc;

use async_trait::async_trait;
use kop_common::crd::{
    LabelSelector, ProtectionGroup, PvcSelector, Recipe, RecipeSpec, ResolvedRecipe,
};
use kube::api::Api;
use kube::{Client, ResourceExt};
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use crate::error::RecipeError;
use crate::expand::expand_parameters;
use crate::workflow::{
    capture_workflow, default_capture_workflow, default_recover_workflow, recover_workflow,
};

/// Reads Recipe resources
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RecipeReader: Send + Sync {
    /// Get a recipe's spec by namespace and name
    async fn get_recipe(&self, namespace: &str, name: &str) -> Result<RecipeSpec, RecipeError>;
}

/// Recipe reader backed by the Kubernetes API
pub struct KubeRecipeReader {
    client: Client,
}

impl KubeRecipeReader {
    /// Create a reader using `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RecipeReader for KubeRecipeReader {
    async fn get_recipe(&self, namespace: &str, name: &str) -> Result<RecipeSpec, RecipeError> {
        let api: Api<Recipe> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?.spec)
    }
}

/// Resolves each workload's recipe into a [`ResolvedRecipe`]
pub struct RecipeResolver {
    reader: Arc<dyn RecipeReader>,
}

impl RecipeResolver {
    /// Create a resolver reading recipes through `reader`
    pub fn new(reader: Arc<dyn RecipeReader>) -> Self {
        Self { reader }
    }

    /// Resolve the recipe a ProtectionGroup references.
    ///
    /// Without kube object protection only the PVC selector is filled in.
    /// Without a recipe reference both workflows are the defaults.
    pub async fn resolve(&self, pg: &ProtectionGroup) -> Result<ResolvedRecipe, RecipeError> {
        let namespace = pg.namespace().unwrap_or_default();
        let name = pg.name_any();

        let Some(kop) = &pg.spec.kube_object_protection else {
            return Ok(ResolvedRecipe {
                pvc_selector: default_pvc_selector(pg, &namespace),
                ..Default::default()
            });
        };

        let Some(recipe_ref) = &kop.recipe_ref else {
            return Ok(defaults(pg, &namespace));
        };

        let recipe_namespace = recipe_ref.namespace.as_deref().unwrap_or(&namespace);
        let recipe = match self.reader.get_recipe(recipe_namespace, &recipe_ref.name).await {
            Ok(recipe) => recipe,
            Err(e) if e.is_resolution_error() => {
                warn!(
                    protection_group = %name,
                    recipe = %recipe_ref.name,
                    error = %e,
                    "recipe unavailable, using default workflows"
                );
                return Ok(defaults(pg, &namespace));
            }
            Err(e) => return Err(e),
        };

        let recipe = expand_parameters(&recipe, &kop.recipe_parameters)?;
        debug!(protection_group = %name, recipe = %recipe_ref.name, "resolving recipe");

        let capture = capture_workflow(&recipe, &namespace).or_else(|e| {
            fallback(e, &name, "backup").map(|()| default_capture_workflow(&namespace))
        })?;
        let recover = recover_workflow(&recipe, &namespace)
            .or_else(|e| fallback(e, &name, "restore").map(|()| default_recover_workflow()))?;

        let pvc_selector = recipe_pvc_selector(&recipe, pg, &namespace).or_else(|e| {
            fallback(e, &name, "volumes").map(|()| default_pvc_selector(pg, &namespace))
        })?;

        Ok(ResolvedRecipe {
            pvc_selector,
            capture_workflow: capture,
            recover_workflow: recover,
        })
    }
}

fn defaults(pg: &ProtectionGroup, namespace: &str) -> ResolvedRecipe {
    ResolvedRecipe {
        pvc_selector: default_pvc_selector(pg, namespace),
        capture_workflow: default_capture_workflow(namespace),
        recover_workflow: default_recover_workflow(),
    }
}

fn fallback(err: RecipeError, name: &str, workflow: &str) -> Result<(), RecipeError> {
    if !err.is_resolution_error() {
        return Err(err);
    }
    warn!(
        protection_group = %name,
        workflow = %workflow,
        error = %err,
        "workflow resolution failed, using default workflow"
    );
    Ok(())
}

/// The workload's own PVC selector in its own namespace
pub fn default_pvc_selector(pg: &ProtectionGroup, namespace: &str) -> PvcSelector {
    PvcSelector {
        label_selector: pg.spec.pvc_selector.clone().unwrap_or_default(),
        namespace_names: vec![namespace.to_string()],
    }
}

/// PVC selector from the recipe's `volumes` group, when it has one
pub fn recipe_pvc_selector(
    recipe: &RecipeSpec,
    pg: &ProtectionGroup,
    namespace: &str,
) -> Result<PvcSelector, RecipeError> {
    let Some(volumes) = &recipe.volumes else {
        return Ok(default_pvc_selector(pg, namespace));
    };

    let label_selector = LabelSelector::parse(&volumes.label_selector)
        .map_err(|source| RecipeError::InvalidSelector {
            owner: "volumes".to_string(),
            source,
        })?
        .unwrap_or_default();

    let namespace_names = if volumes.included_namespaces.is_empty() {
        vec![namespace.to_string()]
    } else {
        volumes.included_namespaces.clone()
    };

    Ok(PvcSelector {
        label_selector,
        namespace_names,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kop_common::crd::{
        KubeObjectProtectionSpec, ProtectionGroupSpec, RecipeGroup, RecipeRef, RecipeWorkflow,
    };
    use std::collections::BTreeMap;

    fn protection_group(kop: Option<KubeObjectProtectionSpec>) -> ProtectionGroup {
        let mut pg = ProtectionGroup::new(
            "busybox",
            ProtectionGroupSpec {
                s3_profiles: vec!["minio".to_string()],
                pvc_selector: LabelSelector::parse("app=busybox").unwrap(),
                kube_object_protection: kop,
                ..Default::default()
            },
        );
        pg.metadata.namespace = Some("apps".to_string());
        pg
    }

    fn with_recipe(name: &str) -> Option<KubeObjectProtectionSpec> {
        Some(KubeObjectProtectionSpec {
            recipe_ref: Some(RecipeRef {
                namespace: None,
                name: name.to_string(),
            }),
            recipe_parameters: BTreeMap::from([(
                "ns".to_string(),
                vec!["apps".to_string(), "apps-db".to_string()],
            )]),
            ..Default::default()
        })
    }

    fn recipe_spec() -> RecipeSpec {
        RecipeSpec {
            volumes: Some(RecipeGroup {
                name: "volumes".to_string(),
                label_selector: "tier=data".to_string(),
                ..Default::default()
            }),
            groups: vec![RecipeGroup {
                name: "config".to_string(),
                included_namespaces: vec!["${ns}".to_string()],
                ..Default::default()
            }],
            workflows: vec![RecipeWorkflow {
                name: "backup".to_string(),
                sequence: vec![BTreeMap::from([(
                    "group".to_string(),
                    "config".to_string(),
                )])],
            }],
            ..Default::default()
        }
    }

    fn not_found() -> RecipeError {
        RecipeError::Kube(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "not found".to_string(),
            reason: "NotFound".to_string(),
            code: 404,
        }))
    }

    #[tokio::test]
    async fn no_kube_object_protection_only_fills_pvc_selector() {
        let resolver = RecipeResolver::new(Arc::new(MockRecipeReader::new()));
        let resolved = resolver.resolve(&protection_group(None)).await.unwrap();
        assert!(resolved.capture_workflow.is_empty());
        assert!(resolved.recover_workflow.is_empty());
        assert_eq!(resolved.pvc_selector.namespace_names, vec!["apps"]);
        assert_eq!(
            resolved.pvc_selector.label_selector.match_labels["app"],
            "busybox"
        );
    }

    #[tokio::test]
    async fn no_recipe_ref_uses_default_workflows() {
        let resolver = RecipeResolver::new(Arc::new(MockRecipeReader::new()));
        let pg = protection_group(Some(KubeObjectProtectionSpec::default()));
        let resolved = resolver.resolve(&pg).await.unwrap();
        assert_eq!(resolved.capture_workflow, default_capture_workflow("apps"));
        assert_eq!(resolved.recover_workflow, default_recover_workflow());
    }

    #[tokio::test]
    async fn recipe_is_expanded_and_resolved() {
        let mut reader = MockRecipeReader::new();
        reader.expect_get_recipe().times(1).returning(|ns, name| {
            assert_eq!(ns, "apps");
            assert_eq!(name, "busybox-recipe");
            Ok(recipe_spec())
        });
        let resolver = RecipeResolver::new(Arc::new(reader));

        let resolved = resolver
            .resolve(&protection_group(with_recipe("busybox-recipe")))
            .await
            .unwrap();

        assert_eq!(resolved.capture_workflow.len(), 1);
        assert_eq!(
            resolved.capture_workflow[0].spec.included_namespaces,
            vec!["apps", "apps-db"]
        );
        // No "restore" workflow in the recipe
        assert_eq!(resolved.recover_workflow, default_recover_workflow());
        assert_eq!(
            resolved.pvc_selector.label_selector.match_labels["tier"],
            "data"
        );
        assert_eq!(resolved.pvc_selector.namespace_names, vec!["apps"]);
    }

    #[tokio::test]
    async fn missing_recipe_falls_back_to_defaults() {
        let mut reader = MockRecipeReader::new();
        reader.expect_get_recipe().returning(|_, _| Err(not_found()));
        let resolver = RecipeResolver::new(Arc::new(reader));

        let resolved = resolver
            .resolve(&protection_group(with_recipe("gone")))
            .await
            .unwrap();
        assert_eq!(resolved.capture_workflow, default_capture_workflow("apps"));
    }

    #[tokio::test]
    async fn unresolvable_group_falls_back_per_workflow() {
        let mut spec = recipe_spec();
        spec.workflows.push(RecipeWorkflow {
            name: "restore".to_string(),
            sequence: vec![BTreeMap::from([(
                "group".to_string(),
                "missing".to_string(),
            )])],
        });
        let mut reader = MockRecipeReader::new();
        reader
            .expect_get_recipe()
            .returning(move |_, _| Ok(spec.clone()));
        let resolver = RecipeResolver::new(Arc::new(reader));

        let resolved = resolver
            .resolve(&protection_group(with_recipe("r")))
            .await
            .unwrap();
        assert_eq!(resolved.capture_workflow[0].name, "config");
        assert_eq!(resolved.recover_workflow, default_recover_workflow());
    }

    #[tokio::test]
    async fn invalid_volumes_selector_falls_back_to_workload_selector() {
        let mut spec = recipe_spec();
        if let Some(volumes) = spec.volumes.as_mut() {
            volumes.label_selector = "app in (db".to_string();
        }
        let mut reader = MockRecipeReader::new();
        reader
            .expect_get_recipe()
            .returning(move |_, _| Ok(spec.clone()));
        let resolver = RecipeResolver::new(Arc::new(reader));

        let resolved = resolver
            .resolve(&protection_group(with_recipe("r")))
            .await
            .unwrap();
        assert_eq!(
            resolved.pvc_selector.label_selector.match_labels["app"],
            "busybox"
        );
        assert_eq!(resolved.pvc_selector.namespace_names, vec!["apps"]);
        // The workflows still come from the recipe
        assert_eq!(resolved.capture_workflow[0].name, "config");
    }

    #[tokio::test]
    async fn api_errors_propagate() {
        let mut reader = MockRecipeReader::new();
        reader.expect_get_recipe().returning(|_, _| {
            Err(RecipeError::Kube(kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".to_string(),
                message: "etcd timeout".to_string(),
                reason: "InternalError".to_string(),
                code: 500,
            })))
        });
        let resolver = RecipeResolver::new(Arc::new(reader));
        assert!(resolver
            .resolve(&protection_group(with_recipe("r")))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn recipe_namespace_overrides_workload_namespace() {
        let mut reader = MockRecipeReader::new();
        reader.expect_get_recipe().times(1).returning(|ns, _| {
            assert_eq!(ns, "recipes");
            Ok(RecipeSpec::default())
        });
        let resolver = RecipeResolver::new(Arc::new(reader));

        let mut kop = with_recipe("r");
        if let Some(k) = kop.as_mut() {
            k.recipe_ref = Some(RecipeRef {
                namespace: Some("recipes".to_string()),
                name: "r".to_string(),
            });
        }
        let resolved = resolver.resolve(&protection_group(kop)).await.unwrap();
        assert_eq!(resolved.capture_workflow, default_capture_workflow("apps"));
    }
}
