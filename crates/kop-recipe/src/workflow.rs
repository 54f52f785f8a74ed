//! Workflow resolution
//!
//! Turns a recipe's `{typeTag: refName}` sequence into the ordered capture
//! and recover specs the orchestrators run.

use std::collections::BTreeMap;

use kop_common::crd::{
    CaptureSpec, HookSpec, LabelSelector, OperationSpec, RecipeGroup, RecipeHook, RecipeHookOp,
    RecipeSpec, RecoverSpec, CAPTURE_WORKFLOW_NAME, GROUP_TAG, HOOK_TAG, RECOVER_WORKFLOW_NAME,
    USE_BACKUP_NOT_RESTORE,
};

use crate::error::RecipeError;

/// Resource kind hook specs target
const HOOK_RESOURCE: &str = "pods";

/// Capture workflow used when no recipe applies: the whole workload namespace
pub fn default_capture_workflow(workload_namespace: &str) -> Vec<CaptureSpec> {
    vec![CaptureSpec {
        name: String::new(),
        spec: OperationSpec {
            included_namespaces: vec![workload_namespace.to_string()],
            ..Default::default()
        },
    }]
}

/// Recover workflow used when no recipe applies: one unfiltered group
pub fn default_recover_workflow() -> Vec<RecoverSpec> {
    vec![RecoverSpec::default()]
}

/// Resolve the recipe's capture workflow.
///
/// A recipe without a capture workflow gets the default one.
pub fn capture_workflow(
    recipe: &RecipeSpec,
    workload_namespace: &str,
) -> Result<Vec<CaptureSpec>, RecipeError> {
    let Some(workflow) = recipe.workflow(CAPTURE_WORKFLOW_NAME) else {
        return Ok(default_capture_workflow(workload_namespace));
    };

    workflow
        .sequence
        .iter()
        .map(|step| match resolve_step(recipe, step, workload_namespace)? {
            Step::Group(group) => Ok(CaptureSpec {
                name: group.name.clone(),
                spec: group_operation(group)?,
            }),
            Step::Hook(name, spec) => Ok(CaptureSpec { name, spec }),
        })
        .collect()
}

/// Resolve the recipe's recover workflow.
///
/// Hook steps carry the reserved backup name so the recover orchestrator
/// runs them as captures against the target.
pub fn recover_workflow(
    recipe: &RecipeSpec,
    workload_namespace: &str,
) -> Result<Vec<RecoverSpec>, RecipeError> {
    let Some(workflow) = recipe.workflow(RECOVER_WORKFLOW_NAME) else {
        return Ok(default_recover_workflow());
    };

    workflow
        .sequence
        .iter()
        .map(|step| match resolve_step(recipe, step, workload_namespace)? {
            Step::Group(group) => Ok(RecoverSpec {
                backup_name: group
                    .backup_ref
                    .clone()
                    .unwrap_or_else(|| group.name.clone()),
                spec: group_operation(group)?,
                namespace_mapping: BTreeMap::new(),
                existing_resource_policy: None,
            }),
            Step::Hook(_, spec) => Ok(RecoverSpec {
                backup_name: USE_BACKUP_NOT_RESTORE.to_string(),
                spec,
                namespace_mapping: BTreeMap::new(),
                existing_resource_policy: None,
            }),
        })
        .collect()
}

enum Step<'a> {
    Group(&'a RecipeGroup),
    Hook(String, OperationSpec),
}

fn resolve_step<'a>(
    recipe: &'a RecipeSpec,
    step: &BTreeMap<String, String>,
    workload_namespace: &str,
) -> Result<Step<'a>, RecipeError> {
    let mut entries = step.iter();
    let (tag, name) = match (entries.next(), entries.next()) {
        (Some(entry), None) => entry,
        _ => {
            return Err(RecipeError::not_found(
                "workflow step",
                format!("{:?}", step),
            ))
        }
    };

    match tag.as_str() {
        GROUP_TAG => recipe
            .group(name)
            .map(Step::Group)
            .ok_or_else(|| RecipeError::not_found("group", name)),
        HOOK_TAG => {
            let (hook, op) = find_hook_op(recipe, name)?;
            let spec_name = format!("{}-{}", hook.name, op.name);
            let spec = hook_operation(hook, op, &spec_name, workload_namespace)?;
            Ok(Step::Hook(spec_name, spec))
        }
        other => Err(RecipeError::not_found("workflow step type", other)),
    }
}

/// Find a hook operation from `<hook>/<op>` or a bare `<op>`.
///
/// A bare name resolves only when exactly one hook defines it.
pub fn find_hook_op<'a>(
    recipe: &'a RecipeSpec,
    reference: &str,
) -> Result<(&'a RecipeHook, &'a RecipeHookOp), RecipeError> {
    let not_found = || RecipeError::not_found("hook operation", reference);

    if let Some((owner, op_name)) = reference.split_once('/') {
        let hook = recipe
            .hooks
            .iter()
            .find(|h| h.name == owner)
            .ok_or_else(not_found)?;
        let op = hook.op(op_name).ok_or_else(not_found)?;
        return Ok((hook, op));
    }

    let mut matches = recipe
        .hooks
        .iter()
        .filter_map(|h| h.op(reference).map(|op| (h, op)));
    match (matches.next(), matches.next()) {
        (Some(found), None) => Ok(found),
        _ => Err(not_found()),
    }
}

fn group_operation(group: &RecipeGroup) -> Result<OperationSpec, RecipeError> {
    Ok(OperationSpec {
        included_namespaces: group.included_namespaces.clone(),
        included_resources: group.included_resource_types.clone(),
        excluded_resources: group.excluded_resource_types.clone(),
        label_selector: parse_selector(&group.label_selector, &group.name)?,
        or_label_selectors: Vec::new(),
        include_cluster_resources: group.include_cluster_resources,
        hooks: Vec::new(),
    })
}

fn hook_operation(
    hook: &RecipeHook,
    op: &RecipeHookOp,
    spec_name: &str,
    workload_namespace: &str,
) -> Result<OperationSpec, RecipeError> {
    let selector = parse_selector(&hook.label_selector, &hook.name)?;
    let namespace = hook
        .namespace
        .clone()
        .unwrap_or_else(|| workload_namespace.to_string());

    Ok(OperationSpec {
        included_namespaces: vec![namespace],
        included_resources: vec![HOOK_RESOURCE.to_string()],
        excluded_resources: Vec::new(),
        label_selector: selector.clone(),
        or_label_selectors: Vec::new(),
        include_cluster_resources: Some(false),
        hooks: vec![HookSpec {
            name: spec_name.to_string(),
            type_: hook.type_.clone(),
            command: op.command.clone(),
            timeout_seconds: op.timeout_seconds,
            container: op.container.clone(),
            label_selector: selector,
        }],
    })
}

fn parse_selector(s: &str, owner: &str) -> Result<Option<LabelSelector>, RecipeError> {
    LabelSelector::parse(s).map_err(|source| RecipeError::InvalidSelector {
        owner: owner.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kop_common::crd::RecipeWorkflow;

    fn step(tag: &str, name: &str) -> BTreeMap<String, String> {
        BTreeMap::from([(tag.to_string(), name.to_string())])
    }

    fn workflow(name: &str, steps: Vec<BTreeMap<String, String>>) -> RecipeWorkflow {
        RecipeWorkflow {
            name: name.to_string(),
            sequence: steps,
        }
    }

    fn op(name: &str) -> RecipeHookOp {
        RecipeHookOp {
            name: name.to_string(),
            command: vec!["/bin/sync".to_string()],
            container: Some("main".to_string()),
            timeout_seconds: Some(60),
        }
    }

    fn recipe() -> RecipeSpec {
        RecipeSpec {
            groups: vec![
                RecipeGroup {
                    name: "config".to_string(),
                    included_namespaces: vec!["apps".to_string()],
                    included_resource_types: vec!["configmaps".to_string()],
                    label_selector: "app=db".to_string(),
                    ..Default::default()
                },
                RecipeGroup {
                    name: "deployments".to_string(),
                    backup_ref: Some("everything".to_string()),
                    excluded_resource_types: vec!["pods".to_string()],
                    include_cluster_resources: Some(true),
                    ..Default::default()
                },
            ],
            hooks: vec![
                RecipeHook {
                    name: "db".to_string(),
                    type_: "exec".to_string(),
                    label_selector: "role=primary".to_string(),
                    ops: vec![op("pre-backup"), op("flush")],
                    ..Default::default()
                },
                RecipeHook {
                    name: "cache".to_string(),
                    namespace: Some("cache-ns".to_string()),
                    type_: "exec".to_string(),
                    ops: vec![op("flush")],
                    ..Default::default()
                },
            ],
            workflows: Vec::new(),
            ..Default::default()
        }
    }

    mod defaults {
        use super::*;

        #[test]
        fn missing_workflows_use_defaults() {
            let r = recipe();
            let capture = capture_workflow(&r, "apps").unwrap();
            assert_eq!(capture, default_capture_workflow("apps"));
            assert_eq!(capture[0].name, "");
            assert_eq!(capture[0].spec.included_namespaces, vec!["apps"]);

            let recover = recover_workflow(&r, "apps").unwrap();
            assert_eq!(recover, vec![RecoverSpec::default()]);
        }
    }

    mod groups {
        use super::*;

        #[test]
        fn group_steps_carry_filters_in_order() {
            let mut r = recipe();
            r.workflows.push(workflow(
                CAPTURE_WORKFLOW_NAME,
                vec![step("group", "deployments"), step("group", "config")],
            ));
            let capture = capture_workflow(&r, "apps").unwrap();
            assert_eq!(capture.len(), 2);
            assert_eq!(capture[0].name, "deployments");
            assert_eq!(capture[0].spec.excluded_resources, vec!["pods"]);
            assert_eq!(capture[0].spec.include_cluster_resources, Some(true));
            assert!(capture[0].spec.label_selector.is_none());

            assert_eq!(capture[1].name, "config");
            let sel = capture[1].spec.label_selector.as_ref().unwrap();
            assert_eq!(sel.match_labels.get("app").unwrap(), "db");
        }

        #[test]
        fn recover_group_backup_name_defaults_to_group() {
            let mut r = recipe();
            r.workflows.push(workflow(
                RECOVER_WORKFLOW_NAME,
                vec![step("group", "config"), step("group", "deployments")],
            ));
            let recover = recover_workflow(&r, "apps").unwrap();
            assert_eq!(recover[0].backup_name, "config");
            assert_eq!(recover[1].backup_name, "everything");
            assert!(!recover[0].runs_as_capture());
        }

        #[test]
        fn unknown_group_is_not_found() {
            let mut r = recipe();
            r.workflows
                .push(workflow(CAPTURE_WORKFLOW_NAME, vec![step("group", "nope")]));
            let err = capture_workflow(&r, "apps").unwrap_err();
            assert!(matches!(err, RecipeError::NotFound { .. }));
        }

        #[test]
        fn unknown_tag_is_not_found() {
            let mut r = recipe();
            r.workflows
                .push(workflow(CAPTURE_WORKFLOW_NAME, vec![step("volume", "config")]));
            assert!(matches!(
                capture_workflow(&r, "apps").unwrap_err(),
                RecipeError::NotFound { .. }
            ));
        }

        #[test]
        fn multi_entry_step_is_rejected() {
            let mut r = recipe();
            let mut bad = step("group", "config");
            bad.insert("hook".to_string(), "db/flush".to_string());
            r.workflows.push(workflow(CAPTURE_WORKFLOW_NAME, vec![bad]));
            assert!(capture_workflow(&r, "apps").is_err());
        }

        #[test]
        fn invalid_group_selector_is_reported() {
            let mut r = recipe();
            r.groups[0].label_selector = "app in (db".to_string();
            r.workflows
                .push(workflow(CAPTURE_WORKFLOW_NAME, vec![step("group", "config")]));
            let err = capture_workflow(&r, "apps").unwrap_err();
            assert!(matches!(err, RecipeError::InvalidSelector { ref owner, .. } if owner == "config"));
            assert!(err.is_resolution_error());
        }
    }

    mod hooks {
        use super::*;

        #[test]
        fn qualified_reference_resolves() {
            let r = recipe();
            let (hook, op) = find_hook_op(&r, "db/pre-backup").unwrap();
            assert_eq!(hook.name, "db");
            assert_eq!(op.name, "pre-backup");
        }

        #[test]
        fn bare_reference_must_be_unique() {
            let r = recipe();
            let (hook, _) = find_hook_op(&r, "pre-backup").unwrap();
            assert_eq!(hook.name, "db");
            // "flush" is defined by both hooks
            assert!(matches!(
                find_hook_op(&r, "flush").unwrap_err(),
                RecipeError::NotFound { .. }
            ));
            assert!(find_hook_op(&r, "cache/flush").is_ok());
            assert!(find_hook_op(&r, "db/missing").is_err());
            assert!(find_hook_op(&r, "nobody/flush").is_err());
        }

        #[test]
        fn capture_hook_step_synthesizes_pod_spec() {
            let mut r = recipe();
            r.workflows.push(workflow(
                CAPTURE_WORKFLOW_NAME,
                vec![step("hook", "db/pre-backup"), step("group", "config")],
            ));
            let capture = capture_workflow(&r, "apps").unwrap();
            let hook = &capture[0];
            assert_eq!(hook.name, "db-pre-backup");
            assert_eq!(hook.spec.included_resources, vec!["pods"]);
            assert_eq!(hook.spec.included_namespaces, vec!["apps"]);
            assert_eq!(hook.spec.include_cluster_resources, Some(false));
            assert_eq!(hook.spec.hooks.len(), 1);

            let h = &hook.spec.hooks[0];
            assert_eq!(h.type_, "exec");
            assert_eq!(h.command, vec!["/bin/sync"]);
            assert_eq!(h.timeout_seconds, Some(60));
            assert_eq!(h.container.as_deref(), Some("main"));
            assert_eq!(
                h.label_selector.as_ref().unwrap().match_labels.get("role").unwrap(),
                "primary"
            );
        }

        #[test]
        fn hook_namespace_overrides_workload_namespace() {
            let mut r = recipe();
            r.workflows
                .push(workflow(CAPTURE_WORKFLOW_NAME, vec![step("hook", "cache/flush")]));
            let capture = capture_workflow(&r, "apps").unwrap();
            assert_eq!(capture[0].spec.included_namespaces, vec!["cache-ns"]);
            assert!(capture[0].spec.hooks[0].label_selector.is_none());
        }

        #[test]
        fn recover_hook_step_uses_reserved_backup_name() {
            let mut r = recipe();
            r.workflows.push(workflow(
                RECOVER_WORKFLOW_NAME,
                vec![step("group", "config"), step("hook", "db/pre-backup")],
            ));
            let recover = recover_workflow(&r, "apps").unwrap();
            assert_eq!(recover[1].backup_name, USE_BACKUP_NOT_RESTORE);
            assert!(recover[1].runs_as_capture());
            assert_eq!(recover[1].spec.hooks[0].name, "db-pre-backup");
        }
    }
}
