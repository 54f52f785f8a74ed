//! Owner labels and annotations on external jobs
//!
//! Jobs are found again after a restart only through these labels, so the
//! keys must never change.

use std::collections::BTreeMap;

/// Label carrying the owning workload's namespace
pub const LABEL_OWNER_NAMESPACE_NAME: &str = "kop.dev/owner-namespace-name";

/// Label carrying the owning workload's name
pub const LABEL_OWNER_NAME: &str = "kop.dev/owner-name";

/// Annotation recording the workload generation a capture cycle started at
pub const GENERATION_ANNOTATION: &str = "kop.dev/generation";

/// Labels identifying every job owned by one workload
pub fn owner_labels(owner_namespace: &str, owner_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            LABEL_OWNER_NAMESPACE_NAME.to_string(),
            owner_namespace.to_string(),
        ),
        (LABEL_OWNER_NAME.to_string(), owner_name.to_string()),
    ])
}

/// Recover the owning workload from a job's labels.
///
/// Returns `None` unless both owner labels are present.
pub fn owner_namespace_and_name(labels: &BTreeMap<String, String>) -> Option<(String, String)> {
    let namespace = labels.get(LABEL_OWNER_NAMESPACE_NAME)?;
    let name = labels.get(LABEL_OWNER_NAME)?;
    Some((namespace.clone(), name.clone()))
}

/// Render labels as an equality selector string for `ListParams::labels`
pub fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Annotation map recording the capture cycle's start generation
pub fn generation_annotations(generation: i64) -> BTreeMap<String, String> {
    BTreeMap::from([(GENERATION_ANNOTATION.to_string(), generation.to_string())])
}

/// Read the start generation back from a job's annotations
pub fn generation_from_annotations(annotations: &BTreeMap<String, String>) -> Option<i64> {
    annotations.get(GENERATION_ANNOTATION)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_labels_roundtrip() {
        let labels = owner_labels("apps", "busybox");
        assert_eq!(
            owner_namespace_and_name(&labels),
            Some(("apps".to_string(), "busybox".to_string()))
        );
    }

    #[test]
    fn test_partial_owner_labels_rejected() {
        let mut labels = owner_labels("apps", "busybox");
        labels.remove(LABEL_OWNER_NAME);
        assert_eq!(owner_namespace_and_name(&labels), None);
    }

    #[test]
    fn test_selector_string_is_sorted() {
        let labels = owner_labels("apps", "busybox");
        assert_eq!(
            selector_string(&labels),
            "kop.dev/owner-name=busybox,kop.dev/owner-namespace-name=apps"
        );
    }

    #[test]
    fn test_generation_annotation() {
        let annotations = generation_annotations(7);
        assert_eq!(generation_from_annotations(&annotations), Some(7));

        let mut garbled = BTreeMap::new();
        garbled.insert(GENERATION_ANNOTATION.to_string(), "seven".to_string());
        assert_eq!(generation_from_annotations(&garbled), None);
        assert_eq!(generation_from_annotations(&BTreeMap::new()), None);
    }
}
