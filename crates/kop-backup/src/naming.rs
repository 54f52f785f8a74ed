//! Deterministic names and paths
//!
//! Every job name and object key is a pure function of the workload
//! identity, the cycle slot, the group and the storage profile. Finding
//! jobs again after a restart depends on these never changing.

use std::collections::BTreeMap;

use kop_common::labels::owner_labels;

/// Separator between name components
const SEP: &str = "--";

/// Object key prefix of everything stored for a workload
pub fn workload_path(namespace: &str, name: &str) -> String {
    format!("{}/{}/", namespace, name)
}

/// Object key prefix of one capture slot
pub fn capture_path(namespace: &str, name: &str, slot: i64) -> String {
    format!("{}kube-objects/{}/", workload_path(namespace, name), slot)
}

/// Job name prefix shared by every job of one capture slot
pub fn capture_name_prefix(namespace: &str, name: &str, slot: i64) -> String {
    format!("{}{SEP}{}{SEP}{}", namespace, name, slot)
}

/// Name of the capture job for one group in one storage profile
pub fn capture_request_name(name_prefix: &str, group: &str, profile: &str) -> String {
    format!("{}{SEP}{}{SEP}{}", name_prefix, group, profile)
}

/// Name of the recover job for the group at `index` in the recover workflow
pub fn recover_request_name(namespace: &str, name: &str, index: usize) -> String {
    format!("{}{SEP}{}{SEP}{}", namespace, name, index)
}

/// Object key of the workload snapshot
pub fn snapshot_key(namespace: &str, name: &str) -> String {
    format!("{}ProtectionGroup/a", workload_path(namespace, name))
}

/// Identity of a protected workload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadRef {
    /// Workload namespace
    pub namespace: String,
    /// Workload name
    pub name: String,
    /// Current `metadata.generation`
    pub generation: i64,
}

impl WorkloadRef {
    /// Create a workload identity
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, generation: i64) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            generation,
        }
    }

    /// Labels carried by every job of the workload
    pub fn owner_labels(&self) -> BTreeMap<String, String> {
        owner_labels(&self.namespace, &self.name)
    }

    /// Object key prefix of one capture slot
    pub fn capture_path(&self, slot: i64) -> String {
        capture_path(&self.namespace, &self.name, slot)
    }

    /// Job name prefix of one capture slot
    pub fn capture_name_prefix(&self, slot: i64) -> String {
        capture_name_prefix(&self.namespace, &self.name, slot)
    }

    /// Name of the recover job at `index`
    pub fn recover_request_name(&self, index: usize) -> String {
        recover_request_name(&self.namespace, &self.name, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_names() {
        let prefix = capture_name_prefix("apps", "busybox", 1);
        assert_eq!(prefix, "apps--busybox--1");
        assert_eq!(
            capture_request_name(&prefix, "config", "minio-east"),
            "apps--busybox--1--config--minio-east"
        );
        // The default workflow's group has no name
        assert_eq!(
            capture_request_name(&prefix, "", "minio-east"),
            "apps--busybox--1----minio-east"
        );
    }

    #[test]
    fn test_paths() {
        assert_eq!(workload_path("apps", "busybox"), "apps/busybox/");
        assert_eq!(
            capture_path("apps", "busybox", 0),
            "apps/busybox/kube-objects/0/"
        );
        assert_eq!(
            snapshot_key("apps", "busybox"),
            "apps/busybox/ProtectionGroup/a"
        );
    }

    #[test]
    fn test_workload_ref_delegates() {
        let w = WorkloadRef::new("apps", "busybox", 3);
        assert_eq!(w.capture_path(1), "apps/busybox/kube-objects/1/");
        assert_eq!(w.capture_name_prefix(0), "apps--busybox--0");
        assert_eq!(w.recover_request_name(1), "apps--busybox--1");
        assert_eq!(w.owner_labels()["kop.dev/owner-name"], "busybox");
    }

    #[test]
    fn test_recover_name() {
        assert_eq!(recover_request_name("apps", "busybox", 2), "apps--busybox--2");
    }
}
