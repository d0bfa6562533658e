//! Common resource generation utilities.
//!
//! Deterministic child-object names, standard labels, and owner references
//! shared by all generators.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;

use crate::crd::BookkeeperCluster;

/// Pod-template annotation carrying the SHA-256 hash of the rendered bookie
/// configuration. Changing the ConfigMap changes this annotation, which is
/// the only mechanism by which config edits propagate to running pods.
pub const CONFIG_HASH_ANNOTATION: &str = "bookkeeper.io/config-hash";

/// Name of the bookie StatefulSet for a cluster.
pub fn statefulset_name(cluster: &BookkeeperCluster) -> String {
    format!("{}-bookie", cluster.name_any())
}

/// Name of the bookie ConfigMap for a cluster.
pub fn config_map_name(cluster: &BookkeeperCluster) -> String {
    format!("{}-bookie-config", cluster.name_any())
}

/// Name of the headless discovery Service for a cluster.
pub fn headless_service_name(cluster: &BookkeeperCluster) -> String {
    format!("{}-bookie-headless", cluster.name_any())
}

/// Name of the PodDisruptionBudget for a cluster.
pub fn pdb_name(cluster: &BookkeeperCluster) -> String {
    format!("{}-bookie", cluster.name_any())
}

/// Name of the bookie pod at a given ordinal.
pub fn pod_name(cluster: &BookkeeperCluster, ordinal: i32) -> String {
    format!("{}-{}", statefulset_name(cluster), ordinal)
}

/// Standard labels applied to all managed resources.
pub fn standard_labels(cluster: &BookkeeperCluster) -> BTreeMap<String, String> {
    let mut labels = pod_selector_labels(cluster);
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        "bookkeeper-operator".to_string(),
    );

    // Merge user-defined labels
    for (key, value) in &cluster.spec.labels {
        labels.insert(key.clone(), value.clone());
    }

    labels
}

/// Labels used to select bookie pods. Kept to the stable identifying subset
/// so user label changes never orphan pods from their StatefulSet.
pub fn pod_selector_labels(cluster: &BookkeeperCluster) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        "app.kubernetes.io/name".to_string(),
        "bookkeeper".to_string(),
    );
    labels.insert(
        "app.kubernetes.io/instance".to_string(),
        cluster.name_any(),
    );
    labels.insert(
        "app.kubernetes.io/component".to_string(),
        "bookie".to_string(),
    );
    labels
}

/// User-defined annotations applied to all managed resources.
pub fn standard_annotations(cluster: &BookkeeperCluster) -> BTreeMap<String, String> {
    cluster.spec.annotations.clone()
}

/// Create an owner reference back to the BookkeeperCluster.
///
/// Used for garbage collection and lookup only, never for control decisions.
pub fn owner_reference(cluster: &BookkeeperCluster) -> OwnerReference {
    OwnerReference {
        api_version: "bookkeeper.io/v1alpha1".to_string(),
        kind: "BookkeeperCluster".to_string(),
        name: cluster.name_any(),
        uid: cluster.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Label selector string for listing a cluster's bookie pods.
pub fn pod_selector_string(cluster: &BookkeeperCluster) -> String {
    pod_selector_labels(cluster)
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
