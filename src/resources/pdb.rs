//! PodDisruptionBudget generation for bookie clusters.
//!
//! Creates a PDB so voluntary disruptions (node drains, upgrades) never take
//! more than one bookie at a time, matching the one-at-a-time replacement
//! rule the upgrade sequencer enforces for write-quorum availability.

use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::crd::BookkeeperCluster;
use crate::resources::common::{owner_reference, pdb_name, pod_selector_labels, standard_labels};

/// Generate a PodDisruptionBudget for a cluster.
pub fn generate_pod_disruption_budget(cluster: &BookkeeperCluster) -> PodDisruptionBudget {
    let labels = standard_labels(cluster);

    PodDisruptionBudget {
        metadata: ObjectMeta {
            name: Some(pdb_name(cluster)),
            namespace: cluster.namespace(),
            labels: Some(labels),
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(PodDisruptionBudgetSpec {
            max_unavailable: Some(IntOrString::Int(1)),
            selector: Some(LabelSelector {
                match_labels: Some(pod_selector_labels(cluster)),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
