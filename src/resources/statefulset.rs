//! StatefulSet generation for bookie clusters.
//!
//! Creates a StatefulSet with proper configuration for bookie operation:
//! - Stable network identity via the headless service
//! - Separate journal and ledger volumes for durability
//! - HTTP probes against the bookie admin endpoint
//! - `OnDelete` update strategy so pod replacement stays operator-driven

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy};
use k8s_openapi::api::core::v1::{
    ConfigMapEnvSource, Container, ContainerPort, EnvFromSource, HTTPGetAction,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSecurityContext, PodSpec,
    PodTemplateSpec, Probe, ResourceRequirements, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::crd::BookkeeperCluster;
use crate::resources::common::{
    config_map_name, headless_service_name, owner_reference, pod_selector_labels,
    standard_annotations, standard_labels, statefulset_name, CONFIG_HASH_ANNOTATION,
};
use crate::resources::configmap::{BOOKIE_HTTP_PORT, BOOKIE_PORT};

/// Filesystem group owning the bookie volumes.
const BOOKIE_FS_GROUP: i64 = 1000;
/// Termination grace period, allows journal flush before shutdown.
const TERMINATION_GRACE_PERIOD: i64 = 60;

/// Generate the bookie StatefulSet for a cluster.
///
/// `config_hash` is embedded as a pod-template annotation so that a
/// config-only change produces a template diff and forces pod replacement.
pub fn generate_statefulset(cluster: &BookkeeperCluster, config_hash: &str) -> StatefulSet {
    let labels = standard_labels(cluster);
    let annotations = standard_annotations(cluster);

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(statefulset_name(cluster)),
            namespace: cluster.namespace(),
            labels: Some(labels.clone()),
            annotations: if annotations.is_empty() {
                None
            } else {
                Some(annotations.clone())
            },
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(cluster.spec.replicas),
            service_name: Some(headless_service_name(cluster)),
            selector: LabelSelector {
                match_labels: Some(pod_selector_labels(cluster)),
                ..Default::default()
            },
            // Parallel pod management for faster ensemble startup
            pod_management_policy: Some("Parallel".to_string()),
            // OnDelete strategy: the upgrade sequencer rotates pods one
            // ordinal at a time; Kubernetes never bulk-replaces them.
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("OnDelete".to_string()),
                ..Default::default()
            }),
            template: generate_pod_template(cluster, &labels, config_hash),
            volume_claim_templates: Some(vec![
                generate_pvc_template("journal", &cluster.spec.storage.journal_size, cluster),
                generate_pvc_template("ledgers", &cluster.spec.storage.ledger_size, cluster),
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the pod template for the StatefulSet.
fn generate_pod_template(
    cluster: &BookkeeperCluster,
    labels: &BTreeMap<String, String>,
    config_hash: &str,
) -> PodTemplateSpec {
    let mut annotations = standard_annotations(cluster);
    annotations.insert(CONFIG_HASH_ANNOTATION.to_string(), config_hash.to_string());

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels.clone()),
            annotations: Some(annotations),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            termination_grace_period_seconds: Some(TERMINATION_GRACE_PERIOD),
            security_context: Some(PodSecurityContext {
                fs_group: Some(BOOKIE_FS_GROUP),
                ..Default::default()
            }),
            containers: vec![generate_bookie_container(cluster)],
            ..Default::default()
        }),
    }
}

/// Generate the main bookie container.
fn generate_bookie_container(cluster: &BookkeeperCluster) -> Container {
    Container {
        name: "bookie".to_string(),
        image: Some(cluster.spec.image.clone()),
        ports: Some(vec![
            ContainerPort {
                container_port: BOOKIE_PORT,
                name: Some("bookie".to_string()),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                container_port: BOOKIE_HTTP_PORT,
                name: Some("http".to_string()),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
        ]),
        env_from: Some(vec![EnvFromSource {
            config_map_ref: Some(ConfigMapEnvSource {
                name: config_map_name(cluster),
                optional: Some(false),
            }),
            ..Default::default()
        }]),
        resources: Some(generate_resource_requirements(cluster)),
        volume_mounts: Some(vec![
            VolumeMount {
                name: "journal".to_string(),
                mount_path: "/bookkeeper/journal".to_string(),
                ..Default::default()
            },
            VolumeMount {
                name: "ledgers".to_string(),
                mount_path: "/bookkeeper/ledgers".to_string(),
                ..Default::default()
            },
        ]),
        startup_probe: Some(generate_startup_probe()),
        liveness_probe: Some(generate_liveness_probe()),
        readiness_probe: Some(generate_readiness_probe()),
        ..Default::default()
    }
}

/// Generate resource requirements from the spec.
fn generate_resource_requirements(cluster: &BookkeeperCluster) -> ResourceRequirements {
    ResourceRequirements {
        requests: Some({
            let mut requests = BTreeMap::new();
            requests.insert(
                "cpu".to_string(),
                Quantity(cluster.spec.resources.requests.cpu.clone()),
            );
            requests.insert(
                "memory".to_string(),
                Quantity(cluster.spec.resources.requests.memory.clone()),
            );
            requests
        }),
        limits: Some({
            let mut limits = BTreeMap::new();
            limits.insert(
                "cpu".to_string(),
                Quantity(cluster.spec.resources.limits.cpu.clone()),
            );
            limits.insert(
                "memory".to_string(),
                Quantity(cluster.spec.resources.limits.memory.clone()),
            );
            limits
        }),
        ..Default::default()
    }
}

/// Startup probe: generous threshold to cover journal replay after restart.
fn generate_startup_probe() -> Probe {
    Probe {
        http_get: Some(http_heartbeat()),
        failure_threshold: Some(60),
        period_seconds: Some(5),
        timeout_seconds: Some(5),
        ..Default::default()
    }
}

/// Liveness probe against the bookie admin heartbeat.
fn generate_liveness_probe() -> Probe {
    Probe {
        http_get: Some(http_heartbeat()),
        initial_delay_seconds: Some(10),
        period_seconds: Some(10),
        timeout_seconds: Some(5),
        failure_threshold: Some(3),
        ..Default::default()
    }
}

/// Readiness probe: the bookie reports ready once registered and serving.
fn generate_readiness_probe() -> Probe {
    Probe {
        http_get: Some(http_heartbeat()),
        initial_delay_seconds: Some(5),
        period_seconds: Some(5),
        timeout_seconds: Some(5),
        failure_threshold: Some(3),
        success_threshold: Some(1),
        ..Default::default()
    }
}

fn http_heartbeat() -> HTTPGetAction {
    HTTPGetAction {
        path: Some("/heartbeat".to_string()),
        port: IntOrString::String("http".to_string()),
        ..Default::default()
    }
}

/// Generate a PVC template for the StatefulSet.
fn generate_pvc_template(
    name: &str,
    size: &str,
    cluster: &BookkeeperCluster,
) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: cluster.spec.storage.storage_class_name.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some({
                    let mut requests = BTreeMap::new();
                    requests.insert("storage".to_string(), Quantity(size.to_string()));
                    requests
                }),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
