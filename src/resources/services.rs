//! Service generation for bookie clusters.
//!
//! Creates the headless Service that gives each bookie a stable DNS name
//! (`pod-0.svc-headless.ns.svc.cluster.local`), which bookies advertise as
//! their identity.

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::crd::BookkeeperCluster;
use crate::resources::common::{
    headless_service_name, owner_reference, pod_selector_labels, standard_annotations,
    standard_labels,
};
use crate::resources::configmap::{BOOKIE_HTTP_PORT, BOOKIE_PORT};

/// Generate the headless Service for bookie discovery.
///
/// `publishNotReadyAddresses: true` lets bookies resolve each other's DNS
/// names during ensemble formation, before any pod reports ready.
pub fn generate_headless_service(cluster: &BookkeeperCluster) -> Service {
    let labels = standard_labels(cluster);
    let annotations = standard_annotations(cluster);

    Service {
        metadata: ObjectMeta {
            name: Some(headless_service_name(cluster)),
            namespace: cluster.namespace(),
            labels: Some(labels),
            annotations: if annotations.is_empty() {
                None
            } else {
                Some(annotations)
            },
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            selector: Some(pod_selector_labels(cluster)),
            ports: Some(vec![
                ServicePort {
                    port: BOOKIE_PORT,
                    target_port: Some(IntOrString::String("bookie".to_string())),
                    name: Some("bookie".to_string()),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
                ServicePort {
                    port: BOOKIE_HTTP_PORT,
                    target_port: Some(IntOrString::String("http".to_string())),
                    name: Some("http".to_string()),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
