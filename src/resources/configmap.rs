//! ConfigMap generation for bookie configuration.
//!
//! The rendered data is a fixed baseline merged with the user's overrides,
//! overrides winning on key collision. Bookies consume the entries as
//! environment variables through `envFrom`, following the `BK_`-prefixed
//! convention of the upstream docker image.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use sha2::{Digest, Sha256};

use crate::crd::BookkeeperCluster;
use crate::resources::common::{
    config_map_name, headless_service_name, owner_reference, standard_annotations, standard_labels,
};

/// Bookie client port.
pub const BOOKIE_PORT: i32 = 3181;
/// Bookie HTTP admin server port (probes, metrics).
pub const BOOKIE_HTTP_PORT: i32 = 8080;

/// Baseline bookie configuration.
///
/// Keys use the `BK_` env prefix understood by the bookie entrypoint. User
/// overrides from `spec.config` are applied on top with the same prefix.
fn baseline_config(cluster: &BookkeeperCluster) -> BTreeMap<String, String> {
    let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());
    let mut data = BTreeMap::new();

    data.insert("BK_bookiePort".to_string(), BOOKIE_PORT.to_string());
    data.insert(
        "BK_httpServerEnabled".to_string(),
        "true".to_string(),
    );
    data.insert(
        "BK_httpServerPort".to_string(),
        BOOKIE_HTTP_PORT.to_string(),
    );
    data.insert(
        "BK_journalDirectory".to_string(),
        "/bookkeeper/journal".to_string(),
    );
    data.insert(
        "BK_ledgerDirectories".to_string(),
        "/bookkeeper/ledgers".to_string(),
    );
    data.insert("BK_zkServers".to_string(), cluster.spec.zk_uri.clone());
    // Stable bookie identity across pod IP changes; pairs with the
    // headless service's per-pod DNS records.
    data.insert(
        "BK_useHostNameAsBookieID".to_string(),
        "true".to_string(),
    );
    data.insert(
        "BK_advertisedAddress".to_string(),
        String::new(),
    );
    data.insert(
        "BK_extraServerComponents".to_string(),
        String::new(),
    );
    data.insert(
        "BK_autoRecoveryDaemonEnabled".to_string(),
        "true".to_string(),
    );
    data.insert(
        "BOOKIE_HEADLESS_SERVICE".to_string(),
        format!("{}.{}.svc.cluster.local", headless_service_name(cluster), namespace),
    );

    data
}

/// Merge baseline configuration with user overrides, overrides winning.
pub fn rendered_config(cluster: &BookkeeperCluster) -> BTreeMap<String, String> {
    let mut data = baseline_config(cluster);
    for (key, value) in &cluster.spec.config {
        let key = if key.starts_with("BK_") {
            key.clone()
        } else {
            format!("BK_{key}")
        };
        data.insert(key, value.clone());
    }
    data
}

/// Generate the bookie ConfigMap for a cluster.
pub fn generate_config_map(cluster: &BookkeeperCluster) -> ConfigMap {
    let labels = standard_labels(cluster);
    let annotations = standard_annotations(cluster);

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(config_map_name(cluster)),
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
        data: Some(rendered_config(cluster)),
        ..Default::default()
    }
}

/// SHA-256 hash of a ConfigMap's data, hex-encoded.
///
/// BTreeMap iteration order is sorted, so the hash is deterministic for a
/// given configuration.
pub fn config_hash(config_map: &ConfigMap) -> String {
    let mut hasher = Sha256::new();
    if let Some(data) = &config_map.data {
        for (key, value) in data {
            hasher.update(key.as_bytes());
            hasher.update([0u8]);
            hasher.update(value.as_bytes());
            hasher.update([0u8]);
        }
    }
    format!("{:x}", hasher.finalize())
}
