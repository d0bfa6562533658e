//! Desired-state resolution for BookkeeperCluster child objects.
//!
//! Every generator in this module is a pure function of the declared
//! resource: identical specs yield byte-identical child objects, so the
//! object reconciler's diff is stable and never oscillates.
//!
//! ## Resources Generated
//!
//! | Resource | Purpose |
//! |----------|---------|
//! | StatefulSet | Stable pod identity for bookie replicas |
//! | ConfigMap | Bookie configuration (baseline + user overrides) |
//! | Headless Service | Bookie discovery (publishNotReadyAddresses) |
//! | PodDisruptionBudget | Maintain write quorum during disruptions |

pub mod common;
pub mod configmap;
pub mod pdb;
pub mod services;
pub mod statefulset;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;

use crate::controller::error::Error;
use crate::crd::BookkeeperCluster;

// Re-export commonly used items from common
pub use common::{owner_reference, standard_labels, CONFIG_HASH_ANNOTATION};

/// The full set of child objects resolved from one cluster spec.
#[derive(Clone, Debug)]
pub struct DesiredChildren {
    pub config_map: ConfigMap,
    pub config_hash: String,
    pub stateful_set: StatefulSet,
    pub headless_service: Service,
    pub disruption_budget: PodDisruptionBudget,
}

/// Resolve a cluster spec into its concrete child-object specs.
///
/// Validates the spec first: malformed overrides or a malformed image
/// reference are an invalid desired state, surfaced as an `Error` condition
/// by the caller rather than retried blindly.
pub fn resolve(cluster: &BookkeeperCluster) -> Result<DesiredChildren, Error> {
    validate(cluster)?;

    let config_map = configmap::generate_config_map(cluster);
    let config_hash = configmap::config_hash(&config_map);
    let stateful_set = statefulset::generate_statefulset(cluster, &config_hash);
    let headless_service = services::generate_headless_service(cluster);
    let disruption_budget = pdb::generate_pod_disruption_budget(cluster);

    Ok(DesiredChildren {
        config_map,
        config_hash,
        stateful_set,
        headless_service,
        disruption_budget,
    })
}

/// Validate the parts of the spec the CRD schema cannot express.
fn validate(cluster: &BookkeeperCluster) -> Result<(), Error> {
    let spec = &cluster.spec;

    match spec.image.rsplit_once(':') {
        Some((repo, tag)) if !repo.is_empty() && !tag.is_empty() => {}
        _ => {
            return Err(Error::InvalidSpec(format!(
                "image {:?} is not in repository:tag form",
                spec.image
            )));
        }
    }

    for key in spec.config.keys() {
        if key.trim().is_empty() || key.chars().any(char::is_whitespace) {
            return Err(Error::InvalidSpec(format!(
                "config override key {key:?} is empty or contains whitespace"
            )));
        }
    }

    Ok(())
}
