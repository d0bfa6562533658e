//! Object reconciliation for BookkeeperCluster children.
//!
//! For each child kind: fetch by deterministic name, create if absent,
//! update if a stable subset of mutable fields drifted, otherwise no-op.
//! All writes are idempotent; issuing the same update twice is harmless.
//!
//! The StatefulSet's container image is exempt: before diffing, the desired
//! template image is overwritten with the observed one, so the only code
//! path that can move the image is the upgrade sequencer. This is what
//! prevents an unsafe bulk image swap of a quorum-sensitive ensemble.

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::{
    Api, Resource, ResourceExt,
    api::{Patch, PatchParams, PostParams},
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::controller::context::{Context, FIELD_MANAGER};
use crate::controller::error::Error;
use crate::crd::BookkeeperCluster;
use crate::resources::{DesiredChildren, CONFIG_HASH_ANNOTATION};

/// Result of syncing one child object.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Per-kind sync report for logging and event emission.
#[derive(Clone, Debug)]
pub struct SyncReport {
    pub kind: &'static str,
    pub name: String,
    pub outcome: SyncOutcome,
}

/// Apply all non-upgrade children of a cluster.
///
/// Returns one report per child kind.
pub async fn apply_children(
    cluster: &BookkeeperCluster,
    desired: &DesiredChildren,
    ctx: &Context,
    namespace: &str,
) -> Result<Vec<SyncReport>, Error> {
    let mut reports = Vec::with_capacity(4);

    let cm_api: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), namespace);
    reports.push(
        sync_child(&cm_api, "ConfigMap", &desired.config_map, |observed, want| {
            observed.data != want.data
        })
        .await?,
    );

    let svc_api: Api<Service> = Api::namespaced(ctx.client.clone(), namespace);
    reports.push(
        sync_child(
            &svc_api,
            "Service",
            &desired.headless_service,
            service_needs_update,
        )
        .await?,
    );

    let pdb_api: Api<PodDisruptionBudget> = Api::namespaced(ctx.client.clone(), namespace);
    reports.push(
        sync_child(
            &pdb_api,
            "PodDisruptionBudget",
            &desired.disruption_budget,
            pdb_needs_update,
        )
        .await?,
    );

    let sts_api: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), namespace);
    reports.push(sync_statefulset(&sts_api, &desired.stateful_set).await?);

    let created: Vec<&str> = reports
        .iter()
        .filter(|r| r.outcome == SyncOutcome::Created)
        .map(|r| r.kind)
        .collect();
    if !created.is_empty() {
        ctx.publish_normal_event(
            cluster,
            "Created",
            "CreateChildren",
            Some(format!("Created {}", created.join(", "))),
        )
        .await;
    }

    Ok(reports)
}

/// Generic get-then-create-or-update for a child object.
async fn sync_child<K, F>(
    api: &Api<K>,
    kind: &'static str,
    desired: &K,
    needs_update: F,
) -> Result<SyncReport, Error>
where
    K: Resource + Clone + std::fmt::Debug + Serialize + DeserializeOwned,
    <K as Resource>::DynamicType: Default,
    F: Fn(&K, &K) -> bool,
{
    let name = desired.name_any();

    match api.get(&name).await {
        Ok(observed) => {
            if needs_update(&observed, desired) {
                info!(kind = kind, name = %name, "Updating child object");
                api.patch(
                    &name,
                    &PatchParams::apply(FIELD_MANAGER).force(),
                    &Patch::Apply(desired),
                )
                .await?;
                Ok(SyncReport {
                    kind,
                    name,
                    outcome: SyncOutcome::Updated,
                })
            } else {
                debug!(kind = kind, name = %name, "Child object up to date");
                Ok(SyncReport {
                    kind,
                    name,
                    outcome: SyncOutcome::Unchanged,
                })
            }
        }
        Err(kube::Error::Api(e)) if e.code == 404 => {
            info!(kind = kind, name = %name, "Creating child object");
            api.create(&PostParams::default(), desired).await?;
            Ok(SyncReport {
                kind,
                name,
                outcome: SyncOutcome::Created,
            })
        }
        Err(e) => Err(Error::Kube(e)),
    }
}

/// Sync the StatefulSet while preserving the observed container image.
async fn sync_statefulset(
    api: &Api<StatefulSet>,
    desired: &StatefulSet,
) -> Result<SyncReport, Error> {
    let name = desired.name_any();

    match api.get(&name).await {
        Ok(observed) => {
            let pinned = with_observed_image(desired, &observed);
            if statefulset_needs_update(&observed, &pinned) {
                info!(name = %name, "Updating StatefulSet");
                api.patch(
                    &name,
                    &PatchParams::apply(FIELD_MANAGER).force(),
                    &Patch::Apply(&pinned),
                )
                .await?;
                Ok(SyncReport {
                    kind: "StatefulSet",
                    name,
                    outcome: SyncOutcome::Updated,
                })
            } else {
                debug!(name = %name, "StatefulSet up to date");
                Ok(SyncReport {
                    kind: "StatefulSet",
                    name,
                    outcome: SyncOutcome::Unchanged,
                })
            }
        }
        Err(kube::Error::Api(e)) if e.code == 404 => {
            // Fresh create: no running pods, so the target image applies
            // directly and no rollout is involved.
            info!(name = %name, "Creating StatefulSet");
            api.create(&PostParams::default(), desired).await?;
            Ok(SyncReport {
                kind: "StatefulSet",
                name,
                outcome: SyncOutcome::Created,
            })
        }
        Err(e) => Err(Error::Kube(e)),
    }
}

/// Image currently set on a StatefulSet's pod template.
pub fn template_image(sts: &StatefulSet) -> Option<&str> {
    sts.spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .containers
        .first()?
        .image
        .as_deref()
}

/// Copy of `desired` with the pod-template image replaced by the image the
/// observed StatefulSet currently runs. Image changes belong to the upgrade
/// sequencer alone.
pub fn with_observed_image(desired: &StatefulSet, observed: &StatefulSet) -> StatefulSet {
    let mut pinned = desired.clone();
    if let Some(image) = template_image(observed) {
        let image = image.to_string();
        if let Some(container) = pinned
            .spec
            .as_mut()
            .and_then(|s| s.template.spec.as_mut())
            .and_then(|t| t.containers.first_mut())
        {
            container.image = Some(image);
        }
    }
    pinned
}

/// Stable subset of StatefulSet fields the object reconciler owns:
/// replica count, config-hash annotation, and container resources.
fn statefulset_needs_update(observed: &StatefulSet, desired: &StatefulSet) -> bool {
    let observed_spec = observed.spec.as_ref();
    let desired_spec = desired.spec.as_ref();

    let replicas_differ = observed_spec.and_then(|s| s.replicas) != desired_spec.and_then(|s| s.replicas);

    let hash = |sts: &StatefulSet| {
        sts.spec
            .as_ref()
            .and_then(|s| s.template.metadata.as_ref())
            .and_then(|m| m.annotations.as_ref())
            .and_then(|a| a.get(CONFIG_HASH_ANNOTATION))
            .cloned()
    };
    let hash_differs = hash(observed) != hash(desired);

    let resources = |sts: &StatefulSet| {
        sts.spec
            .as_ref()
            .and_then(|s| s.template.spec.as_ref())
            .and_then(|t| t.containers.first())
            .and_then(|c| c.resources.clone())
    };
    let resources_differ = resources(observed) != resources(desired);

    replicas_differ || hash_differs || resources_differ
}

/// Stable subset for Services: selector and ports.
fn service_needs_update(observed: &Service, desired: &Service) -> bool {
    let selector = |svc: &Service| svc.spec.as_ref().and_then(|s| s.selector.clone());
    let ports = |svc: &Service| {
        svc.spec.as_ref().and_then(|s| {
            s.ports.as_ref().map(|ports| {
                ports
                    .iter()
                    .map(|p| (p.name.clone(), p.port))
                    .collect::<Vec<_>>()
            })
        })
    };
    selector(observed) != selector(desired) || ports(observed) != ports(desired)
}

/// Stable subset for PodDisruptionBudgets: maxUnavailable and selector.
fn pdb_needs_update(observed: &PodDisruptionBudget, desired: &PodDisruptionBudget) -> bool {
    let spec = |pdb: &PodDisruptionBudget| {
        pdb.spec
            .as_ref()
            .map(|s| (s.max_unavailable.clone(), s.selector.clone()))
    };
    spec(observed) != spec(desired)
}

/// One pod's config state, as observed from its annotations.
#[derive(Clone, Debug)]
pub struct PodConfigState {
    pub ordinal: i32,
    pub config_hash: Option<String>,
    pub ready: bool,
}

/// Decision for propagating a config change to running pods.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConfigRecycleStep {
    /// Every replica already runs the desired configuration.
    Settled,
    /// A replacement is in flight (pod missing or not ready); wait.
    AwaitReady,
    /// Replace the pod at this ordinal so it picks up the new template.
    Replace(i32),
}

/// Decide the next config-recycle action.
///
/// Under the OnDelete strategy a template change alone never replaces pods,
/// so the object reconciler recycles stale pods itself: one at a time,
/// highest ordinal first, and only while every replica is ready, which keeps
/// the same availability margin the upgrade sequencer guarantees.
pub fn next_config_recycle(
    pods: &[PodConfigState],
    desired_hash: &str,
    desired_replicas: i32,
) -> ConfigRecycleStep {
    let pod_at = |ordinal: i32| pods.iter().find(|p| p.ordinal == ordinal);

    let missing = (0..desired_replicas).any(|o| pod_at(o).is_none());
    let stale: Vec<i32> = pods
        .iter()
        .filter(|p| p.ordinal < desired_replicas)
        .filter(|p| p.config_hash.as_deref() != Some(desired_hash))
        .map(|p| p.ordinal)
        .collect();

    if stale.is_empty() {
        return if missing {
            ConfigRecycleStep::AwaitReady
        } else {
            ConfigRecycleStep::Settled
        };
    }

    let all_ready = !missing
        && (0..desired_replicas).all(|o| pod_at(o).is_some_and(|p| p.ready));
    if !all_ready {
        return ConfigRecycleStep::AwaitReady;
    }

    match stale.iter().max() {
        Some(&ordinal) => ConfigRecycleStep::Replace(ordinal),
        None => ConfigRecycleStep::Settled,
    }
}

/// Propagate a config change by recycling stale pods one at a time.
///
/// Returns true while replacements are still pending, so the loop driver
/// keeps stepping absent external events. Only called while the upgrade
/// sequencer is Idle; a pod recreated here inherits the template image the
/// object reconciler preserved, never a new one.
pub async fn recycle_stale_config_pods(
    cluster: &BookkeeperCluster,
    ctx: &Context,
    namespace: &str,
    desired_hash: &str,
) -> Result<bool, Error> {
    use k8s_openapi::api::core::v1::Pod;
    use kube::api::{DeleteParams, ListParams};

    use crate::resources::common::{pod_selector_string, statefulset_name};

    let sts_name = statefulset_name(cluster);
    let prefix = format!("{sts_name}-");

    let pods_api: Api<Pod> = Api::namespaced(ctx.client.clone(), namespace);
    let pods = pods_api
        .list(&ListParams::default().labels(&pod_selector_string(cluster)))
        .await?;

    let states: Vec<PodConfigState> = pods
        .items
        .iter()
        .filter_map(|pod| {
            let ordinal = pod
                .metadata
                .name
                .as_deref()?
                .strip_prefix(&prefix)?
                .parse::<i32>()
                .ok()?;
            let config_hash = pod
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(CONFIG_HASH_ANNOTATION))
                .cloned();
            let ready = pod
                .status
                .as_ref()
                .and_then(|s| s.conditions.as_ref())
                .is_some_and(|conds| {
                    conds
                        .iter()
                        .any(|c| c.type_ == "Ready" && c.status == "True")
                });
            Some(PodConfigState {
                ordinal,
                config_hash,
                ready,
            })
        })
        .collect();

    match next_config_recycle(&states, desired_hash, cluster.spec.replicas) {
        ConfigRecycleStep::Settled => Ok(false),
        ConfigRecycleStep::AwaitReady => Ok(true),
        ConfigRecycleStep::Replace(ordinal) => {
            let pod_name = format!("{sts_name}-{ordinal}");
            info!(pod = %pod_name, "Replacing pod to pick up configuration change");
            match pods_api.delete(&pod_name, &DeleteParams::default()).await {
                Ok(_) => {}
                Err(kube::Error::Api(e)) if e.code == 404 => {}
                Err(e) => return Err(Error::Kube(e)),
            }
            ctx.publish_normal_event(
                cluster,
                "ConfigRolled",
                "PropagateConfig",
                Some(format!("Replaced {pod_name} to apply updated configuration")),
            )
            .await;
            Ok(true)
        }
    }
}
