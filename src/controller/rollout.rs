//! Rolling upgrade sequencer for bookie clusters.
//!
//! When the declared image differs from what the StatefulSet runs, replicas
//! are rotated one ordinal at a time, highest first, each rotation gated on
//! the previous replica reporting ready. Bulk image swaps never happen: a
//! quorum-sensitive ensemble can only afford one member down at a time.
//!
//! The module is split into a pure decision core (`next_step`) operating on
//! an observation of live state, and an async executor that applies the
//! chosen step against the API server. Rollout progress is always recomputed
//! from the live pods; the persisted `RolloutStatus` carries only phase
//! bookkeeping, the target/previous versions, and the rotation timestamp
//! that the readiness timeout is measured against.

use std::time::Duration;

use jiff::Timestamp;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    Api, ResourceExt,
    api::{DeleteParams, ListParams, PostParams},
};
use tracing::{debug, info, warn};

use crate::controller::context::Context;
use crate::controller::error::Error;
use crate::controller::objects::template_image;
use crate::crd::{BookkeeperCluster, RolloutPhase, RolloutStatus};
use crate::resources::common::{pod_selector_string, statefulset_name};

/// One replica as observed from a live pod.
#[derive(Clone, Debug)]
pub struct ObservedReplica {
    pub ordinal: i32,
    /// Image the pod is running. None while the pod is absent (mid-rotation).
    pub image: Option<String>,
    pub ready: bool,
}

/// Snapshot of everything the sequencer decides on.
#[derive(Clone, Debug)]
pub struct RolloutObservation {
    pub spec_image: String,
    pub template_image: Option<String>,
    pub desired_replicas: i32,
    pub replicas: Vec<ObservedReplica>,
}

impl RolloutObservation {
    fn replica(&self, ordinal: i32) -> Option<&ObservedReplica> {
        self.replicas.iter().find(|r| r.ordinal == ordinal)
    }

    fn is_done(&self, ordinal: i32, target: &str) -> bool {
        self.replica(ordinal)
            .is_some_and(|r| r.image.as_deref() == Some(target) && r.ready)
    }

    /// First not-done ordinal in rotation order, or None when all are done.
    fn current_ordinal(&self, target: &str, descending: bool) -> Option<i32> {
        let ordinals: Vec<i32> = if descending {
            (0..self.desired_replicas).rev().collect()
        } else {
            (0..self.desired_replicas).collect()
        };
        ordinals.into_iter().find(|&o| !self.is_done(o, target))
    }

    /// Any live replica running an image other than `image`.
    fn any_replica_off(&self, image: &str) -> Option<&ObservedReplica> {
        self.replicas
            .iter()
            .filter(|r| r.ordinal < self.desired_replicas)
            .find(|r| matches!(r.image.as_deref(), Some(i) if i != image))
    }
}

/// The single action the sequencer takes this pass.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RolloutStep {
    /// Nothing to do: converged while Idle, or halted while Failed.
    Hold,
    /// Enter RollingForward toward `target`.
    Begin {
        target: String,
        previous: Option<String>,
    },
    /// The spec image returned to the pre-rollout version; reverse direction.
    BeginRollback { target: String },
    /// Rotate the replica at `ordinal`: point the template at `target` and
    /// delete that single pod.
    Rotate { ordinal: i32, target: String },
    /// A rotation is in flight at `ordinal`; wait, no ordinal advance.
    Await { ordinal: i32 },
    /// All ordinals run the target and report ready; reset to Idle.
    Complete,
    /// The replica at `ordinal` stayed not-ready past the timeout.
    Stall { ordinal: i32 },
}

/// Decide the sequencer's next action from live state.
pub fn next_step(
    obs: &RolloutObservation,
    state: &RolloutStatus,
    now: Timestamp,
    ready_timeout: Duration,
) -> RolloutStep {
    match state.phase {
        RolloutPhase::Idle => idle_step(obs),
        RolloutPhase::RollingForward => rolling_step(obs, state, now, ready_timeout, true),
        RolloutPhase::RollingBack => rolling_step(obs, state, now, ready_timeout, false),
        RolloutPhase::Failed => failed_step(obs, state),
    }
}

fn idle_step(obs: &RolloutObservation) -> RolloutStep {
    if obs.desired_replicas == 0 {
        return RolloutStep::Hold;
    }
    let Some(template) = obs.template_image.as_deref() else {
        // StatefulSet not created yet; nothing to roll.
        return RolloutStep::Hold;
    };

    if template != obs.spec_image {
        return RolloutStep::Begin {
            target: obs.spec_image.clone(),
            previous: Some(template.to_string()),
        };
    }

    // Replay safety: the template already matches the spec but a pod does
    // not, e.g. after a crash between the template write and the status
    // write. Re-enter the rollout so the stale pods still get rotated.
    if let Some(stale) = obs.any_replica_off(&obs.spec_image) {
        return RolloutStep::Begin {
            target: obs.spec_image.clone(),
            previous: stale.image.clone(),
        };
    }

    RolloutStep::Hold
}

fn rolling_step(
    obs: &RolloutObservation,
    state: &RolloutStatus,
    now: Timestamp,
    ready_timeout: Duration,
    forward: bool,
) -> RolloutStep {
    let Some(target) = state.target_version.as_deref() else {
        // Phase without a target is inconsistent bookkeeping; restart from
        // a fresh observation.
        return idle_step(obs);
    };

    // A spec change mid-rollout retargets before anything else.
    if obs.spec_image != target {
        if forward && state.previous_version.as_deref() == Some(obs.spec_image.as_str()) {
            return RolloutStep::BeginRollback {
                target: obs.spec_image.clone(),
            };
        }
        // A new unrelated version (or a re-flip during rollback) restarts a
        // forward rollout toward it.
        return RolloutStep::Begin {
            target: obs.spec_image.clone(),
            previous: state.target_version.clone(),
        };
    }

    let Some(ordinal) = obs.current_ordinal(target, forward) else {
        return RolloutStep::Complete;
    };

    match obs.replica(ordinal) {
        Some(replica) if replica.image.as_deref() != Some(target) => {
            RolloutStep::Rotate {
                ordinal,
                target: target.to_string(),
            }
        }
        // Pod absent (being recreated) or present-but-not-ready: wait,
        // subject to the readiness timeout once a rotation was issued.
        _ => {
            if timed_out(state, ordinal, now, ready_timeout) {
                RolloutStep::Stall { ordinal }
            } else {
                RolloutStep::Await { ordinal }
            }
        }
    }
}

fn failed_step(obs: &RolloutObservation, state: &RolloutStatus) -> RolloutStep {
    let target = state.target_version.as_deref().unwrap_or(&obs.spec_image);

    // A corrected spec resumes sequencing.
    if obs.spec_image != target {
        if state.previous_version.as_deref() == Some(obs.spec_image.as_str()) {
            return RolloutStep::BeginRollback {
                target: obs.spec_image.clone(),
            };
        }
        return RolloutStep::Begin {
            target: obs.spec_image.clone(),
            previous: state.target_version.clone(),
        };
    }

    // The stalled replica may eventually have become ready on its own.
    if obs.current_ordinal(&obs.spec_image, true).is_none() {
        return RolloutStep::Complete;
    }

    // Halt: no further image updates until the spec changes.
    RolloutStep::Hold
}

/// Whether the rotation at `ordinal` exceeded the readiness timeout.
///
/// Only meaningful when the persisted bookkeeping refers to this ordinal;
/// when the sequencer just advanced, the executor re-stamps first.
fn timed_out(state: &RolloutStatus, ordinal: i32, now: Timestamp, ready_timeout: Duration) -> bool {
    if state.current_ordinal != Some(ordinal) {
        return false;
    }
    let Some(stamp) = state
        .last_image_update
        .as_deref()
        .and_then(|s| s.parse::<Timestamp>().ok())
    else {
        return false;
    };
    let elapsed = now.duration_since(stamp);
    elapsed.as_secs() >= 0 && elapsed.as_secs() as u64 > ready_timeout.as_secs()
}

/// Build an observation from the live StatefulSet and its pods.
pub fn observe(
    spec_image: &str,
    sts: &StatefulSet,
    pods: &[Pod],
    sts_name: &str,
) -> RolloutObservation {
    let desired_replicas = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
    let prefix = format!("{sts_name}-");

    let mut replicas: Vec<ObservedReplica> = pods
        .iter()
        .filter_map(|pod| {
            let ordinal = pod
                .metadata
                .name
                .as_deref()?
                .strip_prefix(&prefix)?
                .parse::<i32>()
                .ok()?;
            Some(ObservedReplica {
                ordinal,
                image: pod_image(pod),
                ready: pod_ready(pod),
            })
        })
        .collect();
    replicas.sort_by_key(|r| r.ordinal);

    RolloutObservation {
        spec_image: spec_image.to_string(),
        template_image: template_image(sts).map(str::to_string),
        desired_replicas,
        replicas,
    }
}

/// Image the pod actually runs, from container status when available.
fn pod_image(pod: &Pod) -> Option<String> {
    if let Some(status) = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .and_then(|cs| cs.first())
    {
        return Some(status.image.clone());
    }
    pod.spec
        .as_ref()
        .and_then(|s| s.containers.first())
        .and_then(|c| c.image.clone())
}

/// Standard Kubernetes readiness signal: the Ready pod condition.
fn pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// Advance the rollout by at most one step against the API server.
///
/// Returns the updated bookkeeping for the status projector to persist.
pub async fn reconcile_rollout(
    cluster: &BookkeeperCluster,
    ctx: &Context,
    namespace: &str,
) -> Result<RolloutStatus, Error> {
    let name = cluster.name_any();
    let state = cluster
        .status
        .as_ref()
        .map(|s| s.rollout.clone())
        .unwrap_or_default();

    let sts_name = statefulset_name(cluster);
    let sts_api: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), namespace);
    let sts = match sts_api.get(&sts_name).await {
        Ok(sts) => sts,
        // Object reconciler has not created it yet; next pass will see it.
        Err(kube::Error::Api(e)) if e.code == 404 => return Ok(state),
        Err(e) => return Err(Error::Kube(e)),
    };

    let pods_api: Api<Pod> = Api::namespaced(ctx.client.clone(), namespace);
    let pods = pods_api
        .list(&ListParams::default().labels(&pod_selector_string(cluster)))
        .await?;

    let obs = observe(&cluster.spec.image, &sts, &pods.items, &sts_name);
    let now = Timestamp::now();
    let step = next_step(&obs, &state, now, ctx.config.ready_timeout);
    debug!(name = %name, phase = %state.phase, step = ?step, "Sequencer step");

    match step {
        RolloutStep::Hold => Ok(state),

        RolloutStep::Begin { target, previous } => {
            info!(name = %name, target = %target, "Starting rolling upgrade");
            ctx.publish_normal_event(
                cluster,
                "RolloutStarted",
                "Upgrade",
                Some(format!("Rolling replicas to {target}, highest ordinal first")),
            )
            .await;
            Ok(RolloutStatus {
                phase: RolloutPhase::RollingForward,
                target_version: Some(target),
                previous_version: previous,
                current_ordinal: Some(obs.desired_replicas - 1),
                last_image_update: None,
            })
        }

        RolloutStep::BeginRollback { target } => {
            info!(name = %name, target = %target, "Reversing rollout direction");
            ctx.publish_normal_event(
                cluster,
                "RolloutRollingBack",
                "Upgrade",
                Some(format!("Spec image reverted; rolling replicas back to {target}")),
            )
            .await;
            Ok(RolloutStatus {
                phase: RolloutPhase::RollingBack,
                previous_version: state.target_version,
                target_version: Some(target),
                current_ordinal: Some(0),
                last_image_update: None,
            })
        }

        RolloutStep::Rotate { ordinal, target } => {
            rotate_replica(cluster, ctx, &sts_api, &pods_api, &sts, ordinal, &target).await?;
            Ok(RolloutStatus {
                current_ordinal: Some(ordinal),
                last_image_update: Some(now.to_string()),
                ..state
            })
        }

        RolloutStep::Await { ordinal } => {
            // Re-stamp when a new ordinal became current, so the readiness
            // timeout measures this replica's wait, not its predecessor's.
            if state.current_ordinal != Some(ordinal) || state.last_image_update.is_none() {
                Ok(RolloutStatus {
                    current_ordinal: Some(ordinal),
                    last_image_update: Some(now.to_string()),
                    ..state
                })
            } else {
                Ok(state)
            }
        }

        RolloutStep::Complete => {
            if state.phase != RolloutPhase::Idle {
                info!(name = %name, "Rollout complete");
                ctx.publish_normal_event(
                    cluster,
                    "RolloutCompleted",
                    "Upgrade",
                    Some(format!("All replicas running {}", obs.spec_image)),
                )
                .await;
            }
            Ok(RolloutStatus::default())
        }

        RolloutStep::Stall { ordinal } => {
            warn!(name = %name, ordinal = ordinal, "Rollout stalled waiting for readiness");
            ctx.publish_warning_event(
                cluster,
                "RolloutStalled",
                "Upgrade",
                Some(format!(
                    "Replica {ordinal} did not become ready within {}s; halting image updates until the spec changes",
                    ctx.config.ready_timeout.as_secs()
                )),
            )
            .await;
            Ok(RolloutStatus {
                phase: RolloutPhase::Failed,
                ..state
            })
        }
    }
}

/// Point the StatefulSet template at `target` and delete the pod at
/// `ordinal` so the OnDelete strategy recreates it from the new template.
///
/// The template write is a full replace carrying the observed
/// resourceVersion, so a concurrent writer is rejected instead of silently
/// overwritten.
async fn rotate_replica(
    cluster: &BookkeeperCluster,
    ctx: &Context,
    sts_api: &Api<StatefulSet>,
    pods_api: &Api<Pod>,
    observed: &StatefulSet,
    ordinal: i32,
    target: &str,
) -> Result<(), Error> {
    let name = cluster.name_any();
    let sts_name = statefulset_name(cluster);

    if template_image(observed) != Some(target) {
        let mut updated = observed.clone();
        if let Some(container) = updated
            .spec
            .as_mut()
            .and_then(|s| s.template.spec.as_mut())
            .and_then(|t| t.containers.first_mut())
        {
            container.image = Some(target.to_string());
        }
        sts_api
            .replace(&sts_name, &PostParams::default(), &updated)
            .await?;
    }

    let pod_name = format!("{sts_name}-{ordinal}");
    info!(name = %name, pod = %pod_name, target = %target, "Rotating replica");
    match pods_api.delete(&pod_name, &DeleteParams::default()).await {
        Ok(_) => {}
        // Already gone: the previous delete landed; recreation is in flight.
        Err(kube::Error::Api(e)) if e.code == 404 => {}
        Err(e) => return Err(Error::Kube(e)),
    }

    ctx.publish_normal_event(
        cluster,
        "ReplicaRotated",
        "Upgrade",
        Some(format!("Replaced {pod_name} with image {target}")),
    )
    .await;

    Ok(())
}
