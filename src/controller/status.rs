//! Status projection for BookkeeperCluster.
//!
//! Recomputes the status block from freshly observed child state after every
//! pass. Status is output only: nothing here feeds back into reconcile
//! decisions. Condition transition times are preserved when a condition's
//! value is unchanged, and the status subresource is only patched when the
//! projected status actually differs, so a converged cluster generates no
//! API traffic.

use std::collections::BTreeMap;

use kube::{
    Api, ResourceExt,
    api::{Patch, PatchParams},
};
use tracing::debug;

use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::Error;
use crate::controller::rollout::RolloutObservation;
use crate::crd::{
    BookkeeperCluster, BookkeeperClusterStatus, Condition, RolloutPhase, RolloutStatus,
};

/// Project a fresh status from the observed replicas and rollout state.
pub fn project_status(
    obs: &RolloutObservation,
    rollout: RolloutStatus,
    desired_replicas: i32,
    generation: Option<i64>,
    invalid_spec: Option<&str>,
) -> BookkeeperClusterStatus {
    let replicas = obs.replicas.len() as i32;
    let ready_replicas = obs.replicas.iter().filter(|r| r.ready).count() as i32;
    let updated_replicas = obs
        .replicas
        .iter()
        .filter(|r| r.image.as_deref() == Some(obs.spec_image.as_str()))
        .count() as i32;

    let conditions = build_conditions(
        ready_replicas,
        desired_replicas,
        &rollout,
        generation,
        invalid_spec,
    );

    BookkeeperClusterStatus {
        replicas,
        ready_replicas,
        updated_replicas,
        current_version: majority_version(obs),
        conditions,
        rollout,
        observed_generation: generation,
    }
}

/// Image held by a strict majority of replicas, or "mixed" when none is.
fn majority_version(obs: &RolloutObservation) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut total = 0usize;
    for replica in &obs.replicas {
        if let Some(image) = replica.image.as_deref() {
            *counts.entry(image).or_insert(0) += 1;
            total += 1;
        }
    }
    if total == 0 {
        return None;
    }
    counts
        .into_iter()
        .find(|(_, count)| *count * 2 > total)
        .map(|(image, _)| image.to_string())
        .or_else(|| Some("mixed".to_string()))
}

fn build_conditions(
    ready: i32,
    desired: i32,
    rollout: &RolloutStatus,
    generation: Option<i64>,
    invalid_spec: Option<&str>,
) -> Vec<Condition> {
    let available = ready >= desired;
    let progressing = rollout.phase.is_active();
    let stalled = rollout.phase == RolloutPhase::Failed;

    let mut conditions = vec![
        if available {
            Condition::available(
                true,
                "QuorumReady",
                &format!("{ready}/{desired} replicas ready"),
                generation,
            )
        } else {
            Condition::available(
                false,
                "ReplicasNotReady",
                &format!("{ready}/{desired} replicas ready"),
                generation,
            )
        },
        if progressing {
            Condition::progressing(
                true,
                &rollout.phase.to_string(),
                &format!(
                    "Rolling to {} (ordinal {})",
                    rollout.target_version.as_deref().unwrap_or("unknown"),
                    rollout
                        .current_ordinal
                        .map_or_else(|| "-".to_string(), |o| o.to_string())
                ),
                generation,
            )
        } else {
            Condition::progressing(false, "Reconciled", "No rollout in progress", generation)
        },
    ];

    if let Some(message) = invalid_spec {
        conditions.push(Condition::error(true, "InvalidSpec", message, generation));
    } else if stalled {
        conditions.push(Condition::error(
            true,
            "RolloutStalled",
            &format!(
                "Replica {} did not become ready in time",
                rollout
                    .current_ordinal
                    .map_or_else(|| "-".to_string(), |o| o.to_string())
            ),
            generation,
        ));
    } else {
        conditions.push(Condition::error(false, "AsExpected", "", generation));
    }

    conditions
}

/// Carry forward transition times for conditions whose value is unchanged.
pub fn merge_conditions(previous: &[Condition], mut projected: Vec<Condition>) -> Vec<Condition> {
    for condition in &mut projected {
        if let Some(prior) = previous.iter().find(|c| c.r#type == condition.r#type) {
            if prior.status == condition.status {
                condition.last_transition_time = prior.last_transition_time.clone();
            }
        }
    }
    projected
}

/// Write the projected status, suppressing no-op patches.
pub async fn write_status(
    api: &Api<BookkeeperCluster>,
    cluster: &BookkeeperCluster,
    mut status: BookkeeperClusterStatus,
) -> Result<(), Error> {
    let name = cluster.name_any();
    let previous = cluster.status.as_ref();

    status.conditions = merge_conditions(
        previous.map(|s| s.conditions.as_slice()).unwrap_or(&[]),
        status.conditions,
    );

    if previous == Some(&status) {
        debug!(name = %name, "Status unchanged, skipping write");
        return Ok(());
    }

    let patch = serde_json::json!({ "status": status });
    api.patch_status(
        &name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await?;

    Ok(())
}
