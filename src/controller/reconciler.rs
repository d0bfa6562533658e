//! Reconciliation loop for BookkeeperCluster.
//!
//! One invocation per queued change event, serialized per object by the kube
//! runtime. Each pass runs the same fixed order — resolve desired children,
//! apply non-upgrade children, step the rollout, project status — against a
//! fresh snapshot, so arbitrary replay and partial failure both converge on
//! the next delivery.

use std::sync::Arc;
use std::time::Instant;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, ResourceExt, api::ListParams, runtime::controller::Action};
use tracing::{debug, error, warn};

use crate::{
    controller::{
        context::Context,
        error::Error,
        objects, rollout,
        rollout::RolloutObservation,
        status,
    },
    crd::BookkeeperCluster,
    resources,
    resources::common::{pod_selector_string, statefulset_name},
};

/// Reconcile a BookkeeperCluster
///
/// This is the main reconciliation function called by the controller.
pub async fn reconcile(obj: Arc<BookkeeperCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let key = format!("{namespace}/{name}");

    debug!(name = %name, namespace = %namespace, "Reconciling BookkeeperCluster");

    let api: Api<BookkeeperCluster> = Api::namespaced(ctx.client.clone(), &namespace);

    // Deletion: owner-reference garbage collection tears the children down;
    // the core never performs cascading deletes itself.
    if obj.metadata.deletion_timestamp.is_some() {
        debug!(name = %name, "Cluster is being deleted, nothing to reconcile");
        return Ok(Action::await_change());
    }

    // Resolve desired children. A spec that cannot be resolved is surfaced
    // as an Error condition and not retried: only a spec update can fix it.
    let desired = match resources::resolve(&obj) {
        Ok(desired) => desired,
        Err(Error::InvalidSpec(message)) => {
            warn!(name = %name, error = %message, "Invalid spec");
            ctx.publish_warning_event(&obj, "InvalidSpec", "Resolve", Some(message.clone()))
                .await;
            let obs = observe_cluster(&obj, &ctx, &namespace).await?;
            let rollout_state = obj
                .status
                .as_ref()
                .map(|s| s.rollout.clone())
                .unwrap_or_default();
            let projected = status::project_status(
                &obs,
                rollout_state,
                obj.spec.replicas,
                obj.metadata.generation,
                Some(&message),
            );
            status::write_status(&api, &obj, projected).await?;
            ctx.clear_retry(&key);
            return Ok(Action::await_change());
        }
        Err(e) => return Err(e),
    };

    // Non-upgrade children first; the sequencer owns the image.
    objects::apply_children(&obj, &desired, &ctx, &namespace).await?;

    // Advance the rollout by at most one step.
    let rollout_state = rollout::reconcile_rollout(&obj, &ctx, &namespace).await?;

    // With the sequencer idle, propagate config changes by recycling stale
    // pods; an OnDelete StatefulSet never replaces them on its own.
    let config_recycle_pending = if rollout_state.phase == crate::crd::RolloutPhase::Idle {
        objects::recycle_stale_config_pods(&obj, &ctx, &namespace, &desired.config_hash).await?
    } else {
        false
    };

    // Project status from a fresh read of the children.
    let obs = observe_cluster(&obj, &ctx, &namespace).await?;
    let projected = status::project_status(
        &obs,
        rollout_state.clone(),
        obj.spec.replicas,
        obj.metadata.generation,
        None,
    );
    let ready_replicas = projected.ready_replicas;
    status::write_status(&api, &obj, projected).await?;

    ctx.clear_retry(&key);

    // Record metrics
    if let Some(ref health_state) = ctx.health_state {
        let duration = start_time.elapsed().as_secs_f64();
        health_state
            .metrics
            .record_reconcile(&namespace, &name, duration);
        health_state.metrics.set_cluster_replicas(
            &namespace,
            &name,
            i64::from(obj.spec.replicas),
            i64::from(ready_replicas),
        );
        health_state
            .metrics
            .set_rollout_phase(&namespace, &name, &rollout_state.phase.to_string());
    }

    // Mid-rollout (or mid-config-recycle) the loop needs to keep stepping
    // even absent external events; otherwise a slow resync is enough.
    let requeue = if rollout_state.phase.is_active() || config_recycle_pending {
        ctx.config.rollout_requeue
    } else {
        ctx.config.resync_interval
    };
    Ok(Action::requeue(requeue))
}

/// Error policy for the controller
pub fn error_policy(obj: Arc<BookkeeperCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let key = format!("{namespace}/{name}");

    // Record error metric
    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&namespace, &name);
    }

    if error.is_not_found() {
        debug!(name = %name, "Resource not found (likely deleted)");
        return Action::await_change();
    }

    if error.is_retryable() {
        let retries = ctx.bump_retry(&key);
        let backoff = error.requeue_after(retries, ctx.config.error_backoff, ctx.config.error_backoff_cap);
        warn!(
            name = %name,
            error = %error,
            retries = retries,
            backoff_secs = backoff.as_secs(),
            "Retryable error, requeueing with backoff"
        );
        Action::requeue(backoff)
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
        Action::requeue(ctx.config.error_backoff_cap)
    }
}

/// Fresh observation of the cluster's StatefulSet and pods.
async fn observe_cluster(
    cluster: &BookkeeperCluster,
    ctx: &Context,
    namespace: &str,
) -> Result<RolloutObservation, Error> {
    let sts_name = statefulset_name(cluster);
    let sts_api: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), namespace);
    let pods_api: Api<Pod> = Api::namespaced(ctx.client.clone(), namespace);

    let pods = pods_api
        .list(&ListParams::default().labels(&pod_selector_string(cluster)))
        .await?;

    match sts_api.get(&sts_name).await {
        Ok(sts) => Ok(rollout::observe(
            &cluster.spec.image,
            &sts,
            &pods.items,
            &sts_name,
        )),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(RolloutObservation {
            spec_image: cluster.spec.image.clone(),
            template_image: None,
            desired_replicas: cluster.spec.replicas,
            replicas: Vec::new(),
        }),
        Err(e) => Err(Error::Kube(e)),
    }
}
