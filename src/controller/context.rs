//! Shared context for the controller.
//!
//! The Context struct holds shared state that is passed to the reconciler,
//! including the Kubernetes client, event recorder, policy configuration,
//! and health state. Each reconcile invocation operates on its own freshly
//! fetched snapshot; nothing here is mutated across invocations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};

use crate::config::ControllerConfig;
use crate::crd::BookkeeperCluster;
use crate::health::HealthState;

/// Field manager name for server-side apply
pub const FIELD_MANAGER: &str = "bookkeeper-operator";

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Policy parameters (timeouts, requeue intervals)
    pub config: ControllerConfig,
    /// Event reporter identity
    reporter: Reporter,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
    /// Consecutive-failure counts per object, feeding the error backoff
    retry_counts: Arc<Mutex<HashMap<String, u32>>>,
}

impl Context {
    /// Create a new context
    pub fn new(
        client: Client,
        config: ControllerConfig,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            client,
            config,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
            health_state,
            retry_counts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record another consecutive failure for an object, returning the count
    /// of failures before this one.
    pub fn bump_retry(&self, key: &str) -> u32 {
        let mut counts = self.retry_counts.lock().unwrap_or_else(|e| e.into_inner());
        let entry = counts.entry(key.to_string()).or_insert(0);
        let prior = *entry;
        *entry = entry.saturating_add(1);
        prior
    }

    /// Reset an object's failure count after a successful reconcile.
    pub fn clear_retry(&self, key: &str) {
        let mut counts = self.retry_counts.lock().unwrap_or_else(|e| e.into_inner());
        counts.remove(key);
    }

    /// Create an event recorder for publishing Kubernetes events
    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }

    /// Publish a normal event for a cluster
    pub async fn publish_normal_event(
        &self,
        cluster: &BookkeeperCluster,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(cluster, EventType::Normal, reason, action, note)
            .await;
    }

    /// Publish a warning event for a cluster
    pub async fn publish_warning_event(
        &self,
        cluster: &BookkeeperCluster,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.publish(cluster, EventType::Warning, reason, action, note)
            .await;
    }

    async fn publish(
        &self,
        cluster: &BookkeeperCluster,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let recorder = self.recorder();
        let object_ref = cluster.object_ref(&());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }
}
