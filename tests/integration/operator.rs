//! Scoped operator spawning for integration tests.
//!
//! Runs the controller in a test-specific namespace and exposes every
//! processed identifier on a channel, so tests can assert exactly which
//! objects were reconciled and when. The operator is stopped automatically
//! when dropped (RAII pattern).

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::runtime::Controller;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, ResourceExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};
use tracing::{debug, info};

use bookkeeper_operator::ControllerConfig;
use bookkeeper_operator::controller::context::Context;
use bookkeeper_operator::controller::reconciler::{error_policy, reconcile};
use bookkeeper_operator::crd::BookkeeperCluster;

/// A scoped operator instance for integration testing.
///
/// Wraps the production reconcile entry point so that the identifier of
/// every completed invocation is captured on a channel.
pub struct ScopedOperator {
    /// Handle for the controller task.
    handle: JoinHandle<()>,
    /// Shutdown signal sender (oneshot for clean shutdown).
    shutdown_tx: Option<oneshot::Sender<()>>,
    /// Namespace being watched.
    namespace: Arc<str>,
    /// Identifiers (`namespace/name`) of completed reconcile invocations.
    reconciled: mpsc::UnboundedReceiver<String>,
}

impl ScopedOperator {
    /// Start a new operator instance watching a specific namespace.
    pub async fn start(client: Client, namespace: &str) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (observe_tx, reconciled) = mpsc::unbounded_channel();
        let ns: Arc<str> = namespace.into();

        info!("Starting scoped operator in namespace: {}", ns);

        let handle = {
            let ns = Arc::clone(&ns);
            tokio::spawn(async move {
                tokio::select! {
                    _ = Self::run_controller(client, &ns, observe_tx) => {
                        panic!("BookkeeperCluster controller exited unexpectedly");
                    }
                    _ = shutdown_rx => {
                        debug!("Controller received shutdown signal");
                    }
                }
            })
        };

        // Give the controller a moment to start watching
        tokio::time::sleep(Duration::from_millis(100)).await;

        Self {
            handle,
            shutdown_tx: Some(shutdown_tx),
            namespace: ns,
            reconciled,
        }
    }

    /// Run the controller with the reconcile entry point wrapped so every
    /// processed identifier is forwarded to the observation channel.
    async fn run_controller(
        client: Client,
        namespace: &str,
        observe_tx: mpsc::UnboundedSender<String>,
    ) {
        let ctx = Arc::new(Context::new(
            client.clone(),
            ControllerConfig::from_env(),
            None,
        ));

        let clusters: Api<BookkeeperCluster> = Api::namespaced(client.clone(), namespace);
        let statefulsets: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
        let configmaps: Api<ConfigMap> = Api::namespaced(client, namespace);

        let watcher_config = WatcherConfig::default().any_semantic();

        Controller::new(clusters, watcher_config.clone())
            .owns(statefulsets, watcher_config.clone())
            .owns(configmaps, watcher_config)
            .run(
                move |obj: Arc<BookkeeperCluster>, ctx| {
                    let observe_tx = observe_tx.clone();
                    async move {
                        let key = format!(
                            "{}/{}",
                            obj.namespace().unwrap_or_default(),
                            obj.name_any()
                        );
                        let result = reconcile(obj, ctx).await;
                        let _ = observe_tx.send(key);
                        result
                    }
                },
                error_policy,
                ctx,
            )
            .for_each(|result| async move {
                match result {
                    Ok((obj, _action)) => debug!("Reconciled: {}", obj.name),
                    Err(e) => debug!("Reconcile error (may be expected in tests): {:?}", e),
                }
            })
            .await;
    }

    /// Wait until the identifier `namespace/name` has been reconciled, or
    /// time out.
    pub async fn wait_for_reconcile(&mut self, key: &str, wait: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match timeout(remaining, self.reconciled.recv()).await {
                Ok(Some(seen)) if seen == key => return true,
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => return false,
            }
        }
    }

    /// Drain any already-captured identifiers.
    pub fn drain(&mut self) -> Vec<String> {
        let mut seen = Vec::new();
        while let Ok(key) = self.reconciled.try_recv() {
            seen.push(key);
        }
        seen
    }

    /// Check if the operator is still running.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Get the namespace being watched.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

impl Drop for ScopedOperator {
    fn drop(&mut self) {
        // Send shutdown signal if not already sent
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        // Abort the task
        self.handle.abort();
    }
}
