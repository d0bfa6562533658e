//! Polling helpers for integration tests.

use std::future::Future;
use std::time::Duration;

use kube::{Api, Client};

use bookkeeper_operator::crd::BookkeeperCluster;

/// Poll `check` until it returns true or the timeout elapses.
pub async fn wait_for<F, Fut>(wait: Duration, interval: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}

/// Wait until a cluster's status condition of `condition_type` has `status`.
pub async fn wait_for_condition(
    client: &Client,
    namespace: &str,
    name: &str,
    condition_type: &str,
    status: &str,
    wait: Duration,
) -> bool {
    let api: Api<BookkeeperCluster> = Api::namespaced(client.clone(), namespace);
    wait_for(wait, Duration::from_secs(2), || {
        let api = api.clone();
        let name = name.to_string();
        let condition_type = condition_type.to_string();
        let status = status.to_string();
        async move {
            match api.get(&name).await {
                Ok(cluster) => cluster
                    .status
                    .as_ref()
                    .map(|s| {
                        s.conditions
                            .iter()
                            .any(|c| c.r#type == condition_type && c.status == status)
                    })
                    .unwrap_or(false),
                Err(_) => false,
            }
        }
    })
    .await
}

/// Wait until a cluster reports `ready` ready replicas.
pub async fn wait_for_ready_replicas(
    client: &Client,
    namespace: &str,
    name: &str,
    ready: i32,
    wait: Duration,
) -> bool {
    let api: Api<BookkeeperCluster> = Api::namespaced(client.clone(), namespace);
    wait_for(wait, Duration::from_secs(2), || {
        let api = api.clone();
        let name = name.to_string();
        async move {
            match api.get(&name).await {
                Ok(cluster) => cluster
                    .status
                    .as_ref()
                    .map(|s| s.ready_replicas == ready)
                    .unwrap_or(false),
                Err(_) => false,
            }
        }
    })
    .await
}
