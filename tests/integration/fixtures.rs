//! Shared fixtures for integration tests.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Namespace;
use kube::{
    Api, Client,
    api::{DeleteParams, ObjectMeta, PostParams},
};

use bookkeeper_operator::crd::{BookkeeperCluster, BookkeeperClusterSpec};

/// Build a BookkeeperCluster object for tests.
pub fn test_cluster(name: &str, namespace: &str, replicas: i32, image: &str) -> BookkeeperCluster {
    BookkeeperCluster {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: BookkeeperClusterSpec {
            replicas,
            image: image.to_string(),
            config: BTreeMap::new(),
            ..Default::default()
        },
        status: None,
    }
}

/// Create an isolated namespace for one test run.
pub async fn create_namespace(client: &Client, name: &str) -> Namespace {
    let api: Api<Namespace> = Api::all(client.clone());
    let namespace = Namespace {
        metadata: kube::api::ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    match api.create(&PostParams::default(), &namespace).await {
        Ok(ns) => ns,
        Err(kube::Error::Api(e)) if e.code == 409 => namespace,
        Err(e) => panic!("failed to create namespace {name}: {e}"),
    }
}

/// Delete a test namespace, ignoring missing ones.
pub async fn delete_namespace(client: &Client, name: &str) {
    let api: Api<Namespace> = Api::all(client.clone());
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => {}
        Err(kube::Error::Api(e)) if e.code == 404 => {}
        Err(e) => panic!("failed to delete namespace {name}: {e}"),
    }
}

/// Apply a cluster, tolerating an existing one.
pub async fn apply_cluster(client: &Client, cluster: &BookkeeperCluster) {
    let namespace = cluster
        .metadata
        .namespace
        .clone()
        .unwrap_or_else(|| "default".to_string());
    let api: Api<BookkeeperCluster> = Api::namespaced(client.clone(), &namespace);
    match api.create(&PostParams::default(), cluster).await {
        Ok(_) => {}
        Err(kube::Error::Api(e)) if e.code == 409 => {}
        Err(e) => panic!("failed to create cluster: {e}"),
    }
}
