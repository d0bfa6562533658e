//! Desired-state resolution scenarios.

use std::collections::BTreeMap;

use bookkeeper_operator::crd::{BookkeeperCluster, BookkeeperClusterSpec};
use bookkeeper_operator::resources::{self, CONFIG_HASH_ANNOTATION};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

fn cluster(name: &str, replicas: i32, image: &str) -> BookkeeperCluster {
    BookkeeperCluster {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            uid: Some("uid-1".to_string()),
            ..Default::default()
        },
        spec: BookkeeperClusterSpec {
            replicas,
            image: image.to_string(),
            ..Default::default()
        },
        status: None,
    }
}

#[test]
fn resolves_all_four_children_with_deterministic_names() {
    let cluster = cluster("prod", 3, "apache/bookkeeper:4.17.1");
    let children = resources::resolve(&cluster).unwrap();

    assert_eq!(
        children.stateful_set.metadata.name.as_deref(),
        Some("prod-bookie")
    );
    assert_eq!(
        children.config_map.metadata.name.as_deref(),
        Some("prod-bookie-config")
    );
    assert_eq!(
        children.headless_service.metadata.name.as_deref(),
        Some("prod-bookie-headless")
    );
    assert_eq!(
        children.disruption_budget.metadata.name.as_deref(),
        Some("prod-bookie")
    );
}

#[test]
fn every_child_carries_an_owner_reference() {
    let cluster = cluster("prod", 3, "apache/bookkeeper:4.17.1");
    let children = resources::resolve(&cluster).unwrap();

    let owner_of = |meta: &ObjectMeta| {
        meta.owner_references
            .as_ref()
            .and_then(|refs| refs.first())
            .map(|r| (r.kind.clone(), r.name.clone()))
    };

    let expected = Some(("BookkeeperCluster".to_string(), "prod".to_string()));
    assert_eq!(owner_of(&children.stateful_set.metadata), expected);
    assert_eq!(owner_of(&children.config_map.metadata), expected);
    assert_eq!(owner_of(&children.headless_service.metadata), expected);
    assert_eq!(owner_of(&children.disruption_budget.metadata), expected);
}

#[test]
fn statefulset_pins_replicas_and_image_from_spec() {
    let cluster = cluster("prod", 5, "apache/bookkeeper:4.16.0");
    let children = resources::resolve(&cluster).unwrap();

    let spec = children.stateful_set.spec.unwrap();
    assert_eq!(spec.replicas, Some(5));
    assert_eq!(
        spec.template.spec.unwrap().containers[0].image.as_deref(),
        Some("apache/bookkeeper:4.16.0")
    );
}

#[test]
fn config_only_change_flows_into_pod_template_annotation() {
    let base = resources::resolve(&cluster("prod", 3, "apache/bookkeeper:4.17.1")).unwrap();

    let mut changed = cluster("prod", 3, "apache/bookkeeper:4.17.1");
    changed.spec.config = BTreeMap::from([(
        "journalMaxSizeMB".to_string(),
        "4096".to_string(),
    )]);
    let updated = resources::resolve(&changed).unwrap();

    // Same replica count, same image, different config hash
    assert_ne!(base.config_hash, updated.config_hash);

    let annotation = |sts: &k8s_openapi::api::apps::v1::StatefulSet| {
        sts.spec
            .as_ref()
            .unwrap()
            .template
            .metadata
            .as_ref()
            .unwrap()
            .annotations
            .as_ref()
            .unwrap()
            .get(CONFIG_HASH_ANNOTATION)
            .cloned()
            .unwrap()
    };
    assert_ne!(annotation(&base.stateful_set), annotation(&updated.stateful_set));

    // Image untouched: this change belongs to the object reconciler, not
    // the upgrade sequencer
    assert_eq!(
        updated.stateful_set.spec.unwrap().template.spec.unwrap().containers[0]
            .image
            .as_deref(),
        Some("apache/bookkeeper:4.17.1")
    );
}

#[test]
fn overrides_win_over_baseline_config() {
    let mut c = cluster("prod", 3, "apache/bookkeeper:4.17.1");
    c.spec.config = BTreeMap::from([
        ("zkServers".to_string(), "custom-zk:2181".to_string()),
        ("ensembleSize".to_string(), "3".to_string()),
    ]);
    let children = resources::resolve(&c).unwrap();

    let data = children.config_map.data.unwrap();
    assert_eq!(data.get("BK_zkServers"), Some(&"custom-zk:2181".to_string()));
    assert_eq!(data.get("BK_ensembleSize"), Some(&"3".to_string()));
    // Baseline keys the user did not touch stay put
    assert_eq!(data.get("BK_bookiePort"), Some(&"3181".to_string()));
}

#[test]
fn identical_specs_resolve_byte_identically() {
    let a = resources::resolve(&cluster("prod", 3, "apache/bookkeeper:4.17.1")).unwrap();
    let b = resources::resolve(&cluster("prod", 3, "apache/bookkeeper:4.17.1")).unwrap();

    assert_eq!(
        serde_json::to_vec(&a.stateful_set).unwrap(),
        serde_json::to_vec(&b.stateful_set).unwrap()
    );
    assert_eq!(
        serde_json::to_vec(&a.config_map).unwrap(),
        serde_json::to_vec(&b.config_map).unwrap()
    );
    assert_eq!(
        serde_json::to_vec(&a.headless_service).unwrap(),
        serde_json::to_vec(&b.headless_service).unwrap()
    );
    assert_eq!(
        serde_json::to_vec(&a.disruption_budget).unwrap(),
        serde_json::to_vec(&b.disruption_budget).unwrap()
    );
}

#[test]
fn config_change_drives_pod_recycling_without_the_sequencer() {
    use bookkeeper_operator::controller::objects::{
        next_config_recycle, ConfigRecycleStep, PodConfigState,
    };
    use bookkeeper_operator::controller::rollout::{next_step, RolloutStep};
    use bookkeeper_operator::crd::RolloutStatus;
    use std::time::Duration;

    let image = "apache/bookkeeper:4.17.1";
    let base = resources::resolve(&cluster("prod", 3, image)).unwrap();

    let mut changed = cluster("prod", 3, image);
    changed.spec.config = BTreeMap::from([(
        "journalMaxSizeMB".to_string(),
        "4096".to_string(),
    )]);
    let updated = resources::resolve(&changed).unwrap();

    // The sequencer stays out of it: no image mismatch exists
    let obs = bookkeeper_operator::controller::rollout::RolloutObservation {
        spec_image: image.to_string(),
        template_image: Some(image.to_string()),
        desired_replicas: 3,
        replicas: (0..3)
            .map(|o| bookkeeper_operator::controller::rollout::ObservedReplica {
                ordinal: o,
                image: Some(image.to_string()),
                ready: true,
            })
            .collect(),
    };
    let step = next_step(
        &obs,
        &RolloutStatus::default(),
        "2025-01-01T00:00:00Z".parse().unwrap(),
        Duration::from_secs(600),
    );
    assert_eq!(step, RolloutStep::Hold);

    // The object reconciler drives the replacement: pods still annotated
    // with the old hash get recycled, highest ordinal first
    let pods: Vec<PodConfigState> = (0..3)
        .map(|o| PodConfigState {
            ordinal: o,
            config_hash: Some(base.config_hash.clone()),
            ready: true,
        })
        .collect();
    assert_eq!(
        next_config_recycle(&pods, &updated.config_hash, 3),
        ConfigRecycleStep::Replace(2)
    );
}

#[test]
fn malformed_specs_are_rejected() {
    let mut c = cluster("prod", 3, "image-without-tag");
    assert!(resources::resolve(&c).is_err());

    c = cluster("prod", 3, "apache/bookkeeper:4.17.1");
    c.spec.config = BTreeMap::from([("has space".to_string(), "v".to_string())]);
    assert!(resources::resolve(&c).is_err());
}
