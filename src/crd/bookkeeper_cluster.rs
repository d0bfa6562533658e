//! BookkeeperCluster Custom Resource Definition.
//!
//! Defines the BookkeeperCluster CRD for deploying and managing BookKeeper
//! bookie ensembles on Kubernetes. The spec describes the desired cluster
//! shape; the status is written exclusively by the controller and reflects
//! freshly observed state.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// BookkeeperCluster is a custom resource for deploying bookie ensembles.
///
/// Example:
/// ```yaml
/// apiVersion: bookkeeper.io/v1alpha1
/// kind: BookkeeperCluster
/// metadata:
///   name: my-cluster
/// spec:
///   replicas: 3
///   image: apache/bookkeeper:4.17.1
///   zkUri: zookeeper-client:2181
///   config:
///     journalMaxSizeMB: "2048"
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "bookkeeper.io",
    version = "v1alpha1",
    kind = "BookkeeperCluster",
    plural = "bookkeeperclusters",
    shortname = "bk",
    status = "BookkeeperClusterStatus",
    namespaced,
    // Print columns for kubectl get
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Ready", "type":"integer", "jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".status.currentVersion"}"#,
    printcolumn = r#"{"name":"Rollout", "type":"string", "jsonPath":".status.rollout.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BookkeeperClusterSpec {
    /// Number of bookie replicas (default 3).
    /// The CRD schema enforces a non-negative count before the controller
    /// ever sees the object.
    #[serde(default = "default_replicas")]
    #[schemars(range(min = 0))]
    pub replicas: i32,

    /// Bookie container image in `repository:tag` form.
    #[serde(default = "default_image")]
    pub image: String,

    /// ZooKeeper connection string used by bookies for ledger metadata.
    #[serde(default = "default_zk_uri")]
    pub zk_uri: String,

    /// Per-bookie configuration overrides, merged over the operator's
    /// baseline configuration. Overrides win on key collision.
    #[serde(default)]
    pub config: BTreeMap<String, String>,

    /// Persistent storage configuration for journal and ledger volumes.
    #[serde(default)]
    pub storage: StorageSpec,

    /// Resource requests and limits for bookie pods.
    #[serde(default)]
    pub resources: ResourceRequirementsSpec,

    /// Additional labels applied to all managed resources.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Additional annotations applied to all managed resources.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl Default for BookkeeperClusterSpec {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            image: default_image(),
            zk_uri: default_zk_uri(),
            config: BTreeMap::new(),
            storage: StorageSpec::default(),
            resources: ResourceRequirementsSpec::default(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }
}

fn default_replicas() -> i32 {
    3
}

fn default_image() -> String {
    "apache/bookkeeper:4.17.1".to_string()
}

fn default_zk_uri() -> String {
    "zookeeper-client:2181".to_string()
}

/// Persistent storage configuration for bookie volumes.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    /// Storage class name for PersistentVolumeClaims.
    /// If not set, uses the cluster default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    /// Size of the journal volume (default: 10Gi).
    #[serde(default = "default_journal_size")]
    pub journal_size: String,

    /// Size of the ledger volume (default: 10Gi).
    #[serde(default = "default_ledger_size")]
    pub ledger_size: String,
}

impl Default for StorageSpec {
    fn default() -> Self {
        Self {
            storage_class_name: None,
            journal_size: default_journal_size(),
            ledger_size: default_ledger_size(),
        }
    }
}

fn default_journal_size() -> String {
    "10Gi".to_string()
}

fn default_ledger_size() -> String {
    "10Gi".to_string()
}

/// Resource requests and limits for bookie pods.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirementsSpec {
    /// CPU and memory requests.
    #[serde(default)]
    pub requests: ResourceSpec,

    /// CPU and memory limits.
    #[serde(default)]
    pub limits: ResourceSpec,
}

/// CPU and memory quantities.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    /// CPU quantity (default: 500m).
    #[serde(default = "default_cpu")]
    pub cpu: String,

    /// Memory quantity (default: 1Gi).
    #[serde(default = "default_memory")]
    pub memory: String,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            cpu: default_cpu(),
            memory: default_memory(),
        }
    }
}

fn default_cpu() -> String {
    "500m".to_string()
}

fn default_memory() -> String {
    "1Gi".to_string()
}

/// Status of a BookkeeperCluster.
///
/// Written only by the controller's status projector. Rollout progress is
/// always recomputed from live pod state; only phase bookkeeping lives here.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BookkeeperClusterStatus {
    /// Total observed bookie replicas.
    #[serde(default)]
    pub replicas: i32,

    /// Replicas reporting Ready.
    #[serde(default)]
    pub ready_replicas: i32,

    /// Replicas running the spec image.
    #[serde(default)]
    pub updated_replicas: i32,

    /// Image running on the majority of replicas, or "mixed" while no strict
    /// majority exists during a rollout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_version: Option<String>,

    /// Conditions describing the current state, keyed by type.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Rolling upgrade state.
    #[serde(default)]
    pub rollout: RolloutStatus,

    /// The generation most recently observed by the controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Rolling upgrade bookkeeping embedded in the cluster status.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RolloutStatus {
    /// Current rollout phase.
    #[serde(default)]
    pub phase: RolloutPhase,

    /// Image the rollout is driving toward. None while Idle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_version: Option<String>,

    /// Image the cluster ran before the rollout began. Recognizing a spec
    /// change back to this value is what triggers RollingBack.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<String>,

    /// Ordinal of the replica currently being rotated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_ordinal: Option<i32>,

    /// Timestamp of the last targeted image rotation, basis for the
    /// readiness timeout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_image_update: Option<String>,
}

/// RolloutPhase represents the state of the upgrade sequencer.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum RolloutPhase {
    /// No rollout in progress; spec and observed versions converge.
    #[default]
    Idle,
    /// Replicas are being rotated to a new image, highest ordinal first.
    RollingForward,
    /// The user reverted the spec image mid-rollout; replicas are being
    /// rotated back, lowest ordinal first.
    RollingBack,
    /// A rotated replica failed to become ready within the timeout.
    /// Image progression halts until the spec changes.
    Failed,
}

impl RolloutPhase {
    /// Whether the sequencer is actively rotating replicas.
    pub fn is_active(&self) -> bool {
        matches!(self, RolloutPhase::RollingForward | RolloutPhase::RollingBack)
    }
}

impl std::fmt::Display for RolloutPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RolloutPhase::Idle => write!(f, "Idle"),
            RolloutPhase::RollingForward => write!(f, "RollingForward"),
            RolloutPhase::RollingBack => write!(f, "RollingBack"),
            RolloutPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Condition describes the state of a cluster at a certain point.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Machine-readable reason for the condition's last transition.
    pub reason: String,
    /// Human-readable message indicating details about last transition.
    pub message: String,
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: String,
    /// The generation of the resource this condition was observed for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition stamped with the current time.
    pub fn new(
        condition_type: &str,
        status: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
            observed_generation: generation,
        }
    }

    /// Create an "Available" condition.
    pub fn available(available: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new("Available", available, reason, message, generation)
    }

    /// Create a "Progressing" condition.
    pub fn progressing(
        progressing: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self::new("Progressing", progressing, reason, message, generation)
    }

    /// Create an "Error" condition.
    pub fn error(error: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new("Error", error, reason, message, generation)
    }
}
