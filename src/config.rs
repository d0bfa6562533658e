//! Operator configuration.
//!
//! Timeout and requeue policy are configuration, not constants: the right
//! readiness timeout for a rollout depends on dataset size and storage speed,
//! so every knob here is overridable from the environment.

use std::time::Duration;

use tracing::warn;

/// Controller policy parameters with documented defaults.
///
/// | Env var | Default | Meaning |
/// |---------|---------|---------|
/// | `BK_OPERATOR_READY_TIMEOUT_SECS` | 600 | how long a rotated bookie may stay not-ready before the rollout is marked Failed |
/// | `BK_OPERATOR_ROLLOUT_REQUEUE_SECS` | 10 | requeue delay while a rollout is stepping |
/// | `BK_OPERATOR_RESYNC_SECS` | 300 | periodic requeue when converged |
/// | `BK_OPERATOR_ERROR_BACKOFF_SECS` | 5 | base delay for retryable errors |
/// | `BK_OPERATOR_ERROR_BACKOFF_CAP_SECS` | 300 | backoff ceiling |
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Bounded wait for a rotated replica to report ready.
    pub ready_timeout: Duration,
    /// Requeue delay while the upgrade sequencer is mid-rollout.
    pub rollout_requeue: Duration,
    /// Requeue delay when the cluster is converged.
    pub resync_interval: Duration,
    /// Base delay for retryable-error backoff.
    pub error_backoff: Duration,
    /// Ceiling for retryable-error backoff.
    pub error_backoff_cap: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(600),
            rollout_requeue: Duration::from_secs(10),
            resync_interval: Duration::from_secs(300),
            error_backoff: Duration::from_secs(5),
            error_backoff_cap: Duration::from_secs(300),
        }
    }
}

impl ControllerConfig {
    /// Build the configuration from environment variables, falling back to
    /// defaults on unset or unparsable values.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ready_timeout: env_secs("BK_OPERATOR_READY_TIMEOUT_SECS", defaults.ready_timeout),
            rollout_requeue: env_secs("BK_OPERATOR_ROLLOUT_REQUEUE_SECS", defaults.rollout_requeue),
            resync_interval: env_secs("BK_OPERATOR_RESYNC_SECS", defaults.resync_interval),
            error_backoff: env_secs("BK_OPERATOR_ERROR_BACKOFF_SECS", defaults.error_backoff),
            error_backoff_cap: env_secs(
                "BK_OPERATOR_ERROR_BACKOFF_CAP_SECS",
                defaults.error_backoff_cap,
            ),
        }
    }
}

fn env_secs(var: &str, default: Duration) -> Duration {
    match std::env::var(var) {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(secs) => Duration::from_secs(secs),
            Err(_) => {
                warn!(var = %var, value = %raw, "Ignoring unparsable duration, using default");
                default
            }
        },
        Err(_) => default,
    }
}
