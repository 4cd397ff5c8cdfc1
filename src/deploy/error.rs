// ABOUTME: Error type for deployment orchestration.
// ABOUTME: Each variant maps to a failure kind used for logs and exit codes.

use crate::engine::EngineError;
use crate::integrations::SourceError;
use crate::store::StoreError;
use crate::types::{DeploymentId, ServiceId};

/// Coarse classification of a deployment failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployErrorKind {
    /// Bad input or a missing record; nothing was started.
    Validation,
    /// Infrastructure noise that outlasted the retry budget.
    Transient,
    /// The image or build is broken; retrying will not help.
    Artifact,
    /// The container engine or the workload misbehaved.
    Runtime,
    /// A newer deployment superseded this one.
    Cancelled,
    /// State store or internal bookkeeping failure.
    Internal,
}

impl DeployErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeployErrorKind::Validation => "validation",
            DeployErrorKind::Transient => "transient",
            DeployErrorKind::Artifact => "artifact",
            DeployErrorKind::Runtime => "runtime",
            DeployErrorKind::Cancelled => "cancelled",
            DeployErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for DeployErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("service not found: {0}")]
    ServiceNotFound(ServiceId),

    #[error("deployment not found: {0}")]
    DeploymentNotFound(DeploymentId),

    #[error("{kind} not found: {id}")]
    MissingRecord { kind: &'static str, id: String },

    #[error("invalid service {service}: {reason}")]
    InvalidService { service: ServiceId, reason: String },

    #[error("deployment {0} has no image to roll back to")]
    NoRollbackImage(DeploymentId),

    #[error("service {0} has persistent volumes; rollback would run old code against new data")]
    RollbackWithVolumes(ServiceId),

    #[error("image {0} is no longer present on the host")]
    ImageGone(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("source checkout failed: {0}")]
    Source(#[from] SourceError),

    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    #[error("replica {index} failed to start: {source}")]
    ReplicaStart { index: u32, source: EngineError },

    #[error("health check failed: {}", .failures.join("; "))]
    Unhealthy { failures: Vec<String> },

    #[error("TLS material for {service} could not be prepared: {reason}")]
    Tls { service: ServiceId, reason: String },

    #[error("deployment {0} was cancelled by a newer deployment")]
    Cancelled(DeploymentId),

    #[error("deployment pipeline aborted: {0}")]
    Internal(String),
}

impl DeployError {
    pub fn kind(&self) -> DeployErrorKind {
        match self {
            DeployError::ServiceNotFound(_)
            | DeployError::DeploymentNotFound(_)
            | DeployError::MissingRecord { .. }
            | DeployError::InvalidService { .. }
            | DeployError::NoRollbackImage(_)
            | DeployError::RollbackWithVolumes(_)
            | DeployError::ImageGone(_) => DeployErrorKind::Validation,
            DeployError::Engine(e) | DeployError::ReplicaStart { source: e, .. } => {
                engine_kind(e)
            }
            DeployError::Source(_) => DeployErrorKind::Artifact,
            DeployError::Unhealthy { .. } => DeployErrorKind::Runtime,
            DeployError::Cancelled(_) => DeployErrorKind::Cancelled,
            DeployError::Store(_) | DeployError::Tls { .. } | DeployError::Internal(_) => {
                DeployErrorKind::Internal
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DeployError::Cancelled(_))
    }

    pub(crate) fn missing(kind: &'static str, id: impl ToString) -> Self {
        DeployError::MissingRecord {
            kind,
            id: id.to_string(),
        }
    }
}

fn engine_kind(error: &EngineError) -> DeployErrorKind {
    if error.is_artifact_failure() {
        DeployErrorKind::Artifact
    } else if error.is_transient_exhaustion() {
        DeployErrorKind::Transient
    } else {
        DeployErrorKind::Runtime
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PullFailureClass;

    fn pull_error(class: PullFailureClass) -> EngineError {
        EngineError::Pull {
            image: "nginx:1.27".to_string(),
            class,
            attempts: 1,
            message: "boom".to_string(),
        }
    }

    #[test]
    fn pull_failures_split_by_retryability() {
        let auth = DeployError::from(pull_error(PullFailureClass::RegistryAuth));
        assert_eq!(auth.kind(), DeployErrorKind::Artifact);

        let network = DeployError::from(pull_error(PullFailureClass::TransientNetwork));
        assert_eq!(network.kind(), DeployErrorKind::Transient);
    }

    #[test]
    fn exhausted_ports_are_runtime_failures() {
        let err = DeployError::ReplicaStart {
            index: 1,
            source: EngineError::PortsExhausted {
                attempts: 10,
                tried: vec![20000],
            },
        };
        assert_eq!(err.kind(), DeployErrorKind::Runtime);
        assert_eq!(
            err.to_string(),
            "replica 1 failed to start: no free host port after 10 attempts (tried [20000])"
        );
    }

    #[test]
    fn rollback_guards_are_validation_errors() {
        let err = DeployError::RollbackWithVolumes(ServiceId::new("shop-prod-db"));
        assert_eq!(err.kind(), DeployErrorKind::Validation);
    }
}
