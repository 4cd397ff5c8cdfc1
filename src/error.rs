// ABOUTME: Application-wide error types for slipway.
// ABOUTME: Wraps config, store, runtime and deployment failures for the CLI.

use std::path::PathBuf;
use thiserror::Error;

use crate::deploy::{DeployError, DeployErrorKind};
use crate::model::DeploymentStatus;
use crate::runtime::RuntimeError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("configuration file not found in {0}")]
    ConfigNotFound(PathBuf),

    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error("deployment {id} ended {status}: {message}")]
    DeploymentEnded {
        id: String,
        status: DeploymentStatus,
        message: String,
    },
}

impl Error {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Deploy(e) => match e.kind() {
                DeployErrorKind::Validation => 2,
                DeployErrorKind::Cancelled => 3,
                _ => 1,
            },
            Error::DeploymentEnded { status, .. } if *status == DeploymentStatus::Cancelled => 3,
            Error::AlreadyExists(_)
            | Error::ConfigNotFound(_)
            | Error::MissingEnvVar(_)
            | Error::InvalidConfig(_)
            | Error::UnknownService(_)
            | Error::Yaml(_) => 2,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeploymentId, ServiceId};

    #[test]
    fn validation_errors_exit_with_two() {
        let err = Error::from(DeployError::RollbackWithVolumes(ServiceId::new("shop-prod-db")));
        assert_eq!(err.exit_code(), 2);
        assert_eq!(Error::UnknownService("x".into()).exit_code(), 2);
    }

    #[test]
    fn cancellation_exits_with_three() {
        let err = Error::from(DeployError::Cancelled(DeploymentId::new("d1")));
        assert_eq!(err.exit_code(), 3);

        let ended = Error::DeploymentEnded {
            id: "d1".into(),
            status: DeploymentStatus::Cancelled,
            message: "superseded".into(),
        };
        assert_eq!(ended.exit_code(), 3);
    }

    #[test]
    fn failed_deployments_exit_with_one() {
        let ended = Error::DeploymentEnded {
            id: "d1".into(),
            status: DeploymentStatus::Failed,
            message: "health check failed".into(),
        };
        assert_eq!(ended.exit_code(), 1);
        assert_eq!(
            ended.to_string(),
            "deployment d1 ended failed: health check failed"
        );
    }
}
