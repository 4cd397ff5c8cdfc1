// ABOUTME: Shared handles every pipeline and the controller work through.
// ABOUTME: Store, engine, locks, collaborators and the outcome registry.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use super::cancel::CancelToken;
use super::lock::ServiceLocks;
use super::supervisor::PipelineOutcome;
use super::DeployError;
use crate::engine::Engine;
use crate::integrations::Collaborators;
use crate::model::{Deployment, Service};
use crate::store::Store;
use crate::types::{DeploymentId, ServiceId};

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub state_dir: PathBuf,
    /// Per-service lock files shared with other processes; in-process only when unset.
    pub lock_dir: Option<PathBuf>,
}

impl ControllerSettings {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            lock_dir: None,
        }
    }

    /// Serialize deploys with every process that uses the same state dir.
    pub fn with_file_locks(mut self) -> Self {
        self.lock_dir = Some(self.state_dir.join("locks"));
        self
    }

    /// Scratch checkouts, one directory per deployment.
    pub fn builds_dir(&self) -> PathBuf {
        self.state_dir.join("builds")
    }

    pub fn certs_dir(&self) -> PathBuf {
        self.state_dir.join("certs")
    }
}

pub(crate) type OutcomeReceiver = watch::Receiver<Option<PipelineOutcome>>;

pub(crate) struct Core {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) engine: Arc<Engine>,
    pub(crate) locks: ServiceLocks,
    pub(crate) collaborators: Collaborators,
    pub(crate) settings: ControllerSettings,
    pub(crate) outcomes: Mutex<HashMap<DeploymentId, OutcomeReceiver>>,
}

impl Core {
    /// Append a line to the deployment's build log and mirror it to tracing.
    /// Log writes never fail a pipeline.
    pub(crate) async fn log(&self, id: &DeploymentId, line: impl AsRef<str>) {
        let line = line.as_ref();
        info!(deployment_id = %id, "{line}");
        if let Err(e) = self.store.append_log(id, line).await {
            warn!(deployment_id = %id, error = %e, "failed to append deployment log");
        }
    }

    pub(crate) fn cancel_token(&self, id: &DeploymentId) -> CancelToken {
        CancelToken::new(self.store.clone(), id.clone())
    }

    pub(crate) async fn load_service(&self, id: &ServiceId) -> Result<Service, DeployError> {
        self.store
            .service(id)
            .await?
            .ok_or_else(|| DeployError::ServiceNotFound(id.clone()))
    }

    pub(crate) async fn load_deployment(&self, id: &DeploymentId) -> Result<Deployment, DeployError> {
        self.store
            .deployment(id)
            .await?
            .ok_or_else(|| DeployError::DeploymentNotFound(id.clone()))
    }
}
