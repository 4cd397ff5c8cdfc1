// ABOUTME: Cooperative cancellation by polling the deployment's stored status.
// ABOUTME: Pipelines check before every side-effecting step.

use std::sync::Arc;

use super::DeployError;
use crate::model::DeploymentStatus;
use crate::store::Store;
use crate::types::DeploymentId;

#[derive(Clone)]
pub struct CancelToken {
    store: Arc<dyn Store>,
    id: DeploymentId,
}

impl CancelToken {
    pub(crate) fn new(store: Arc<dyn Store>, id: DeploymentId) -> Self {
        Self { store, id }
    }

    pub async fn is_cancelled(&self) -> Result<bool, DeployError> {
        let status = self
            .store
            .deployment(&self.id)
            .await?
            .map(|d| d.status)
            .ok_or_else(|| DeployError::DeploymentNotFound(self.id.clone()))?;
        Ok(status == DeploymentStatus::Cancelled)
    }

    /// `Err(Cancelled)` once a newer deployment has superseded this one.
    pub async fn check(&self) -> Result<(), DeployError> {
        if self.is_cancelled().await? {
            return Err(DeployError::Cancelled(self.id.clone()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken").field("id", &self.id).finish()
    }
}
