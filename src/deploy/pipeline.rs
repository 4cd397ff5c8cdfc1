// ABOUTME: Deployment pipeline generic over its state marker.
// ABOUTME: Holds the deployment row, the effective service values and shared handles.

use std::sync::Arc;

use super::DeployError;
use super::cancel::CancelToken;
use super::context::Core;
use crate::model::{Deployment, DeploymentStatus, DeploymentUpdate, Service};
use crate::types::DeploymentId;

/// A deployment moving through its steps.
///
/// `S` is one of the markers in `deploy::state`; each step consumes the
/// pipeline and returns it in the next state, so steps run in order.
///
/// Publishing before the health check does not compile:
///
/// ```compile_fail
/// use slipway::deploy::{Pending, Pipeline};
///
/// async fn publish_early(pipeline: Pipeline<Pending>) {
///     let _ = pipeline.publish().await;
/// }
/// ```
pub struct Pipeline<S> {
    pub(crate) core: Arc<Core>,
    pub(crate) deployment: Deployment,
    /// Service values for this run, after repository overrides.
    pub(crate) service: Service,
    pub(crate) cancel: CancelToken,
    pub(crate) state: S,
}

impl<S> std::fmt::Debug for Pipeline<S>
where
    S: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("deployment", &self.deployment.id)
            .field("service", &self.service.id)
            .field("state", &self.state)
            .finish()
    }
}

impl<S> Pipeline<S> {
    pub fn id(&self) -> &DeploymentId {
        &self.deployment.id
    }

    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub(crate) fn transition<T>(self, state: T) -> Pipeline<T> {
        Pipeline {
            core: self.core,
            deployment: self.deployment,
            service: self.service,
            cancel: self.cancel,
            state,
        }
    }

    pub(crate) async fn log(&self, line: impl AsRef<str>) {
        self.core.log(&self.deployment.id, line).await;
    }

    /// Conditional status move. Losing the race means a newer deployment
    /// cancelled this one.
    pub(crate) async fn advance(
        &mut self,
        from: &[DeploymentStatus],
        to: DeploymentStatus,
    ) -> Result<(), DeployError> {
        let applied = self
            .core
            .store
            .transition(&self.deployment.id, from, to, DeploymentUpdate::default())
            .await?;
        if !applied {
            self.cancel.check().await?;
            let current = self.core.load_deployment(&self.deployment.id).await?.status;
            return Err(DeployError::Internal(format!(
                "cannot move deployment from {current} to {to}"
            )));
        }
        self.deployment.status = to;
        Ok(())
    }

    /// Persist `update` and mirror it on the in-memory row.
    pub(crate) async fn record(&mut self, update: DeploymentUpdate) -> Result<(), DeployError> {
        self.core
            .store
            .update_deployment(&self.deployment.id, update.clone())
            .await?;
        update.apply(&mut self.deployment);
        Ok(())
    }
}
