// ABOUTME: Runs each pipeline as its own task and settles its final status.
// ABOUTME: Errors and panics end in `failed`, cancellations keep `cancelled`.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::context::Core;
use super::error::{DeployError, DeployErrorKind};
use super::pipeline::Pipeline;
use super::replicas::stop_replicas;
use super::state::{ArtifactReady, Pending};
use super::transitions::report_to_source;
use crate::integrations::CommitState;
use crate::model::{Deployment, DeploymentStatus, DeploymentUpdate, ReplicaStatus, Service};
use crate::types::{DeploymentId, ImageRef};

/// How a pipeline ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub deployment_id: DeploymentId,
    pub status: DeploymentStatus,
    pub error: Option<String>,
    pub kind: Option<DeployErrorKind>,
}

impl PipelineOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == DeploymentStatus::Running && self.error.is_none()
    }
}

pub(crate) enum Start {
    Fresh,
    Rollback { image: ImageRef },
}

/// Spawn the pipeline for an inserted deployment row.
pub(crate) fn spawn(core: Arc<Core>, deployment: Deployment, service: Service, start: Start) {
    let id = deployment.id.clone();
    let (tx, rx) = watch::channel(None);
    core.outcomes.lock().insert(id.clone(), rx);

    let task = tokio::spawn(drive(core.clone(), deployment, service.clone(), start));

    tokio::spawn(async move {
        let failure = match task.await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(join) => {
                let reason = if join.is_panic() {
                    "pipeline task panicked"
                } else {
                    "pipeline task was aborted"
                };
                error!(deployment_id = %id, "{reason}");
                Some(DeployError::Internal(reason.to_string()))
            }
        };

        if let Some(e) = &failure {
            settle_failure(&core, &id, &service, e).await;
        }

        let row = core.store.deployment(&id).await.ok().flatten();
        let status = row.as_ref().map_or(DeploymentStatus::Failed, |d| d.status);
        let outcome = PipelineOutcome {
            deployment_id: id.clone(),
            status,
            error: failure.as_ref().map(ToString::to_string),
            kind: failure.as_ref().map(DeployError::kind),
        };
        info!(deployment_id = %id, status = %outcome.status, "pipeline finished");

        tx.send_replace(Some(outcome));
        core.outcomes.lock().remove(&id);
    });
}

async fn drive(
    core: Arc<Core>,
    deployment: Deployment,
    service: Service,
    start: Start,
) -> Result<(), DeployError> {
    let ready = match start {
        Start::Fresh => {
            Pipeline::<Pending>::new(core, deployment, service)
                .acquire_artifact()
                .await?
        }
        Start::Rollback { image } => {
            Pipeline::<ArtifactReady>::for_rollback(core, deployment, service, image)
        }
    };

    let started = ready.provision().await?.start_replicas().await?;

    let healthy = match started.health_check().await {
        Ok(healthy) => healthy,
        Err((failed, e)) => {
            failed.teardown(replica_status_for(&e)).await;
            return Err(e);
        }
    };

    let published = match healthy.publish().await {
        Ok(published) => published,
        Err((failed, e)) => {
            failed.teardown(replica_status_for(&e)).await;
            return Err(e);
        }
    };

    published.finish().await;
    Ok(())
}

fn replica_status_for(error: &DeployError) -> ReplicaStatus {
    if error.is_cancelled() {
        ReplicaStatus::Stopped
    } else {
        ReplicaStatus::Failed
    }
}

/// Single exit for failed pipelines.
///
/// Only an in-progress row becomes `failed`; a row already cancelled or
/// running keeps its status.
async fn settle_failure(core: &Core, id: &DeploymentId, service: &Service, failure: &DeployError) {
    stop_replicas(core, id, replica_status_for(failure), service.stop_timeout).await;

    if failure.is_cancelled() {
        core.log(id, "Cancelled: superseded by a newer deployment")
            .await;
        return;
    }

    let message = failure.to_string();
    let update = DeploymentUpdate {
        error_message: Some(message.clone()),
        finished_at: Some(Utc::now()),
        ..Default::default()
    };
    let applied = match core
        .store
        .transition(
            id,
            &DeploymentStatus::IN_PROGRESS,
            DeploymentStatus::Failed,
            update,
        )
        .await
    {
        Ok(applied) => applied,
        Err(e) => {
            error!(deployment_id = %id, error = %e, "could not record failure");
            return;
        }
    };
    if !applied {
        warn!(deployment_id = %id, error = %message, "pipeline error after deployment left progress states");
        return;
    }

    core.log(id, format!("Deployment failed [{}]: {message}", failure.kind()))
        .await;
    if let Ok(Some(row)) = core.store.deployment(id).await {
        report_to_source(core, &row, service, CommitState::Failure, &message).await;
    }
}
