// ABOUTME: Public entry points: deploy, rollback and runtime-status reconcile.
// ABOUTME: Validates synchronously, inserts rows under the service lock, spawns pipelines.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::context::{ControllerSettings, Core};
use super::cutover::sync_routes;
use super::eligibility::refresh_rollback_eligibility;
use super::error::DeployError;
use super::lock::ServiceLocks;
use super::replicas::stop_replicas;
use super::supervisor::{PipelineOutcome, Start, spawn};
use crate::engine::Engine;
use crate::integrations::Collaborators;
use crate::model::{
    Deployment, DeploymentStatus, DeploymentUpdate, NewDeployment, ReplicaStatus, Service,
    ServiceSource, Trigger,
};
use crate::store::Store;
use crate::types::{DeploymentId, ImageRef, ServiceId};

/// Options for a new deployment.
#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub commit_sha: Option<String>,
    pub commit_message: Option<String>,
    pub trigger: Trigger,
    pub triggered_by: Option<String>,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            commit_sha: None,
            commit_message: None,
            trigger: Trigger::Manual,
            triggered_by: None,
        }
    }
}

/// Orchestrates deployments for every service in the store.
///
/// Cheap to clone; all clones share the same locks and outcome registry.
#[derive(Clone)]
pub struct Controller {
    core: Arc<Core>,
}

impl Controller {
    pub fn new(
        store: Arc<dyn Store>,
        engine: Arc<Engine>,
        collaborators: Collaborators,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            core: Arc::new(Core {
                store,
                engine,
                locks: match &settings.lock_dir {
                    Some(dir) => ServiceLocks::with_lock_dir(dir),
                    None => ServiceLocks::new(),
                },
                collaborators,
                settings,
                outcomes: Default::default(),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.core.store
    }

    pub fn locks(&self) -> &ServiceLocks {
        &self.core.locks
    }

    pub async fn deployment(&self, id: &DeploymentId) -> Result<Deployment, DeployError> {
        self.core.load_deployment(id).await
    }

    pub async fn deployments(&self, service: &ServiceId) -> Result<Vec<Deployment>, DeployError> {
        self.core.load_service(service).await?;
        Ok(self.core.store.deployments_for_service(service, &[]).await?)
    }

    /// Start a deployment of `service_id`. Returns as soon as the row exists;
    /// the pipeline continues in the background.
    pub async fn deploy(
        &self,
        service_id: &ServiceId,
        options: DeployOptions,
    ) -> Result<DeploymentId, DeployError> {
        let service = self.core.load_service(service_id).await?;
        self.ensure_scope(&service).await?;
        validate_source(&service)?;

        let new = NewDeployment {
            service_id: service.id.clone(),
            environment_id: service.environment_id.clone(),
            commit_sha: options.commit_sha,
            commit_message: options.commit_message,
            image_name: None,
            container_port: service.container_port,
            health_check_path: service.health_check.path.clone(),
            health_check_timeout: service.health_check.timeout,
            env_vars_snapshot: Default::default(),
            volumes_snapshot: service.volumes.clone(),
            replica_count: service.replicas,
            rollback_source_id: None,
            trigger: options.trigger,
            triggered_by: options.triggered_by,
        };

        let deployment = self.insert_superseding(&service, new).await?;
        info!(deployment_id = %deployment.id, service = %service.id, trigger = %deployment.trigger, "deployment created");
        spawn(self.core.clone(), deployment.clone(), service, Start::Fresh);
        Ok(deployment.id)
    }

    /// Redeploy the image of an earlier deployment.
    ///
    /// Every guard runs before any container operation.
    pub async fn rollback(
        &self,
        target_id: &DeploymentId,
        triggered_by: Option<String>,
    ) -> Result<DeploymentId, DeployError> {
        let target = self.core.load_deployment(target_id).await?;
        let service = self.core.load_service(&target.service_id).await?;
        self.ensure_scope(&service).await?;

        if service.has_volumes() {
            return Err(DeployError::RollbackWithVolumes(service.id.clone()));
        }
        let image_name = target
            .image_name
            .clone()
            .ok_or_else(|| DeployError::NoRollbackImage(target.id.clone()))?;
        let image = ImageRef::parse(&image_name).map_err(|e| DeployError::InvalidService {
            service: service.id.clone(),
            reason: format!("recorded image {image_name}: {e}"),
        })?;
        if !self.core.engine.image_exists(&image).await? {
            return Err(DeployError::ImageGone(image_name));
        }

        let new = NewDeployment {
            service_id: service.id.clone(),
            environment_id: service.environment_id.clone(),
            commit_sha: target.commit_sha.clone(),
            commit_message: target.commit_message.clone(),
            image_name: Some(image_name),
            container_port: target.container_port,
            health_check_path: target.health_check_path.clone(),
            health_check_timeout: target.health_check_timeout,
            env_vars_snapshot: target.env_vars_snapshot.clone(),
            volumes_snapshot: Vec::new(),
            replica_count: target.replica_count,
            rollback_source_id: Some(target.id.clone()),
            trigger: Trigger::Rollback,
            triggered_by,
        };

        let deployment = self.insert_superseding(&service, new).await?;
        self.core
            .log(&deployment.id, format!("Rolling back to deployment {}", target.id))
            .await;
        spawn(
            self.core.clone(),
            deployment.clone(),
            service,
            Start::Rollback { image },
        );
        Ok(deployment.id)
    }

    /// Wait for the pipeline of `id` to finish.
    ///
    /// Deployments without a live pipeline in this process resolve from the
    /// stored row.
    pub async fn wait(&self, id: &DeploymentId) -> Result<PipelineOutcome, DeployError> {
        let receiver = self.core.outcomes.lock().get(id).cloned();
        if let Some(mut receiver) = receiver {
            match receiver.wait_for(Option::is_some).await {
                Ok(outcome) => {
                    if let Some(outcome) = outcome.clone() {
                        return Ok(outcome);
                    }
                }
                Err(_) => debug!(deployment_id = %id, "outcome channel closed, reading store"),
            }
        }

        let deployment = self.core.load_deployment(id).await?;
        Ok(PipelineOutcome {
            deployment_id: deployment.id,
            status: deployment.status,
            error: deployment.error_message,
            kind: None,
        })
    }

    /// Flip a `running` deployment to `stopped` when none of its containers
    /// are live any more. Returns whether the row changed.
    pub async fn reconcile_runtime_status(&self, id: &DeploymentId) -> Result<bool, DeployError> {
        let deployment = self.core.load_deployment(id).await?;
        if deployment.status != DeploymentStatus::Running {
            return Ok(false);
        }

        let replicas = self.core.store.replicas(id).await?;
        let mut containers: Vec<_> = replicas.iter().filter_map(|r| r.container_id.clone()).collect();
        if let Some(container) = &deployment.container_id
            && !containers.contains(container)
        {
            containers.push(container.clone());
        }
        for container in &containers {
            if self.core.engine.is_live(container).await? {
                return Ok(false);
            }
        }

        let update = DeploymentUpdate {
            finished_at: Some(Utc::now()),
            ..Default::default()
        };
        let applied = self
            .core
            .store
            .transition(
                id,
                &[DeploymentStatus::Running],
                DeploymentStatus::Stopped,
                update,
            )
            .await?;
        if !applied {
            return Ok(false);
        }

        for mut replica in replicas {
            if replica.status == ReplicaStatus::Running {
                replica.status = ReplicaStatus::Stopped;
                self.core.store.update_replica(&replica).await?;
            }
        }
        let cleared = self
            .core
            .store
            .clear_current_deployment_if(&deployment.service_id, id)
            .await?;
        self.core
            .log(id, "Container no longer running, marked stopped")
            .await;
        info!(deployment_id = %id, cleared_current = cleared, "reconciled stale running deployment");
        if let Ok(Some(service)) = self.core.store.service(&deployment.service_id).await
            && let Err(e) = refresh_rollback_eligibility(self.core.store.as_ref(), &service).await
        {
            warn!(deployment_id = %id, error = %e, "rollback eligibility refresh failed");
        }
        if cleared {
            sync_routes(&self.core).await;
        }
        Ok(true)
    }

    /// Reconcile every `running` deployment of one service.
    pub async fn reconcile_service(&self, service: &ServiceId) -> Result<usize, DeployError> {
        let running = self
            .core
            .store
            .deployments_for_service(service, &[DeploymentStatus::Running])
            .await?;
        let mut changed = 0;
        for deployment in running {
            if self.reconcile_runtime_status(&deployment.id).await? {
                changed += 1;
            }
        }
        Ok(changed)
    }

    pub async fn reconcile_all(&self) -> Result<usize, DeployError> {
        let mut changed = 0;
        for service in self.core.store.services().await? {
            changed += self.reconcile_service(&service.id).await?;
        }
        Ok(changed)
    }

    async fn ensure_scope(&self, service: &Service) -> Result<(), DeployError> {
        if self.core.store.project(&service.project_id).await?.is_none() {
            return Err(DeployError::missing("project", &service.project_id));
        }
        if self
            .core
            .store
            .environment(&service.environment_id)
            .await?
            .is_none()
        {
            return Err(DeployError::missing("environment", &service.environment_id));
        }
        Ok(())
    }

    /// Cancel everything in progress for the service, then insert the new
    /// row, as one critical section.
    async fn insert_superseding(
        &self,
        service: &Service,
        new: NewDeployment,
    ) -> Result<Deployment, DeployError> {
        let core = &self.core;
        let (deployment, cancelled) = core
            .locks
            .with_lock(service.id.as_str(), async {
                let active = core
                    .store
                    .deployments_for_service(&service.id, &DeploymentStatus::IN_PROGRESS)
                    .await?;
                let mut cancelled = Vec::new();
                for old in active {
                    let update = DeploymentUpdate {
                        finished_at: Some(Utc::now()),
                        ..Default::default()
                    };
                    if core
                        .store
                        .transition(
                            &old.id,
                            &DeploymentStatus::IN_PROGRESS,
                            DeploymentStatus::Cancelled,
                            update,
                        )
                        .await?
                    {
                        core.log(&old.id, "Cancelled: a newer deployment was requested")
                            .await;
                        cancelled.push(old.id);
                    }
                }

                let deployment = new.into_deployment(DeploymentId::generate(), Utc::now());
                core.store.insert_deployment(deployment.clone()).await?;
                Ok::<_, DeployError>((deployment, cancelled))
            })
            .await??;

        if !cancelled.is_empty() {
            let core = self.core.clone();
            let grace = service.stop_timeout;
            tokio::spawn(async move {
                for id in cancelled {
                    let stopped = stop_replicas(&core, &id, ReplicaStatus::Stopped, grace).await;
                    if stopped > 0 {
                        debug!(deployment_id = %id, stopped, "stopped replicas of cancelled deployment");
                    }
                }
            });
        }
        Ok(deployment)
    }
}

fn validate_source(service: &Service) -> Result<(), DeployError> {
    let invalid = |reason: &str| DeployError::InvalidService {
        service: service.id.clone(),
        reason: reason.to_string(),
    };
    match &service.source {
        ServiceSource::Image { image } if image.trim().is_empty() => Err(invalid("image is empty")),
        ServiceSource::Repository { url, .. } if url.trim().is_empty() => {
            Err(invalid("repository url is empty"))
        }
        _ if service.replicas == 0 => Err(invalid("replicas must be at least 1")),
        _ => Ok(()),
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("state_dir", &self.core.settings.state_dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HealthCheck;
    use crate::types::{EnvironmentId, ProjectId, ServiceName};
    use std::time::Duration;

    fn service(source: ServiceSource, replicas: u32) -> Service {
        Service {
            id: ServiceId::new("shop-prod-web"),
            name: ServiceName::new("web").unwrap(),
            project_id: ProjectId::new("shop"),
            environment_id: EnvironmentId::new("shop-prod"),
            source,
            container_port: 8080,
            health_check: HealthCheck::default(),
            replicas,
            env: Default::default(),
            volumes: Vec::new(),
            resources: Default::default(),
            command: None,
            drain_delay: None,
            stop_timeout: Duration::from_secs(10),
            domains: Vec::new(),
            network: "slipway-shop-prod".into(),
            current_deployment_id: None,
        }
    }

    #[test]
    fn empty_sources_are_rejected() {
        let image = service(ServiceSource::Image { image: " ".into() }, 1);
        assert!(matches!(
            validate_source(&image),
            Err(DeployError::InvalidService { .. })
        ));

        let repo = service(
            ServiceSource::Repository {
                url: String::new(),
                branch: "main".into(),
                dockerfile: "Dockerfile".into(),
                context: ".".into(),
                installation: None,
            },
            1,
        );
        assert!(validate_source(&repo).is_err());
    }

    #[test]
    fn zero_replicas_are_rejected() {
        let svc = service(ServiceSource::Image { image: "nginx:1".into() }, 0);
        let err = validate_source(&svc).unwrap_err();
        assert!(err.to_string().contains("replicas"));
    }

    #[test]
    fn valid_image_service_passes() {
        let svc = service(ServiceSource::Image { image: "nginx:1".into() }, 2);
        assert!(validate_source(&svc).is_ok());
    }
}
