// ABOUTME: State transition methods for the deployment pipeline.
// ABOUTME: Each method consumes self and returns the next state on success.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::context::Core;
use super::cutover::cut_over;
use super::error::DeployError;
use super::pipeline::Pipeline;
use super::provision::{LABEL_MANAGED, LABEL_SERVICE, provision};
use super::replicas::{health_check_replicas, start_replicas, stop_replicas};
use super::state::{ArtifactReady, Healthy, Pending, Provisioned, Published, ReplicasStarted};
use crate::engine::EngineError;
use crate::integrations::{
    Checkout, CheckoutRequest, CommitState, PullRequestComment, StatusReport,
};
use crate::model::{
    Deployment, DeploymentStatus, DeploymentUpdate, ReplicaStatus, Service, ServiceSource,
};
use crate::runtime::{BuildRequest, ImageError};
use crate::types::{DeploymentId, ImageRef};

/// Result type for transitions whose failure leaves containers to clean up.
pub type TransitionResult<T, S> = Result<Pipeline<T>, (Pipeline<S>, DeployError)>;

// =============================================================================
// Pending -> ArtifactReady
// =============================================================================

impl Pipeline<Pending> {
    pub(crate) fn new(core: Arc<Core>, deployment: Deployment, service: Service) -> Self {
        let cancel = core.cancel_token(&deployment.id);
        Pipeline {
            core,
            deployment,
            service,
            cancel,
            state: Pending,
        }
    }

    /// Pull the configured image, or clone and build the repository.
    pub async fn acquire_artifact(self) -> Result<Pipeline<ArtifactReady>, DeployError> {
        self.cancel.check().await?;
        match self.service.source.clone() {
            ServiceSource::Image { image } => self.pull(&image).await,
            ServiceSource::Repository {
                url,
                branch,
                installation,
                ..
            } => {
                self.clone_and_build(&url, &branch, installation.as_deref())
                    .await
            }
        }
    }

    async fn pull(mut self, image: &str) -> Result<Pipeline<ArtifactReady>, DeployError> {
        let image = ImageRef::parse(image).map_err(|e| DeployError::InvalidService {
            service: self.service.id.clone(),
            reason: e.to_string(),
        })?;
        self.advance(&[DeploymentStatus::Pending], DeploymentStatus::Pulling)
            .await?;

        let auth = self
            .core
            .collaborators
            .registries
            .credentials_for(image.registry_host());
        if auth.is_some() {
            self.log(format!("Using credentials for {}", image.registry_host()))
                .await;
        }
        self.log(format!("Pulling {image}")).await;

        let retries = Mutex::new(Vec::new());
        let result = self
            .core
            .engine
            .pull_with_retry(&image, auth.as_ref(), &|line| retries.lock().push(line))
            .await;
        for line in retries.into_inner() {
            self.log(line).await;
        }
        let report = result?;
        self.log(format!("Pulled {image} ({} attempt(s))", report.attempts))
            .await;

        let tag = image.tag().unwrap_or("latest").to_string();
        self.record(DeploymentUpdate {
            image_name: Some(image.to_string()),
            commit_sha: self.deployment.commit_sha.is_none().then_some(tag),
            ..Default::default()
        })
        .await?;

        self.cancel.check().await?;
        Ok(self.transition(ArtifactReady { image }))
    }

    async fn clone_and_build(
        mut self,
        url: &str,
        branch: &str,
        installation: Option<&str>,
    ) -> Result<Pipeline<ArtifactReady>, DeployError> {
        self.advance(&[DeploymentStatus::Pending], DeploymentStatus::Cloning)
            .await?;
        let source = self.core.collaborators.source.clone();

        let token = match installation {
            Some(installation) => source.clone_token(installation).await?,
            None => None,
        };
        let dest = self
            .core
            .settings
            .builds_dir()
            .join(self.deployment.id.as_str());
        self.log(format!("Cloning {url} ({branch})")).await;
        let checkout = source
            .checkout(&CheckoutRequest {
                url: url.to_string(),
                branch: branch.to_string(),
                commit: self.deployment.commit_sha.clone(),
                token,
                dest: dest.clone(),
            })
            .await?;
        self.log(format!("Checked out {}", checkout.short_sha()))
            .await;

        let result = self.build_checkout(&checkout, branch).await;
        if let Err(e) = tokio::fs::remove_dir_all(&dest).await {
            warn!(deployment_id = %self.deployment.id, error = %e, "failed to remove checkout");
        }
        let image = result?;

        self.cancel.check().await?;
        Ok(self.transition(ArtifactReady { image }))
    }

    async fn build_checkout(
        &mut self,
        checkout: &Checkout,
        branch: &str,
    ) -> Result<ImageRef, DeployError> {
        self.record(DeploymentUpdate {
            git_commit_sha: Some(checkout.commit_sha.clone()),
            git_branch: Some(branch.to_string()),
            commit_sha: Some(checkout.short_sha().to_string()),
            commit_message: checkout.commit_message.clone(),
            ..Default::default()
        })
        .await?;
        report_to_source(
            &self.core,
            &self.deployment,
            &self.service,
            CommitState::Pending,
            "Deploying",
        )
        .await;

        let override_err = |service: &Service, e: crate::error::Error| DeployError::InvalidService {
            service: service.id.clone(),
            reason: format!("repository override: {e}"),
        };
        let overrides = self
            .core
            .collaborators
            .overrides
            .load(&checkout.dir)
            .await
            .map_err(|e| override_err(&self.service, e))?;
        if let Some(overrides) = overrides {
            if let Err(e) = overrides.apply(&mut self.service) {
                return Err(override_err(&self.service, e));
            }
            self.log("Applied repository overrides").await;
        }

        self.record(DeploymentUpdate {
            container_port: Some(self.service.container_port),
            health_check_path: self.service.health_check.path.clone(),
            health_check_timeout: Some(self.service.health_check.timeout),
            replica_count: Some(self.service.replicas),
            ..Default::default()
        })
        .await?;

        self.cancel.check().await?;
        self.advance(&[DeploymentStatus::Cloning], DeploymentStatus::Building)
            .await?;

        let ServiceSource::Repository {
            dockerfile,
            context,
            ..
        } = &self.service.source
        else {
            return Err(DeployError::Internal(
                "build requested for an image service".to_string(),
            ));
        };
        let tag = ImageRef::local(
            &format!("slipway/{}", self.service.id),
            checkout.short_sha(),
        );
        let request = BuildRequest {
            context_dir: checkout.dir.join(context),
            dockerfile: dockerfile.clone(),
            tag: tag.clone(),
            build_args: HashMap::from([(
                "SLIPWAY_COMMIT_SHA".to_string(),
                checkout.commit_sha.clone(),
            )]),
            labels: HashMap::from([
                (LABEL_MANAGED.to_string(), "true".to_string()),
                (LABEL_SERVICE.to_string(), self.service.id.to_string()),
            ]),
        };
        self.log(format!("Building {tag}")).await;

        match self.core.engine.build(&request).await {
            Ok(output) => {
                for line in output.log {
                    self.log(line).await;
                }
            }
            Err(e) => {
                if let EngineError::Build {
                    source: ImageError::BuildFailed { log, .. },
                } = &e
                {
                    for line in log {
                        self.log(line).await;
                    }
                }
                return Err(e.into());
            }
        }

        self.record(DeploymentUpdate {
            image_name: Some(tag.to_string()),
            ..Default::default()
        })
        .await?;
        Ok(tag)
    }
}

// =============================================================================
// ArtifactReady -> Provisioned
// =============================================================================

impl Pipeline<ArtifactReady> {
    /// Start a rollback from an image that is already on the host.
    pub(crate) fn for_rollback(
        core: Arc<Core>,
        deployment: Deployment,
        service: Service,
        image: ImageRef,
    ) -> Self {
        Pipeline::new(core, deployment, service).transition(ArtifactReady { image })
    }

    pub async fn provision(mut self) -> Result<Pipeline<Provisioned>, DeployError> {
        self.cancel.check().await?;
        self.advance(
            &[
                DeploymentStatus::Pending,
                DeploymentStatus::Pulling,
                DeploymentStatus::Building,
            ],
            DeploymentStatus::Deploying,
        )
        .await?;

        let (template, env) = provision(
            &self.core,
            &self.deployment,
            &self.service,
            &self.state.image,
        )
        .await?;
        self.record(DeploymentUpdate {
            env_vars_snapshot: Some(env),
            ..Default::default()
        })
        .await?;
        self.log(format!(
            "Provisioned network {} for {} replica(s)",
            self.service.network, template.count
        ))
        .await;

        Ok(self.transition(Provisioned { template }))
    }
}

// =============================================================================
// Provisioned -> ReplicasStarted
// =============================================================================

impl Pipeline<Provisioned> {
    /// Start all replicas. On failure the started ones are already stopped.
    pub async fn start_replicas(self) -> Result<Pipeline<ReplicasStarted>, DeployError> {
        let replicas = start_replicas(
            &self.core,
            &self.deployment,
            &self.service,
            &self.state.template,
            &self.cancel,
        )
        .await?;
        let template = self.state.template.clone();
        Ok(self.transition(ReplicasStarted { template, replicas }))
    }
}

// =============================================================================
// ReplicasStarted -> Healthy
// =============================================================================

impl Pipeline<ReplicasStarted> {
    /// Probe every replica concurrently within the health budget.
    ///
    /// # Errors
    ///
    /// Returns `(self, error)` so the caller can tear the replicas down.
    pub async fn health_check(self) -> TransitionResult<Healthy, ReplicasStarted> {
        if let Err(e) = self.cancel.check().await {
            return Err((self, e));
        }
        let result = health_check_replicas(
            &self.core,
            &self.deployment.id,
            &self.state.replicas,
            &self.state.template,
        )
        .await;

        match result {
            Ok(()) => {
                let replicas = self.state.replicas.clone();
                Ok(self.transition(Healthy { replicas }))
            }
            Err(e) => {
                // Replicas stopped by a newer deploy look unhealthy too.
                let error = match self.cancel.check().await {
                    Err(cancelled) => cancelled,
                    Ok(()) => e,
                };
                Err((self, error))
            }
        }
    }

    pub async fn teardown(self, status: ReplicaStatus) {
        let grace = self.state.template.stop_timeout;
        teardown(&self.core, &self.deployment.id, status, grace).await;
    }
}

// =============================================================================
// Healthy -> Published
// =============================================================================

impl Pipeline<Healthy> {
    /// Mark running and make this the service's current deployment.
    ///
    /// # Errors
    ///
    /// Returns `(self, Cancelled)` when a newer deployment won the race.
    pub async fn publish(mut self) -> TransitionResult<Published, Healthy> {
        let published = self
            .core
            .store
            .publish(&self.deployment.id, &self.service.id)
            .await;
        match published {
            Ok(true) => {}
            Ok(false) => {
                let id = self.deployment.id.clone();
                return Err((self, DeployError::Cancelled(id)));
            }
            Err(e) => return Err((self, e.into())),
        }

        self.deployment.status = DeploymentStatus::Running;
        self.deployment.finished_at = Some(Utc::now());
        self.service.current_deployment_id = Some(self.deployment.id.clone());
        self.log(format!(
            "Deployment is live with {} replica(s)",
            self.state.replicas.len()
        ))
        .await;

        let replicas = self.state.replicas.clone();
        Ok(self.transition(Published { replicas }))
    }

    pub async fn teardown(self, status: ReplicaStatus) {
        teardown(
            &self.core,
            &self.deployment.id,
            status,
            self.service.stop_timeout,
        )
        .await;
    }
}

// =============================================================================
// Published -> done
// =============================================================================

impl Pipeline<Published> {
    /// Report, refresh eligibility, sync routes and drain what this replaced.
    /// Nothing here can fail the deployment.
    pub async fn finish(self) -> DeploymentId {
        report_to_source(
            &self.core,
            &self.deployment,
            &self.service,
            CommitState::Success,
            "Deployed",
        )
        .await;
        cut_over(&self.core, &self.deployment, &self.service).await;
        self.deployment.id
    }
}

async fn teardown(core: &Core, id: &DeploymentId, status: ReplicaStatus, grace: Duration) {
    let stopped = stop_replicas(core, id, status, grace).await;
    if stopped > 0 {
        core.log(id, format!("Stopped {stopped} replica(s)")).await;
    }
}

/// Commit status, and for final states the pull request comment, of a
/// repository-backed deployment. Image deploys have no commit to report on.
pub(crate) async fn report_to_source(
    core: &Core,
    deployment: &Deployment,
    service: &Service,
    state: CommitState,
    description: &str,
) {
    let ServiceSource::Repository { url, .. } = &service.source else {
        return;
    };
    let Some(commit_sha) = &deployment.git_commit_sha else {
        return;
    };
    let source = &core.collaborators.source;
    let report = StatusReport {
        repository: url.clone(),
        commit_sha: commit_sha.clone(),
        deployment_id: deployment.id.clone(),
        state,
        description: description.to_string(),
    };
    if let Err(e) = source.report_status(&report).await {
        warn!(deployment_id = %deployment.id, error = %e, "commit status report failed");
    }

    if state == CommitState::Pending {
        return;
    }
    let Some(branch) = &deployment.git_branch else {
        return;
    };
    let short = deployment.commit_sha.as_deref().unwrap_or(commit_sha);
    let body = match state {
        CommitState::Success => format!(
            "Deployed `{short}` to {} as deployment {}.",
            service.name, deployment.id
        ),
        _ => format!(
            "Deployment {} of `{short}` to {} failed: {description}",
            deployment.id, service.name
        ),
    };
    let comment = PullRequestComment {
        repository: url.clone(),
        branch: branch.clone(),
        commit_sha: commit_sha.clone(),
        deployment_id: deployment.id.clone(),
        state,
        body,
    };
    if let Err(e) = source.comment_on_pull_request(&comment).await {
        warn!(deployment_id = %deployment.id, error = %e, "pull request comment failed");
    }
}
