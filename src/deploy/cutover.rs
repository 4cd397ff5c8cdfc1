// ABOUTME: Post-publish work: eligibility, route sync, drain of superseded deployments.
// ABOUTME: Old replicas stop only after the new deployment is running; failures here are logged.

use chrono::Utc;
use tracing::warn;

use super::context::Core;
use super::eligibility::refresh_rollback_eligibility;
use super::orphans::sweep_orphans;
use super::replicas::stop_replicas;
use crate::integrations::Route;
use crate::model::{Deployment, DeploymentStatus, DeploymentUpdate, ReplicaStatus, Service};
use crate::store::StoreResult;
use crate::types::DeploymentId;

/// Routes for every service with domains, pointing at its current
/// deployment's running replicas.
pub(crate) async fn build_routes(core: &Core) -> StoreResult<Vec<Route>> {
    let mut routes = Vec::new();
    for service in core.store.services().await? {
        if service.domains.is_empty() {
            continue;
        }
        let Some(current) = &service.current_deployment_id else {
            continue;
        };
        let upstreams: Vec<u16> = core
            .store
            .replicas(current)
            .await?
            .into_iter()
            .filter(|r| r.status == ReplicaStatus::Running)
            .filter_map(|r| r.host_port)
            .collect();
        if upstreams.is_empty() {
            continue;
        }
        for domain in &service.domains {
            routes.push(Route {
                domain: domain.clone(),
                service_id: service.id.clone(),
                upstreams: upstreams.clone(),
            });
        }
    }
    Ok(routes)
}

pub(crate) async fn sync_routes(core: &Core) {
    let routes = match build_routes(core).await {
        Ok(routes) => routes,
        Err(e) => {
            warn!(error = %e, "could not compute routes");
            return;
        }
    };
    if let Err(e) = core.collaborators.router.sync(&routes).await {
        warn!(error = %e, "route sync failed");
    }
}

/// Everything after `publish`. Never changes the new deployment's status.
pub(crate) async fn cut_over(core: &Core, deployment: &Deployment, service: &Service) {
    let id = &deployment.id;

    if let Err(e) = refresh_rollback_eligibility(core.store.as_ref(), service).await {
        warn!(deployment_id = %id, error = %e, "rollback eligibility refresh failed");
    }

    sync_routes(core).await;

    if let Some(delay) = service.drain_delay
        && !delay.is_zero()
    {
        core.log(id, format!("Draining previous deployment in {}s", delay.as_secs()))
            .await;
        tokio::time::sleep(delay).await;
    }

    match core.store.deployment(id).await {
        Ok(Some(current)) if current.status == DeploymentStatus::Running => {}
        Ok(_) => {
            core.log(id, "No longer running, skipping drain").await;
            return;
        }
        Err(e) => {
            warn!(deployment_id = %id, error = %e, "could not re-read deployment, skipping drain");
            return;
        }
    }

    let superseded = match superseded_by(core, deployment).await {
        Ok(superseded) => superseded,
        Err(e) => {
            warn!(deployment_id = %id, error = %e, "could not list superseded deployments");
            return;
        }
    };
    for old in &superseded {
        drain(core, old, service, id).await;
    }
    if !superseded.is_empty()
        && let Err(e) = refresh_rollback_eligibility(core.store.as_ref(), service).await
    {
        warn!(deployment_id = %id, error = %e, "rollback eligibility refresh after drain failed");
    }

    match sweep_orphans(core, service, id, service.stop_timeout).await {
        Ok(0) => {}
        Ok(n) => core.log(id, format!("Removed {n} orphaned container(s)")).await,
        Err(e) => warn!(deployment_id = %id, error = %e, "orphan sweep failed"),
    }
}

/// Running deployments of the service older than `deployment`.
async fn superseded_by(core: &Core, deployment: &Deployment) -> StoreResult<Vec<Deployment>> {
    let running = core
        .store
        .deployments_for_service(&deployment.service_id, &[DeploymentStatus::Running])
        .await?;
    // Newest first: everything after our own row is older.
    Ok(running
        .into_iter()
        .skip_while(|d| d.id != deployment.id)
        .skip(1)
        .collect())
}

/// Stop the old deployment's replicas, verify, then mark it stopped.
async fn drain(core: &Core, old: &Deployment, service: &Service, by: &DeploymentId) {
    core.log(&old.id, format!("Draining: superseded by deployment {by}"))
        .await;
    stop_replicas(core, &old.id, ReplicaStatus::Stopped, service.stop_timeout).await;

    if let Some(container) = &old.container_id {
        // Rows written before replicas existed only carry the container id.
        if let Err(e) = core.engine.stop_gracefully(container, service.stop_timeout).await {
            warn!(deployment_id = %old.id, error = %e, "failed to stop container");
        }
    }

    let still_live = match live_replica_count(core, old).await {
        Ok(n) => n,
        Err(e) => {
            warn!(deployment_id = %old.id, error = %e, "could not verify drain");
            return;
        }
    };
    if still_live > 0 {
        core.log(
            &old.id,
            format!("{still_live} replica(s) still running after drain, leaving status as running"),
        )
        .await;
        return;
    }

    let update = DeploymentUpdate {
        finished_at: Some(Utc::now()),
        ..Default::default()
    };
    match core
        .store
        .transition(
            &old.id,
            &[DeploymentStatus::Running],
            DeploymentStatus::Stopped,
            update,
        )
        .await
    {
        Ok(true) => {
            if let Err(e) = core
                .store
                .clear_current_deployment_if(&service.id, &old.id)
                .await
            {
                warn!(deployment_id = %old.id, error = %e, "failed to clear current deployment pointer");
            }
            core.log(by, format!("Stopped previous deployment {}", old.id))
                .await;
        }
        Ok(false) => {}
        Err(e) => warn!(deployment_id = %old.id, error = %e, "failed to mark deployment stopped"),
    }
}

async fn live_replica_count(core: &Core, deployment: &Deployment) -> Result<usize, String> {
    let replicas = core
        .store
        .replicas(&deployment.id)
        .await
        .map_err(|e| e.to_string())?;
    let mut containers: Vec<_> = replicas.into_iter().filter_map(|r| r.container_id).collect();
    if let Some(container) = &deployment.container_id
        && !containers.contains(container)
    {
        containers.push(container.clone());
    }

    let mut live = 0;
    for container in &containers {
        if core.engine.is_live(container).await.map_err(|e| e.to_string())? {
            live += 1;
        }
    }
    Ok(live)
}
