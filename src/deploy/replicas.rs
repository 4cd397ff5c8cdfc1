// ABOUTME: Replica lifecycle: start N containers, probe them together, stop them.
// ABOUTME: A failed start unwinds every replica already started for the deployment.

use futures::future::join_all;
use std::time::Duration;
use tracing::{debug, warn};

use super::DeployError;
use super::cancel::CancelToken;
use super::context::Core;
use super::provision::ReplicaTemplate;
use crate::engine::{LaunchSpec, ProbeTarget};
use crate::model::{Deployment, DeploymentUpdate, Replica, ReplicaStatus, Service};
use crate::types::DeploymentId;

/// Start every replica under the service lock, in index order.
pub(crate) async fn start_replicas(
    core: &Core,
    deployment: &Deployment,
    service: &Service,
    template: &ReplicaTemplate,
    cancel: &CancelToken,
) -> Result<Vec<Replica>, DeployError> {
    let rows: Vec<Replica> = (0..template.count)
        .map(|index| Replica::pending(deployment.id.clone(), index))
        .collect();
    core.store
        .replace_replicas(&deployment.id, rows.clone())
        .await?;

    let mut started = Vec::with_capacity(rows.len());
    let result = core
        .locks
        .with_lock(
            service.id.as_str(),
            start_in_order(core, deployment, service, template, cancel, rows, &mut started),
        )
        .await
        .map_err(DeployError::from)
        .and_then(|section| section);

    match result {
        Ok(()) => Ok(started),
        Err(error) => {
            if !error.is_cancelled() {
                core.log(&deployment.id, format!("Replica start failed: {error}"))
                    .await;
            }
            let status = if error.is_cancelled() {
                ReplicaStatus::Stopped
            } else {
                ReplicaStatus::Failed
            };
            stop_replicas(core, &deployment.id, status, template.stop_timeout).await;
            Err(error)
        }
    }
}

async fn start_in_order(
    core: &Core,
    deployment: &Deployment,
    service: &Service,
    template: &ReplicaTemplate,
    cancel: &CancelToken,
    rows: Vec<Replica>,
    started: &mut Vec<Replica>,
) -> Result<(), DeployError> {
    for mut replica in rows {
        cancel.check().await?;
        let index = replica.replica_index;
        let spec = LaunchSpec {
            config: template.for_replica(deployment, service, index),
            container_port: template.container_port,
        };
        let name = spec.config.name.clone();

        let launched = core
            .engine
            .run_with_port_retry(&spec, core.store.as_ref())
            .await
            .map_err(|source| DeployError::ReplicaStart { index, source })?;

        replica.container_id = Some(launched.container_id.clone());
        replica.container_name = Some(name.clone());
        replica.host_port = Some(launched.host_port);
        replica.status = ReplicaStatus::Running;
        core.store.update_replica(&replica).await?;

        if index == 0 {
            core.store
                .update_deployment(
                    &deployment.id,
                    DeploymentUpdate {
                        container_id: Some(launched.container_id.clone()),
                        host_port: Some(launched.host_port),
                        ..Default::default()
                    },
                )
                .await?;
        }

        let retries = if launched.attempts > 1 {
            format!(" after {} attempts", launched.attempts)
        } else {
            String::new()
        };
        core.log(
            &deployment.id,
            format!(
                "Replica {index} started as {name} on port {}{retries}",
                launched.host_port
            ),
        )
        .await;
        started.push(replica);
    }
    Ok(())
}

/// Probe every replica concurrently. On failure the message carries each
/// failing replica's container state, and its log tail goes to the build log.
pub(crate) async fn health_check_replicas(
    core: &Core,
    deployment_id: &DeploymentId,
    replicas: &[Replica],
    template: &ReplicaTemplate,
) -> Result<(), DeployError> {
    let checks = replicas.iter().map(|replica| async move {
        let (Some(container), Some(host_port)) = (&replica.container_id, replica.host_port) else {
            return Some((replica, "replica has no container".to_string()));
        };
        let target = ProbeTarget {
            host_port,
            path: template.health_path.clone(),
        };
        core.engine
            .wait_healthy(container, &target, template.health_budget)
            .await
            .err()
            .map(|e| (replica, e.to_string()))
    });
    let failed: Vec<_> = join_all(checks).await.into_iter().flatten().collect();

    if failed.is_empty() {
        core.log(
            deployment_id,
            format!("All {} replica(s) passed health checks", replicas.len()),
        )
        .await;
        return Ok(());
    }

    let mut failures = Vec::with_capacity(failed.len());
    for (replica, reason) in failed {
        let index = replica.replica_index;
        let Some(container) = &replica.container_id else {
            failures.push(format!("replica {index}: {reason}"));
            continue;
        };
        let state = match core.engine.container_state(container).await {
            Ok(Some(state)) => state.to_string(),
            Ok(None) => "missing".to_string(),
            Err(e) => format!("unknown ({e})"),
        };
        failures.push(format!("replica {index}: {reason} (container {state})"));

        let tail = core.engine.tail_logs(container).await;
        if !tail.is_empty() {
            core.log(deployment_id, format!("--- replica {index} logs ---"))
                .await;
            for line in tail {
                core.log(deployment_id, line).await;
            }
        }
    }
    Err(DeployError::Unhealthy { failures })
}

/// Stop every replica of the deployment that still has a container and
/// mark the rows with `status`. Best-effort; returns how many were stopped.
pub(crate) async fn stop_replicas(
    core: &Core,
    deployment_id: &DeploymentId,
    status: ReplicaStatus,
    grace: Duration,
) -> usize {
    let replicas = match core.store.replicas(deployment_id).await {
        Ok(replicas) => replicas,
        Err(e) => {
            warn!(deployment_id = %deployment_id, error = %e, "could not list replicas");
            return 0;
        }
    };

    let mut stopped = 0;
    for mut replica in replicas {
        if matches!(replica.status, ReplicaStatus::Stopped | ReplicaStatus::Failed) {
            continue;
        }
        if let Some(container) = &replica.container_id {
            match core.engine.stop_gracefully(container, grace).await {
                Ok(()) => {
                    stopped += 1;
                    debug!(deployment_id = %deployment_id, container = %container, "replica stopped");
                }
                Err(e) => {
                    warn!(deployment_id = %deployment_id, container = %container, error = %e, "failed to stop replica");
                    continue;
                }
            }
        }
        replica.status = status;
        if let Err(e) = core.store.update_replica(&replica).await {
            warn!(deployment_id = %deployment_id, error = %e, "failed to update replica row");
        }
    }
    stopped
}
