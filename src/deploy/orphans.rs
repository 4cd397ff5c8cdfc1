// ABOUTME: Orphan container detection and cleanup.
// ABOUTME: Finds managed containers of a service whose deployment is no longer live.

use std::time::Duration;
use tracing::{info, warn};

use super::context::Core;
use super::provision::{LABEL_DEPLOYMENT, service_labels};
use crate::engine::EngineResult;
use crate::model::{DeploymentStatus, Service};
use crate::runtime::ContainerSummary;
use crate::store::Store;
use crate::types::{DeploymentId, ServiceId};

/// Managed containers of `service` that belong to no live deployment.
///
/// A container is kept when it belongs to `current`, or its deployment is
/// running or still in progress. Everything else, including containers
/// whose deployment row is gone, is an orphan.
pub async fn detect_orphans(
    containers: Vec<ContainerSummary>,
    store: &dyn Store,
    service: &ServiceId,
    current: &DeploymentId,
) -> Vec<ContainerSummary> {
    let mut orphans = Vec::new();
    for container in containers {
        let Some(owner) = container.labels.get(LABEL_DEPLOYMENT) else {
            orphans.push(container);
            continue;
        };
        if owner == current.as_str() {
            continue;
        }
        let status = match store.deployment(&DeploymentId::new(owner.as_str())).await {
            Ok(Some(d)) if &d.service_id == service => Some(d.status),
            Ok(_) => None,
            Err(e) => {
                // Unknown is not the same as gone; keep it.
                warn!(container = %container.id, error = %e, "could not look up container owner");
                continue;
            }
        };
        let live = status.is_some_and(|s| s == DeploymentStatus::Running || s.is_in_progress());
        if !live {
            orphans.push(container);
        }
    }
    orphans
}

/// Stop and remove orphans of `service`. Returns how many were removed.
pub(crate) async fn sweep_orphans(
    core: &Core,
    service: &Service,
    current: &DeploymentId,
    grace: Duration,
) -> EngineResult<usize> {
    let containers = core.engine.containers_labelled(service_labels(service)).await?;
    let orphans = detect_orphans(containers, core.store.as_ref(), &service.id, current).await;

    let mut cleaned = 0;
    for orphan in orphans {
        match core.engine.stop_gracefully(&orphan.id, grace).await {
            Ok(()) => {
                cleaned += 1;
                info!(service = %service.id, container = %orphan.name, "removed orphan container");
            }
            Err(e) => {
                warn!(service = %service.id, container = %orphan.name, error = %e, "failed to remove orphan");
            }
        }
    }
    Ok(cleaned)
}
