// ABOUTME: Rollback eligibility flags for a service's deployments.
// ABOUTME: The newest running, image-backed deployments of a volume-free service qualify.

use tracing::debug;

use crate::model::{Deployment, DeploymentStatus, DeploymentUpdate, Service};
use crate::store::{Store, StoreResult};
use crate::types::DeploymentId;

/// How many of the newest qualifying deployments stay eligible.
pub const ROLLBACK_WINDOW: usize = 5;

/// Eligibility for every deployment in `deployments`, which must be ordered
/// newest first. Every row gets an explicit value.
pub fn compute_rollback_eligibility(
    deployments: &[Deployment],
    service_has_volumes: bool,
) -> Vec<(DeploymentId, bool)> {
    let mut rank = 0;
    deployments
        .iter()
        .map(|deployment| {
            let candidate = !service_has_volumes
                && deployment.status == DeploymentStatus::Running
                && deployment.image_name.is_some();
            let eligible = candidate && rank < ROLLBACK_WINDOW;
            if deployment.status == DeploymentStatus::Running {
                rank += 1;
            }
            (deployment.id.clone(), eligible)
        })
        .collect()
}

/// Recompute and write the flags that changed. Returns how many were written.
pub async fn refresh_rollback_eligibility(store: &dyn Store, service: &Service) -> StoreResult<usize> {
    let deployments = store.deployments_for_service(&service.id, &[]).await?;
    let flags = compute_rollback_eligibility(&deployments, service.has_volumes());

    let mut written = 0;
    for (deployment, (id, eligible)) in deployments.iter().zip(flags) {
        if deployment.rollback_eligible == eligible {
            continue;
        }
        store
            .update_deployment(
                &id,
                DeploymentUpdate {
                    rollback_eligible: Some(eligible),
                    ..Default::default()
                },
            )
            .await?;
        written += 1;
    }
    debug!(service = %service.id, written, "rollback eligibility refreshed");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewDeployment, Trigger};
    use crate::types::{EnvironmentId, ServiceId};
    use chrono::{Duration as ChronoDuration, Utc};
    use proptest::prelude::*;
    use std::time::Duration;

    fn row(status: DeploymentStatus, age: i64, image: bool) -> Deployment {
        let mut deployment = NewDeployment {
            service_id: ServiceId::new("shop-production-web"),
            environment_id: EnvironmentId::new("shop-production"),
            commit_sha: None,
            commit_message: None,
            image_name: image.then(|| "nginx:1.27".to_string()),
            container_port: 80,
            health_check_path: None,
            health_check_timeout: Duration::from_secs(60),
            env_vars_snapshot: Default::default(),
            volumes_snapshot: Vec::new(),
            replica_count: 1,
            rollback_source_id: None,
            trigger: Trigger::Manual,
            triggered_by: None,
        }
        .into_deployment(DeploymentId::generate(), Utc::now() - ChronoDuration::minutes(age));
        deployment.status = status;
        deployment
    }

    #[test]
    fn volumes_make_nothing_eligible() {
        let rows = vec![row(DeploymentStatus::Running, 0, true)];
        let flags = compute_rollback_eligibility(&rows, true);
        assert_eq!(flags, vec![(rows[0].id.clone(), false)]);
    }

    #[test]
    fn running_rows_without_image_still_take_a_rank() {
        let mut rows = vec![row(DeploymentStatus::Running, 0, false)];
        rows.extend((1..=5).map(|age| row(DeploymentStatus::Running, age, true)));
        let eligible: Vec<bool> = compute_rollback_eligibility(&rows, false)
            .into_iter()
            .map(|(_, e)| e)
            .collect();
        assert_eq!(eligible, vec![false, true, true, true, true, false]);
    }

    proptest! {
        /// At most the window is eligible, and only running rows with an image.
        #[test]
        fn eligibility_respects_window(
            shape in proptest::collection::vec((0u8..4, any::<bool>()), 0..20),
        ) {
            let rows: Vec<Deployment> = shape
                .iter()
                .enumerate()
                .map(|(age, (status, image))| {
                    let status = match status {
                        0 | 1 => DeploymentStatus::Running,
                        2 => DeploymentStatus::Stopped,
                        _ => DeploymentStatus::Failed,
                    };
                    row(status, age as i64, *image)
                })
                .collect();
            let flags = compute_rollback_eligibility(&rows, false);

            prop_assert_eq!(flags.len(), rows.len());
            let eligible = flags.iter().filter(|(_, e)| *e).count();
            prop_assert!(eligible <= ROLLBACK_WINDOW);
            for (deployment, (_, flag)) in rows.iter().zip(&flags) {
                if *flag {
                    prop_assert_eq!(deployment.status, DeploymentStatus::Running);
                    prop_assert!(deployment.image_name.is_some());
                }
            }

            let running = rows.iter().filter(|d| d.status == DeploymentStatus::Running).count();
            let all_have_images = rows.iter().all(|d| d.image_name.is_some());
            if all_have_images {
                prop_assert_eq!(eligible, running.min(ROLLBACK_WINDOW));
            }
        }
    }
}
