// ABOUTME: Integration tests for runtime-status reconciliation.
// ABOUTME: Running rows whose containers died become stopped; the pointer clears only if it matches.

mod support;

use chrono::Utc;
use slipway::model::{DeploymentStatus, NewDeployment, ReplicaStatus, Trigger};
use slipway::store::Store;
use slipway::types::{ContainerId, DeploymentId};
use std::time::Duration;
use support::fixtures::{Harness, image_service};

/// Test: A running deployment whose containers are gone is marked stopped.
#[tokio::test]
async fn dead_containers_mark_deployment_stopped() {
    let h = Harness::new().await;
    let mut svc = image_service("web", "nginx:1.27", 2);
    svc.domains = vec!["shop.example.com".to_string()];
    let service = h.add_service(svc).await;
    let deployment = h.deploy_and_wait(&service).await;

    for container in h.runtime.live_containers() {
        h.runtime.kill(&container.id);
    }
    let syncs_before = h.router.syncs().len();

    let changed = h
        .controller
        .reconcile_runtime_status(&deployment.id)
        .await
        .unwrap();
    assert!(changed);

    let row = h.deployment(&deployment.id).await;
    assert_eq!(row.status, DeploymentStatus::Stopped);
    assert!(row.finished_at.is_some());
    assert!(row.build_log.contains("Container no longer running, marked stopped"));
    assert!(!row.rollback_eligible);
    let replicas = h.store.replicas(&deployment.id).await.unwrap();
    assert!(replicas.iter().all(|r| r.status == ReplicaStatus::Stopped));

    assert_eq!(h.service(&service).await.current_deployment_id, None);
    assert_eq!(h.router.syncs().len(), syncs_before + 1);
    assert_eq!(h.router.last(), Some(Vec::new()));
}

/// Test: One live replica is enough to keep the deployment running.
#[tokio::test]
async fn partially_live_deployment_is_left_alone() {
    let h = Harness::new().await;
    let service = h.add_service(image_service("web", "nginx:1.27", 2)).await;
    let deployment = h.deploy_and_wait(&service).await;

    let first = h.runtime.live_containers().remove(0);
    h.runtime.kill(&first.id);

    let changed = h
        .controller
        .reconcile_runtime_status(&deployment.id)
        .await
        .unwrap();
    assert!(!changed);
    assert_eq!(
        h.deployment(&deployment.id).await.status,
        DeploymentStatus::Running
    );
}

/// Test: Rows that are not running are never touched.
#[tokio::test]
async fn non_running_rows_are_ignored() {
    let h = Harness::new().await;
    h.probe.set_unhealthy(true);
    let service = h.add_service(image_service("web", "nginx:1.27", 1)).await;
    let failed = h.deploy_and_wait(&service).await;
    assert_eq!(failed.status, DeploymentStatus::Failed);

    let changed = h
        .controller
        .reconcile_runtime_status(&failed.id)
        .await
        .unwrap();
    assert!(!changed);
    assert_eq!(h.deployment(&failed.id).await.status, DeploymentStatus::Failed);
}

/// Test: Reconciling an older row never clears a newer current pointer.
#[tokio::test]
async fn newer_current_pointer_survives() {
    let h = Harness::new().await;
    let service = h.add_service(image_service("web", "nginx:1.27", 1)).await;
    let current = h.deploy_and_wait(&service).await;

    let mut stale = NewDeployment {
        service_id: service.clone(),
        environment_id: current.environment_id.clone(),
        commit_sha: None,
        commit_message: None,
        image_name: Some("nginx:1.26".to_string()),
        container_port: 8080,
        health_check_path: None,
        health_check_timeout: Duration::from_secs(60),
        env_vars_snapshot: Default::default(),
        volumes_snapshot: Vec::new(),
        replica_count: 1,
        rollback_source_id: None,
        trigger: Trigger::Manual,
        triggered_by: None,
    }
    .into_deployment(
        DeploymentId::generate(),
        Utc::now() - chrono::Duration::hours(1),
    );
    stale.status = DeploymentStatus::Running;
    stale.container_id = Some(ContainerId::new("long-gone"));
    h.store.insert_deployment(stale.clone()).await.unwrap();

    let changed = h.controller.reconcile_service(&service).await.unwrap();
    assert_eq!(changed, 1);

    assert_eq!(h.deployment(&stale.id).await.status, DeploymentStatus::Stopped);
    assert_eq!(
        h.deployment(&current.id).await.status,
        DeploymentStatus::Running
    );
    assert_eq!(
        h.service(&service).await.current_deployment_id,
        Some(current.id.clone())
    );
}

/// Test: A full pass covers every service and counts what changed.
#[tokio::test]
async fn reconcile_all_counts_changes() {
    let h = Harness::new().await;
    let web = h.add_service(image_service("web", "nginx:1.27", 1)).await;
    let worker = h.add_service(image_service("worker", "busybox:1.36", 1)).await;
    let web_deployment = h.deploy_and_wait(&web).await;
    let worker_deployment = h.deploy_and_wait(&worker).await;

    h.runtime
        .kill(web_deployment.container_id.as_ref().unwrap());

    assert_eq!(h.controller.reconcile_all().await.unwrap(), 1);
    assert_eq!(
        h.deployment(&worker_deployment.id).await.status,
        DeploymentStatus::Running
    );
    assert_eq!(h.controller.reconcile_all().await.unwrap(), 0);
}
