// ABOUTME: Persisted state behind an async trait: services, deployments, replicas.
// ABOUTME: Keyed CRUD plus conditional status transitions; no orchestration logic.

mod file;
mod lockfile;
mod memory;

pub use file::FileStore;
pub use lockfile::{LockFile, LockInfo};
pub use memory::MemoryStore;

use async_trait::async_trait;
use std::collections::HashSet;
use thiserror::Error;

use crate::model::{
    Deployment, DeploymentStatus, DeploymentUpdate, Environment, Project, Replica, Service,
};
use crate::types::{DeploymentId, EnvironmentId, ProjectId, ServiceId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} already exists: {id}")]
    Duplicate { kind: &'static str, id: String },

    #[error("state file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl StoreError {
    pub fn deployment_not_found(id: &DeploymentId) -> Self {
        StoreError::NotFound {
            kind: "deployment",
            id: id.to_string(),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    async fn put_project(&self, project: Project) -> StoreResult<()>;
    async fn project(&self, id: &ProjectId) -> StoreResult<Option<Project>>;

    async fn put_environment(&self, environment: Environment) -> StoreResult<()>;
    async fn environment(&self, id: &EnvironmentId) -> StoreResult<Option<Environment>>;

    /// Insert or replace a service. The current-deployment pointer of an
    /// existing row is kept; it only moves through the dedicated methods.
    async fn put_service(&self, service: Service) -> StoreResult<()>;
    async fn service(&self, id: &ServiceId) -> StoreResult<Option<Service>>;
    async fn services(&self) -> StoreResult<Vec<Service>>;

    async fn insert_deployment(&self, deployment: Deployment) -> StoreResult<()>;
    async fn deployment(&self, id: &DeploymentId) -> StoreResult<Option<Deployment>>;
    async fn update_deployment(&self, id: &DeploymentId, update: DeploymentUpdate)
    -> StoreResult<()>;

    /// Move a deployment to `to` only if its status is currently in `from`,
    /// applying `update` in the same write. Returns whether it applied.
    async fn transition(
        &self,
        id: &DeploymentId,
        from: &[DeploymentStatus],
        to: DeploymentStatus,
        update: DeploymentUpdate,
    ) -> StoreResult<bool>;

    /// Deployments of a service whose status is in `statuses` (all when
    /// empty), newest first. Ties on `created_at` keep the later insert first.
    async fn deployments_for_service(
        &self,
        service: &ServiceId,
        statuses: &[DeploymentStatus],
    ) -> StoreResult<Vec<Deployment>>;

    async fn append_log(&self, id: &DeploymentId, line: &str) -> StoreResult<()>;

    /// Delete every replica row of the deployment and insert `replicas`.
    async fn replace_replicas(
        &self,
        deployment: &DeploymentId,
        replicas: Vec<Replica>,
    ) -> StoreResult<()>;
    async fn replicas(&self, deployment: &DeploymentId) -> StoreResult<Vec<Replica>>;
    async fn update_replica(&self, replica: &Replica) -> StoreResult<()>;

    /// `deploying -> running` and point the service at the deployment, in one
    /// write. Returns false when the deployment was no longer `deploying`.
    async fn publish(&self, id: &DeploymentId, service: &ServiceId) -> StoreResult<bool>;

    /// Clear the service's current-deployment pointer only if it still
    /// points at `id`.
    async fn clear_current_deployment_if(
        &self,
        service: &ServiceId,
        id: &DeploymentId,
    ) -> StoreResult<bool>;

    /// Host ports held by non-terminal deployments and their live replicas.
    async fn active_host_ports(&self) -> StoreResult<HashSet<u16>>;
}
