// ABOUTME: JSON-file backed store shared by every slipway process on a state dir.
// ABOUTME: Each call reloads state.json; writes re-read and rewrite it under a lock file.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::MutexGuard;

use super::lockfile::LockFile;
use super::memory::StoreData;
use super::{MemoryStore, Store, StoreResult};
use crate::model::{
    Deployment, DeploymentStatus, DeploymentUpdate, Environment, Project, Replica, Service,
};
use crate::types::{DeploymentId, EnvironmentId, ProjectId, ServiceId};

pub const STATE_FILENAME: &str = "state.json";
pub const STATE_LOCK_FILENAME: &str = "state.lock";

/// A write holds the state lock for one read-modify-write only.
const STATE_LOCK_STALE_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct FileStore {
    inner: MemoryStore,
    path: PathBuf,
    lock_path: PathBuf,
    /// Serializes this process's tasks around the shared working set.
    working: tokio::sync::Mutex<()>,
}

/// Held for the duration of one mutation.
struct WriteGuard<'a> {
    _working: MutexGuard<'a, ()>,
    lock: LockFile,
}

impl FileStore {
    /// Open the store under `state_dir`, creating the directory if needed.
    pub async fn open(state_dir: &Path) -> StoreResult<Self> {
        tokio::fs::create_dir_all(state_dir).await?;
        let store = Self {
            inner: MemoryStore::from_data(StoreData::default()),
            path: state_dir.join(STATE_FILENAME),
            lock_path: state_dir.join(STATE_LOCK_FILENAME),
            working: tokio::sync::Mutex::new(()),
        };
        store.reload().await?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the working set with what is on disk.
    async fn reload(&self) -> StoreResult<()> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice::<StoreData>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreData::default(),
            Err(e) => return Err(e.into()),
        };
        self.inner.replace(data);
        Ok(())
    }

    async fn begin_read(&self) -> StoreResult<MutexGuard<'_, ()>> {
        let guard = self.working.lock().await;
        self.reload().await?;
        Ok(guard)
    }

    async fn begin_write(&self) -> StoreResult<WriteGuard<'_>> {
        let working = self.working.lock().await;
        let lock = LockFile::acquire(&self.lock_path, "state", STATE_LOCK_STALE_AFTER).await?;
        self.reload().await?;
        Ok(WriteGuard {
            _working: working,
            lock,
        })
    }

    async fn commit(&self, guard: WriteGuard<'_>) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(&self.inner.snapshot())?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        guard.lock.release().await
    }
}

#[async_trait]
impl Store for FileStore {
    async fn put_project(&self, project: Project) -> StoreResult<()> {
        let guard = self.begin_write().await?;
        self.inner.put_project(project).await?;
        self.commit(guard).await
    }

    async fn project(&self, id: &ProjectId) -> StoreResult<Option<Project>> {
        let _guard = self.begin_read().await?;
        self.inner.project(id).await
    }

    async fn put_environment(&self, environment: Environment) -> StoreResult<()> {
        let guard = self.begin_write().await?;
        self.inner.put_environment(environment).await?;
        self.commit(guard).await
    }

    async fn environment(&self, id: &EnvironmentId) -> StoreResult<Option<Environment>> {
        let _guard = self.begin_read().await?;
        self.inner.environment(id).await
    }

    async fn put_service(&self, service: Service) -> StoreResult<()> {
        let guard = self.begin_write().await?;
        self.inner.put_service(service).await?;
        self.commit(guard).await
    }

    async fn service(&self, id: &ServiceId) -> StoreResult<Option<Service>> {
        let _guard = self.begin_read().await?;
        self.inner.service(id).await
    }

    async fn services(&self) -> StoreResult<Vec<Service>> {
        let _guard = self.begin_read().await?;
        self.inner.services().await
    }

    async fn insert_deployment(&self, deployment: Deployment) -> StoreResult<()> {
        let guard = self.begin_write().await?;
        self.inner.insert_deployment(deployment).await?;
        self.commit(guard).await
    }

    async fn deployment(&self, id: &DeploymentId) -> StoreResult<Option<Deployment>> {
        let _guard = self.begin_read().await?;
        self.inner.deployment(id).await
    }

    async fn update_deployment(
        &self,
        id: &DeploymentId,
        update: DeploymentUpdate,
    ) -> StoreResult<()> {
        let guard = self.begin_write().await?;
        self.inner.update_deployment(id, update).await?;
        self.commit(guard).await
    }

    async fn transition(
        &self,
        id: &DeploymentId,
        from: &[DeploymentStatus],
        to: DeploymentStatus,
        update: DeploymentUpdate,
    ) -> StoreResult<bool> {
        let guard = self.begin_write().await?;
        let applied = self.inner.transition(id, from, to, update).await?;
        if applied {
            self.commit(guard).await?;
        }
        Ok(applied)
    }

    async fn deployments_for_service(
        &self,
        service: &ServiceId,
        statuses: &[DeploymentStatus],
    ) -> StoreResult<Vec<Deployment>> {
        let _guard = self.begin_read().await?;
        self.inner.deployments_for_service(service, statuses).await
    }

    async fn append_log(&self, id: &DeploymentId, line: &str) -> StoreResult<()> {
        let guard = self.begin_write().await?;
        self.inner.append_log(id, line).await?;
        self.commit(guard).await
    }

    async fn replace_replicas(
        &self,
        deployment: &DeploymentId,
        replicas: Vec<Replica>,
    ) -> StoreResult<()> {
        let guard = self.begin_write().await?;
        self.inner.replace_replicas(deployment, replicas).await?;
        self.commit(guard).await
    }

    async fn replicas(&self, deployment: &DeploymentId) -> StoreResult<Vec<Replica>> {
        let _guard = self.begin_read().await?;
        self.inner.replicas(deployment).await
    }

    async fn update_replica(&self, replica: &Replica) -> StoreResult<()> {
        let guard = self.begin_write().await?;
        self.inner.update_replica(replica).await?;
        self.commit(guard).await
    }

    async fn publish(&self, id: &DeploymentId, service: &ServiceId) -> StoreResult<bool> {
        let guard = self.begin_write().await?;
        let applied = self.inner.publish(id, service).await?;
        if applied {
            self.commit(guard).await?;
        }
        Ok(applied)
    }

    async fn clear_current_deployment_if(
        &self,
        service: &ServiceId,
        id: &DeploymentId,
    ) -> StoreResult<bool> {
        let guard = self.begin_write().await?;
        let cleared = self.inner.clear_current_deployment_if(service, id).await?;
        if cleared {
            self.commit(guard).await?;
        }
        Ok(cleared)
    }

    async fn active_host_ports(&self) -> StoreResult<HashSet<u16>> {
        let _guard = self.begin_read().await?;
        self.inner.active_host_ports().await
    }
}
