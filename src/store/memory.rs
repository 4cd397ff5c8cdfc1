// ABOUTME: In-memory store used by tests and as the working set of FileStore.
// ABOUTME: A single parking_lot lock makes every method one atomic step.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use super::{Store, StoreError, StoreResult};
use crate::model::{
    Deployment, DeploymentStatus, DeploymentUpdate, Environment, Project, Replica, ReplicaStatus,
    Service,
};
use crate::types::{DeploymentId, EnvironmentId, ProjectId, ServiceId};

/// Everything the store holds. Deployments and replicas keep insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreData {
    #[serde(default)]
    projects: BTreeMap<String, Project>,
    #[serde(default)]
    environments: BTreeMap<String, Environment>,
    #[serde(default)]
    services: BTreeMap<String, Service>,
    #[serde(default)]
    deployments: Vec<Deployment>,
    #[serde(default)]
    replicas: Vec<Replica>,
}

impl StoreData {
    fn deployment_mut(&mut self, id: &DeploymentId) -> StoreResult<&mut Deployment> {
        self.deployments
            .iter_mut()
            .find(|d| &d.id == id)
            .ok_or_else(|| StoreError::deployment_not_found(id))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<StoreData>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_data(data: StoreData) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    pub(crate) fn snapshot(&self) -> StoreData {
        self.data.read().clone()
    }

    pub(crate) fn replace(&self, data: StoreData) {
        *self.data.write() = data;
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put_project(&self, project: Project) -> StoreResult<()> {
        self.data
            .write()
            .projects
            .insert(project.id.to_string(), project);
        Ok(())
    }

    async fn project(&self, id: &ProjectId) -> StoreResult<Option<Project>> {
        Ok(self.data.read().projects.get(id.as_str()).cloned())
    }

    async fn put_environment(&self, environment: Environment) -> StoreResult<()> {
        self.data
            .write()
            .environments
            .insert(environment.id.to_string(), environment);
        Ok(())
    }

    async fn environment(&self, id: &EnvironmentId) -> StoreResult<Option<Environment>> {
        Ok(self.data.read().environments.get(id.as_str()).cloned())
    }

    async fn put_service(&self, mut service: Service) -> StoreResult<()> {
        let mut data = self.data.write();
        if let Some(existing) = data.services.get(service.id.as_str()) {
            service.current_deployment_id = existing.current_deployment_id.clone();
        }
        data.services.insert(service.id.to_string(), service);
        Ok(())
    }

    async fn service(&self, id: &ServiceId) -> StoreResult<Option<Service>> {
        Ok(self.data.read().services.get(id.as_str()).cloned())
    }

    async fn services(&self) -> StoreResult<Vec<Service>> {
        Ok(self.data.read().services.values().cloned().collect())
    }

    async fn insert_deployment(&self, deployment: Deployment) -> StoreResult<()> {
        let mut data = self.data.write();
        if data.deployments.iter().any(|d| d.id == deployment.id) {
            return Err(StoreError::Duplicate {
                kind: "deployment",
                id: deployment.id.to_string(),
            });
        }
        data.deployments.push(deployment);
        Ok(())
    }

    async fn deployment(&self, id: &DeploymentId) -> StoreResult<Option<Deployment>> {
        Ok(self
            .data
            .read()
            .deployments
            .iter()
            .find(|d| &d.id == id)
            .cloned())
    }

    async fn update_deployment(
        &self,
        id: &DeploymentId,
        update: DeploymentUpdate,
    ) -> StoreResult<()> {
        let mut data = self.data.write();
        update.apply(data.deployment_mut(id)?);
        Ok(())
    }

    async fn transition(
        &self,
        id: &DeploymentId,
        from: &[DeploymentStatus],
        to: DeploymentStatus,
        update: DeploymentUpdate,
    ) -> StoreResult<bool> {
        let mut data = self.data.write();
        let deployment = data.deployment_mut(id)?;
        if !from.contains(&deployment.status) {
            return Ok(false);
        }
        deployment.status = to;
        update.apply(deployment);
        Ok(true)
    }

    async fn deployments_for_service(
        &self,
        service: &ServiceId,
        statuses: &[DeploymentStatus],
    ) -> StoreResult<Vec<Deployment>> {
        let data = self.data.read();
        let mut matching: Vec<Deployment> = data
            .deployments
            .iter()
            .rev()
            .filter(|d| &d.service_id == service)
            .filter(|d| statuses.is_empty() || statuses.contains(&d.status))
            .cloned()
            .collect();
        // Stable sort over reverse insertion order breaks timestamp ties.
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    async fn append_log(&self, id: &DeploymentId, line: &str) -> StoreResult<()> {
        let mut data = self.data.write();
        let deployment = data.deployment_mut(id)?;
        deployment.build_log.push_str(line);
        if !line.ends_with('\n') {
            deployment.build_log.push('\n');
        }
        Ok(())
    }

    async fn replace_replicas(
        &self,
        deployment: &DeploymentId,
        replicas: Vec<Replica>,
    ) -> StoreResult<()> {
        let mut data = self.data.write();
        data.replicas.retain(|r| &r.deployment_id != deployment);
        data.replicas.extend(replicas);
        Ok(())
    }

    async fn replicas(&self, deployment: &DeploymentId) -> StoreResult<Vec<Replica>> {
        let data = self.data.read();
        let mut replicas: Vec<Replica> = data
            .replicas
            .iter()
            .filter(|r| &r.deployment_id == deployment)
            .cloned()
            .collect();
        replicas.sort_by_key(|r| r.replica_index);
        Ok(replicas)
    }

    async fn update_replica(&self, replica: &Replica) -> StoreResult<()> {
        let mut data = self.data.write();
        let row = data
            .replicas
            .iter_mut()
            .find(|r| r.id == replica.id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "replica",
                id: replica.id.to_string(),
            })?;
        *row = replica.clone();
        Ok(())
    }

    async fn publish(&self, id: &DeploymentId, service: &ServiceId) -> StoreResult<bool> {
        let mut data = self.data.write();
        if !data.services.contains_key(service.as_str()) {
            return Err(StoreError::NotFound {
                kind: "service",
                id: service.to_string(),
            });
        }
        let deployment = data.deployment_mut(id)?;
        if deployment.status != DeploymentStatus::Deploying {
            return Ok(false);
        }
        deployment.status = DeploymentStatus::Running;
        deployment.finished_at = Some(Utc::now());
        if let Some(row) = data.services.get_mut(service.as_str()) {
            row.current_deployment_id = Some(id.clone());
        }
        Ok(true)
    }

    async fn clear_current_deployment_if(
        &self,
        service: &ServiceId,
        id: &DeploymentId,
    ) -> StoreResult<bool> {
        let mut data = self.data.write();
        match data.services.get_mut(service.as_str()) {
            Some(row) if row.current_deployment_id.as_ref() == Some(id) => {
                row.current_deployment_id = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn active_host_ports(&self) -> StoreResult<HashSet<u16>> {
        let data = self.data.read();
        let live: HashSet<&DeploymentId> = data
            .deployments
            .iter()
            .filter(|d| !d.status.is_terminal())
            .map(|d| &d.id)
            .collect();

        let mut ports: HashSet<u16> = data
            .deployments
            .iter()
            .filter(|d| live.contains(&d.id))
            .filter_map(|d| d.host_port)
            .collect();
        ports.extend(
            data.replicas
                .iter()
                .filter(|r| live.contains(&r.deployment_id))
                .filter(|r| matches!(r.status, ReplicaStatus::Pending | ReplicaStatus::Running))
                .filter_map(|r| r.host_port),
        );
        Ok(ports)
    }
}
