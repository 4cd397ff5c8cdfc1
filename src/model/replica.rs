// ABOUTME: Replica record: one container instance of a deployment.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{ContainerId, DeploymentId, ReplicaId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaStatus {
    Pending,
    Running,
    Stopped,
    Failed,
}

impl fmt::Display for ReplicaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReplicaStatus::Pending => "pending",
            ReplicaStatus::Running => "running",
            ReplicaStatus::Stopped => "stopped",
            ReplicaStatus::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replica {
    pub id: ReplicaId,
    pub deployment_id: DeploymentId,
    pub replica_index: u32,
    pub container_id: Option<ContainerId>,
    pub container_name: Option<String>,
    pub host_port: Option<u16>,
    pub status: ReplicaStatus,
}

impl Replica {
    pub fn pending(deployment_id: DeploymentId, replica_index: u32) -> Self {
        Self {
            id: ReplicaId::generate(),
            deployment_id,
            replica_index,
            container_id: None,
            container_name: None,
            host_port: None,
            status: ReplicaStatus::Pending,
        }
    }
}
