// ABOUTME: Service, environment and project records.
// ABOUTME: A service is pinned to one host with a fixed replica count.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::{DeploymentId, EnvironmentId, ProjectId, ServiceId, ServiceName};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub id: EnvironmentId,
    pub project_id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Where a service's image comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ServiceSource {
    /// Pull a prebuilt image.
    Image { image: String },
    /// Clone and build from source.
    Repository {
        url: String,
        branch: String,
        dockerfile: String,
        context: String,
        /// Installation handed to the source collaborator for clone tokens.
        installation: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// HTTP path to probe; TCP connect when absent.
    pub path: Option<String>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            path: None,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum VolumeKind {
    /// Engine-managed named volume.
    Named,
    /// Host directory bind mount.
    Bind { host_path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub name: String,
    pub target: String,
    #[serde(flatten)]
    pub kind: VolumeKind,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    pub memory_bytes: Option<i64>,
    pub nano_cpus: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceId,
    pub name: ServiceName,
    pub project_id: ProjectId,
    pub environment_id: EnvironmentId,
    pub source: ServiceSource,
    pub container_port: u16,
    #[serde(default)]
    pub health_check: HealthCheck,
    pub replicas: u32,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub volumes: Vec<VolumeSpec>,
    #[serde(default)]
    pub resources: Resources,
    pub command: Option<Vec<String>>,
    #[serde(default, with = "humantime_serde")]
    pub drain_delay: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub stop_timeout: Duration,
    #[serde(default)]
    pub domains: Vec<String>,
    pub network: String,
    pub current_deployment_id: Option<DeploymentId>,
}

impl Service {
    pub fn has_volumes(&self) -> bool {
        !self.volumes.is_empty()
    }
}
