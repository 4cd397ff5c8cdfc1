// ABOUTME: Container operations trait for container runtimes.
// ABOUTME: Create, start, stop, remove, inspect, and list containers.

use super::shared_types::{ContainerConfig, ContainerInfo, ContainerState};
use crate::types::ContainerId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Container lifecycle operations.
#[async_trait]
pub trait ContainerOps: Send + Sync {
    /// Create a container from the given configuration.
    async fn create_container(&self, config: &ContainerConfig)
    -> Result<ContainerId, ContainerError>;

    /// Start a created container. Host port conflicts surface here.
    async fn start_container(&self, id: &ContainerId) -> Result<(), ContainerError>;

    /// Stop a running container, killing it after `timeout`.
    async fn stop_container(&self, id: &ContainerId, timeout: Duration)
    -> Result<(), ContainerError>;

    /// Remove a container by id or name.
    async fn remove_container(&self, id: &ContainerId, force: bool) -> Result<(), ContainerError>;

    /// Get detailed information about a container.
    async fn inspect_container(&self, id: &ContainerId) -> Result<ContainerInfo, ContainerError>;

    /// List containers matching the given filters.
    async fn list_containers(
        &self,
        filters: &ContainerFilters,
    ) -> Result<Vec<ContainerSummary>, ContainerError>;
}

/// Filters for listing containers.
#[derive(Debug, Clone, Default)]
pub struct ContainerFilters {
    /// Filter by label (key=value).
    pub labels: HashMap<String, String>,
    /// Filter by name (supports partial match).
    pub name: Option<String>,
    /// Include stopped containers.
    pub all: bool,
}

impl ContainerFilters {
    pub fn label(key: &str, value: &str) -> Self {
        Self {
            labels: HashMap::from([(key.to_string(), value.to_string())]),
            name: None,
            all: true,
        }
    }
}

/// Summary information about a container.
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub id: ContainerId,
    pub name: String,
    pub image: String,
    pub state: ContainerState,
    pub status: String,
    pub labels: HashMap<String, String>,
    /// Host ports published by this container.
    pub published_ports: Vec<u16>,
}

/// Errors from container operations.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("container not found: {0}")]
    NotFound(String),

    #[error("container name already in use: {0}")]
    AlreadyExists(String),

    #[error("host port already in use: {0}")]
    PortInUse(String),

    #[error("container not running: {0}")]
    NotRunning(String),

    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}
