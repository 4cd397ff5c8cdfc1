// ABOUTME: Shared types used across runtime trait definitions.
// ABOUTME: ContainerConfig, ContainerInfo, BuildRequest, RegistryAuth, etc.

use crate::types::{ContainerId, ImageRef};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for creating a container.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub name: String,
    pub image: ImageRef,
    pub env: HashMap<String, String>,
    pub labels: HashMap<String, String>,
    pub ports: Vec<PortMapping>,
    pub volumes: Vec<VolumeMount>,
    /// Command to run (overrides image CMD).
    pub command: Option<Vec<String>>,
    pub resources: Option<ResourceLimits>,
    pub stop_timeout: Option<Duration>,
    /// Network to attach to.
    pub network: Option<String>,
    pub network_aliases: Vec<String>,
}

/// TCP port mapping from the host to the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountKind {
    /// Host path bind mount.
    Bind,
    /// Engine-managed named volume.
    Volume,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    /// Host path or volume name.
    pub source: String,
    pub target: String,
    pub read_only: bool,
    pub kind: MountKind,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceLimits {
    pub memory_bytes: Option<i64>,
    pub nano_cpus: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: ContainerId,
    pub name: String,
    pub image: String,
    pub state: ContainerState,
    pub exit_code: Option<i64>,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
}

impl ContainerState {
    /// Whether the container holds resources (ports, processes) on the host.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            ContainerState::Running | ContainerState::Restarting | ContainerState::Paused
        )
    }

    /// The container has stopped on its own and will not recover.
    pub fn is_down(self) -> bool {
        matches!(self, ContainerState::Exited | ContainerState::Dead)
    }

    /// Parse the engine's lowercase state string. Unknown states read as exited.
    pub fn parse(state: &str) -> Self {
        match state {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "paused" => ContainerState::Paused,
            "restarting" => ContainerState::Restarting,
            "removing" | "stopping" => ContainerState::Removing,
            "dead" => ContainerState::Dead,
            _ => ContainerState::Exited,
        }
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ContainerState::Created => "created",
            ContainerState::Running => "running",
            ContainerState::Paused => "paused",
            ContainerState::Restarting => "restarting",
            ContainerState::Removing => "removing",
            ContainerState::Exited => "exited",
            ContainerState::Dead => "dead",
        })
    }
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub name: String,
    /// Network driver (bridge by default).
    pub driver: Option<String>,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct VolumeConfig {
    pub name: String,
    pub labels: HashMap<String, String>,
}

/// Image build from a directory on the engine's host.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub context_dir: PathBuf,
    /// Dockerfile path relative to the context.
    pub dockerfile: String,
    pub tag: ImageRef,
    pub build_args: HashMap<String, String>,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    pub log: Vec<String>,
}

/// Registry authentication credentials.
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
    /// Registry server (e.g., "ghcr.io").
    pub server: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RuntimeMetadata {
    pub name: String,
    pub version: String,
    pub api_version: String,
    pub os: String,
    pub arch: String,
}
