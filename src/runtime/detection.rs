// ABOUTME: Local runtime detection.
// ABOUTME: Checks for Podman sockets first, then Docker; config overrides win.

use super::types::{RuntimeConfig, RuntimeEndpoint, RuntimeType};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("no container runtime found (checked Podman and Docker sockets)")]
    NoRuntimeFound,

    #[error("configured runtime socket does not exist: {0}")]
    MissingSocket(String),
}

const ROOTFUL_PODMAN: &str = "/run/podman/podman.sock";
const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Detect the container runtime on this host.
///
/// Detection order:
/// 1. Rootless Podman socket (`/run/user/$UID/podman/podman.sock`)
/// 2. Rootful Podman socket (`/run/podman/podman.sock`)
/// 3. Docker socket (`/var/run/docker.sock`)
pub fn detect_local() -> Result<RuntimeEndpoint, DetectionError> {
    if let Some(uid) = current_uid() {
        let rootless = format!("/run/user/{uid}/podman/podman.sock");
        if Path::new(&rootless).exists() {
            return Ok(RuntimeEndpoint {
                runtime_type: RuntimeType::Podman,
                socket_path: rootless,
            });
        }
    }

    if Path::new(ROOTFUL_PODMAN).exists() {
        return Ok(RuntimeEndpoint {
            runtime_type: RuntimeType::Podman,
            socket_path: ROOTFUL_PODMAN.to_string(),
        });
    }

    if Path::new(DOCKER_SOCKET).exists() {
        return Ok(RuntimeEndpoint {
            runtime_type: RuntimeType::Docker,
            socket_path: DOCKER_SOCKET.to_string(),
        });
    }

    Err(DetectionError::NoRuntimeFound)
}

/// Apply an explicit override, falling back to detection.
///
/// A configured socket must exist; a configured runtime without a socket
/// uses that runtime's default path.
pub fn resolve_endpoint(config: &RuntimeConfig) -> Result<RuntimeEndpoint, DetectionError> {
    match (config.runtime, &config.socket) {
        (Some(runtime_type), socket) => {
            let socket_path = socket
                .clone()
                .unwrap_or_else(|| default_socket_path(runtime_type));
            Ok(RuntimeEndpoint {
                runtime_type,
                socket_path,
            })
        }
        (None, Some(socket)) => {
            if !Path::new(socket).exists() {
                return Err(DetectionError::MissingSocket(socket.clone()));
            }
            let runtime_type = if socket.contains("podman") {
                RuntimeType::Podman
            } else {
                RuntimeType::Docker
            };
            Ok(RuntimeEndpoint {
                runtime_type,
                socket_path: socket.clone(),
            })
        }
        (None, None) => detect_local(),
    }
}

fn current_uid() -> Option<String> {
    std::env::var("UID").ok().or_else(|| {
        std::fs::read_to_string("/proc/self/status")
            .ok()
            .and_then(|s| {
                s.lines()
                    .find(|l| l.starts_with("Uid:"))
                    .and_then(|l| l.split_whitespace().nth(1))
                    .map(|s| s.to_string())
            })
    })
}

fn default_socket_path(runtime: RuntimeType) -> String {
    match runtime {
        RuntimeType::Docker => DOCKER_SOCKET.to_string(),
        RuntimeType::Podman => ROOTFUL_PODMAN.to_string(),
    }
}
