// ABOUTME: Bollard-based container runtime implementation.
// ABOUTME: Supports both Docker and Podman via the Docker-compatible API.

use crate::runtime::traits::{
    BuildOutput, BuildRequest, ContainerConfig, ContainerError, ContainerFilters, ContainerInfo,
    ContainerOps, ContainerState, ContainerSummary, ImageError, ImageOps, LogError, LogLine,
    LogLineStream, LogOps, LogOptions, LogStream, MountKind, NetworkConfig, NetworkError,
    NetworkOps, RegistryAuth, RuntimeInfo, RuntimeInfoError, RuntimeMetadata, VolumeConfig,
    VolumeError, VolumeOps,
};
use crate::runtime::types::{RuntimeEndpoint, RuntimeType};
use crate::types::{ContainerId, ImageRef, NetworkId, VolumeId};
use async_trait::async_trait;
use bollard::Docker;
use bollard::errors::Error as BollardError;
use bollard::models::{
    ContainerCreateBody, ContainerStateStatusEnum, EndpointSettings, HostConfig, Mount,
    MountTypeEnum, PortBinding, RestartPolicy, RestartPolicyNameEnum, VolumeCreateRequest,
};
use bollard::query_parameters::{
    BuildImageOptions, CreateContainerOptions, CreateImageOptions, InspectContainerOptions,
    ListContainersOptions, LogsOptions, RemoveContainerOptions, StopContainerOptions,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Error Mapping Helpers
// =============================================================================

fn server_error(e: &BollardError) -> Option<(u16, &str)> {
    match e {
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => Some((*status_code, message.as_str())),
        _ => None,
    }
}

/// Engines report host port clashes as a 500 on start with one of these phrases.
fn is_port_conflict(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("port is already allocated")
        || message.contains("address already in use")
        || (message.contains("bind for") && message.contains("failed"))
}

fn map_container_create_error(e: BollardError, name: &str) -> ContainerError {
    match server_error(&e) {
        Some((404, message)) => ContainerError::ImageNotFound(message.to_string()),
        Some((409, _)) => ContainerError::AlreadyExists(name.to_string()),
        Some((_, message)) if is_port_conflict(message) => {
            ContainerError::PortInUse(message.to_string())
        }
        _ => ContainerError::Runtime(e.to_string()),
    }
}

fn map_container_start_error(e: BollardError) -> ContainerError {
    match server_error(&e) {
        Some((404, message)) => ContainerError::NotFound(message.to_string()),
        Some((_, message)) if is_port_conflict(message) => {
            ContainerError::PortInUse(message.to_string())
        }
        _ => ContainerError::Runtime(e.to_string()),
    }
}

fn map_container_stop_error(e: BollardError) -> ContainerError {
    match server_error(&e) {
        Some((404, message)) => ContainerError::NotFound(message.to_string()),
        Some((304, message)) => ContainerError::NotRunning(message.to_string()),
        _ => ContainerError::Runtime(e.to_string()),
    }
}

fn map_container_not_found_error(e: BollardError) -> ContainerError {
    match server_error(&e) {
        Some((404, message)) => ContainerError::NotFound(message.to_string()),
        _ => ContainerError::Runtime(e.to_string()),
    }
}

fn map_image_pull_error(e: BollardError, image_name: &str) -> ImageError {
    let detail = match &e {
        BollardError::DockerResponseServerError { message, .. } => message.clone(),
        BollardError::DockerStreamError { error } => error.clone(),
        other => other.to_string(),
    };
    ImageError::PullFailed(format!("{image_name}: {detail}"))
}

fn map_network_create_error(e: BollardError, name: &str) -> NetworkError {
    match server_error(&e) {
        Some((409, _)) => NetworkError::AlreadyExists(name.to_string()),
        _ => NetworkError::Runtime(e.to_string()),
    }
}

fn map_volume_create_error(e: BollardError, name: &str) -> VolumeError {
    match server_error(&e) {
        Some((409, _)) => VolumeError::Conflict(name.to_string()),
        _ => VolumeError::Runtime(e.to_string()),
    }
}

fn map_state(status: ContainerStateStatusEnum) -> ContainerState {
    match status {
        ContainerStateStatusEnum::CREATED => ContainerState::Created,
        ContainerStateStatusEnum::RUNNING => ContainerState::Running,
        ContainerStateStatusEnum::PAUSED => ContainerState::Paused,
        ContainerStateStatusEnum::RESTARTING => ContainerState::Restarting,
        ContainerStateStatusEnum::REMOVING => ContainerState::Removing,
        ContainerStateStatusEnum::DEAD => ContainerState::Dead,
        _ => ContainerState::Exited,
    }
}

/// Pack a build context directory into an uncompressed tar archive.
fn tar_context(dir: &Path) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    builder.append_dir_all(".", dir)?;
    builder.into_inner()
}

// =============================================================================
// BollardRuntime
// =============================================================================

/// Container runtime implementation using bollard.
///
/// Podman is driven through its Docker-compatible socket; no libpod-only
/// endpoints are used.
pub struct BollardRuntime {
    client: Docker,
    runtime_type: RuntimeType,
}

impl BollardRuntime {
    pub fn new(client: Docker, runtime_type: RuntimeType) -> Self {
        Self {
            client,
            runtime_type,
        }
    }

    /// Connect to the runtime socket described by `endpoint`.
    pub fn connect(endpoint: &RuntimeEndpoint) -> Result<Self, RuntimeInfoError> {
        let client =
            Docker::connect_with_unix(&endpoint.socket_path, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| RuntimeInfoError::ConnectionFailed(e.to_string()))?;
        Ok(Self::new(client, endpoint.runtime_type))
    }

    pub fn runtime_type(&self) -> RuntimeType {
        self.runtime_type
    }
}

#[async_trait]
impl RuntimeInfo for BollardRuntime {
    async fn info(&self) -> Result<RuntimeMetadata, RuntimeInfoError> {
        let info = self
            .client
            .info()
            .await
            .map_err(|e| RuntimeInfoError::ConnectionFailed(e.to_string()))?;

        let name = match self.runtime_type {
            RuntimeType::Docker => "Docker".to_string(),
            RuntimeType::Podman => "Podman".to_string(),
        };

        Ok(RuntimeMetadata {
            name,
            version: info.server_version.unwrap_or_default(),
            api_version: bollard::API_DEFAULT_VERSION.to_string(),
            os: info.operating_system.unwrap_or_default(),
            arch: info.architecture.unwrap_or_default(),
        })
    }

    async fn ping(&self) -> Result<(), RuntimeInfoError> {
        self.client
            .ping()
            .await
            .map_err(|e| RuntimeInfoError::ConnectionFailed(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ImageOps for BollardRuntime {
    async fn pull_image(
        &self,
        reference: &ImageRef,
        auth: Option<&RegistryAuth>,
    ) -> Result<(), ImageError> {
        let image_name = reference.to_string();

        let opts = CreateImageOptions {
            from_image: Some(image_name.clone()),
            ..Default::default()
        };

        let credentials = auth.map(|a| bollard::auth::DockerCredentials {
            username: Some(a.username.clone()),
            password: Some(a.password.clone()),
            serveraddress: a.server.clone(),
            ..Default::default()
        });

        // Progress updates are discarded; only the terminal error matters.
        let mut stream = self.client.create_image(Some(opts), None, credentials);
        while let Some(result) = stream.next().await {
            let info = result.map_err(|e| map_image_pull_error(e, &image_name))?;
            if let Some(detail) = info.error_detail {
                return Err(ImageError::PullFailed(format!(
                    "{image_name}: {}",
                    detail.message.unwrap_or_default()
                )));
            }
        }

        Ok(())
    }

    async fn build_image(&self, request: &BuildRequest) -> Result<BuildOutput, ImageError> {
        let context_dir = request.context_dir.clone();
        let archive = tokio::task::spawn_blocking(move || tar_context(&context_dir))
            .await
            .map_err(|e| ImageError::Runtime(format!("build context task failed: {e}")))?
            .map_err(|e| ImageError::BuildFailed {
                message: format!("failed to archive build context: {e}"),
                log: Vec::new(),
            })?;

        let opts = BuildImageOptions {
            dockerfile: request.dockerfile.clone(),
            t: Some(request.tag.to_string()),
            buildargs: Some(request.build_args.clone()),
            labels: Some(request.labels.clone()),
            rm: true,
            forcerm: true,
            ..Default::default()
        };

        let mut log = Vec::new();
        let mut stream =
            self.client
                .build_image(opts, None, Some(bollard::body_full(archive.into())));
        while let Some(result) = stream.next().await {
            let info = match result {
                Ok(info) => info,
                Err(e) => {
                    return Err(ImageError::BuildFailed {
                        message: e.to_string(),
                        log,
                    });
                }
            };
            if let Some(detail) = info.error_detail {
                return Err(ImageError::BuildFailed {
                    message: detail.message.unwrap_or_else(|| "unknown build error".into()),
                    log,
                });
            }
            if let Some(text) = info.stream {
                log.extend(
                    text.lines()
                        .map(str::trim_end)
                        .filter(|l| !l.is_empty())
                        .map(String::from),
                );
            }
        }

        Ok(BuildOutput { log })
    }

    async fn image_exists(&self, reference: &ImageRef) -> Result<bool, ImageError> {
        let image_name = reference.to_string();

        match self.client.inspect_image(&image_name).await {
            Ok(_) => Ok(true),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(ImageError::Runtime(format!(
                "failed to inspect {image_name}: {e}"
            ))),
        }
    }
}

#[async_trait]
impl ContainerOps for BollardRuntime {
    async fn create_container(
        &self,
        config: &ContainerConfig,
    ) -> Result<ContainerId, ContainerError> {
        let env: Vec<String> = config
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        let mut host_config = HostConfig {
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
                maximum_retry_count: None,
            }),
            ..Default::default()
        };

        if let Some(resources) = &config.resources {
            host_config.memory = resources.memory_bytes;
            host_config.nano_cpus = resources.nano_cpus;
        }

        let mounts: Vec<Mount> = config
            .volumes
            .iter()
            .map(|m| Mount {
                source: Some(m.source.clone()),
                target: Some(m.target.clone()),
                typ: Some(match m.kind {
                    MountKind::Bind => MountTypeEnum::BIND,
                    MountKind::Volume => MountTypeEnum::VOLUME,
                }),
                read_only: Some(m.read_only),
                ..Default::default()
            })
            .collect();
        if !mounts.is_empty() {
            host_config.mounts = Some(mounts);
        }

        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        let mut exposed_ports: Vec<String> = Vec::new();
        for port in &config.ports {
            let key = format!("{}/tcp", port.container_port);
            exposed_ports.push(key.clone());
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(port.host_port.to_string()),
                }]),
            );
        }
        if !port_bindings.is_empty() {
            host_config.port_bindings = Some(port_bindings);
        }

        let networking_config = match &config.network {
            Some(network) => {
                host_config.network_mode = Some(network.clone());
                let endpoint = EndpointSettings {
                    aliases: (!config.network_aliases.is_empty())
                        .then(|| config.network_aliases.clone()),
                    ..Default::default()
                };
                Some(bollard::models::NetworkingConfig {
                    endpoints_config: Some(HashMap::from([(network.clone(), endpoint)])),
                })
            }
            None => None,
        };

        let body = ContainerCreateBody {
            image: Some(config.image.to_string()),
            env: (!env.is_empty()).then_some(env),
            labels: (!config.labels.is_empty()).then(|| config.labels.clone()),
            cmd: config.command.clone(),
            host_config: Some(host_config),
            exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
            networking_config,
            stop_timeout: config
                .stop_timeout
                .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX)),
            ..Default::default()
        };

        let opts = CreateContainerOptions {
            name: Some(config.name.clone()),
            ..Default::default()
        };

        let response = self
            .client
            .create_container(Some(opts), body)
            .await
            .map_err(|e| map_container_create_error(e, &config.name))?;

        Ok(ContainerId::new(response.id))
    }

    async fn start_container(&self, id: &ContainerId) -> Result<(), ContainerError> {
        self.client
            .start_container(
                id.as_str(),
                None::<bollard::query_parameters::StartContainerOptions>,
            )
            .await
            .map_err(map_container_start_error)
    }

    async fn stop_container(
        &self,
        id: &ContainerId,
        timeout: Duration,
    ) -> Result<(), ContainerError> {
        let opts = StopContainerOptions {
            t: Some(i32::try_from(timeout.as_secs()).unwrap_or(i32::MAX)),
            signal: None,
        };

        self.client
            .stop_container(id.as_str(), Some(opts))
            .await
            .map_err(map_container_stop_error)
    }

    async fn remove_container(&self, id: &ContainerId, force: bool) -> Result<(), ContainerError> {
        let opts = RemoveContainerOptions {
            force,
            ..Default::default()
        };

        self.client
            .remove_container(id.as_str(), Some(opts))
            .await
            .map_err(map_container_not_found_error)
    }

    async fn inspect_container(&self, id: &ContainerId) -> Result<ContainerInfo, ContainerError> {
        let details = self
            .client
            .inspect_container(id.as_str(), None::<InspectContainerOptions>)
            .await
            .map_err(map_container_not_found_error)?;

        let state = details
            .state
            .as_ref()
            .and_then(|s| s.status)
            .map(map_state)
            .unwrap_or(ContainerState::Exited);
        let exit_code = details.state.as_ref().and_then(|s| s.exit_code);

        Ok(ContainerInfo {
            id: id.clone(),
            name: details
                .name
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_string(),
            image: details
                .config
                .as_ref()
                .and_then(|c| c.image.clone())
                .unwrap_or_default(),
            state,
            exit_code,
            labels: details.config.and_then(|c| c.labels).unwrap_or_default(),
        })
    }

    async fn list_containers(
        &self,
        filters: &ContainerFilters,
    ) -> Result<Vec<ContainerSummary>, ContainerError> {
        let mut filter_map: HashMap<String, Vec<String>> = HashMap::new();

        if let Some(name) = &filters.name {
            filter_map.insert("name".to_string(), vec![name.clone()]);
        }

        for (key, value) in &filters.labels {
            filter_map
                .entry("label".to_string())
                .or_default()
                .push(format!("{key}={value}"));
        }

        let opts = ListContainersOptions {
            all: filters.all,
            filters: Some(filter_map),
            ..Default::default()
        };

        // Podman reports a transient "stopping" state that bollard cannot
        // deserialize; retry briefly.
        let mut last_error = None;
        for attempt in 0..3 {
            match self.client.list_containers(Some(opts.clone())).await {
                Ok(containers) => {
                    return Ok(containers
                        .into_iter()
                        .map(|c| {
                            let name = c
                                .names
                                .unwrap_or_default()
                                .first()
                                .map(|n| n.trim_start_matches('/').to_string())
                                .unwrap_or_default();
                            let published_ports = c
                                .ports
                                .unwrap_or_default()
                                .into_iter()
                                .filter_map(|p| p.public_port)
                                .collect();

                            ContainerSummary {
                                id: ContainerId::new(c.id.unwrap_or_default()),
                                name,
                                image: c.image.unwrap_or_default(),
                                state: c
                                    .state
                                    .map(|s| ContainerState::parse(&s.to_string()))
                                    .unwrap_or(ContainerState::Exited),
                                status: c.status.unwrap_or_default(),
                                labels: c.labels.unwrap_or_default(),
                                published_ports,
                            }
                        })
                        .collect());
                }
                Err(e) => {
                    let err_str = e.to_string();
                    if (err_str.contains("unknown variant `stopping`")
                        || err_str.contains("unknown variant `stopped`"))
                        && attempt < 2
                    {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                        last_error = Some(err_str);
                        continue;
                    }
                    return Err(ContainerError::Runtime(err_str));
                }
            }
        }

        Err(ContainerError::Runtime(
            last_error.unwrap_or_else(|| "list_containers failed".to_string()),
        ))
    }
}

#[async_trait]
impl NetworkOps for BollardRuntime {
    async fn create_network(&self, config: &NetworkConfig) -> Result<NetworkId, NetworkError> {
        let request = bollard::models::NetworkCreateRequest {
            name: config.name.clone(),
            driver: config.driver.clone(),
            labels: (!config.labels.is_empty()).then(|| config.labels.clone()),
            ..Default::default()
        };

        let response = self
            .client
            .create_network(request)
            .await
            .map_err(|e| map_network_create_error(e, &config.name))?;

        Ok(NetworkId::new(response.id))
    }

    async fn network_exists(&self, name: &str) -> Result<bool, NetworkError> {
        match self
            .client
            .inspect_network(name, None::<bollard::query_parameters::InspectNetworkOptions>)
            .await
        {
            Ok(_) => Ok(true),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(NetworkError::Runtime(e.to_string())),
        }
    }
}

#[async_trait]
impl VolumeOps for BollardRuntime {
    async fn create_volume(&self, config: &VolumeConfig) -> Result<VolumeId, VolumeError> {
        let request = VolumeCreateRequest {
            name: Some(config.name.clone()),
            labels: (!config.labels.is_empty()).then(|| config.labels.clone()),
            ..Default::default()
        };

        let volume = self
            .client
            .create_volume(request)
            .await
            .map_err(|e| map_volume_create_error(e, &config.name))?;

        Ok(VolumeId::new(volume.name))
    }
}

#[async_trait]
impl LogOps for BollardRuntime {
    async fn container_logs(
        &self,
        id: &ContainerId,
        opts: &LogOptions,
    ) -> Result<LogLineStream, LogError> {
        let log_opts = LogsOptions {
            stdout: opts.stdout,
            stderr: opts.stderr,
            follow: opts.follow,
            tail: opts
                .tail
                .map(|n| n.to_string())
                .unwrap_or_else(|| "all".to_string()),
            ..Default::default()
        };

        let stream = self.client.logs(id.as_str(), Some(log_opts)).map(|result| {
            result
                .map(|output| {
                    let (stream, data) = match output {
                        bollard::container::LogOutput::StdErr { message } => {
                            (LogStream::Stderr, message)
                        }
                        bollard::container::LogOutput::StdOut { message }
                        | bollard::container::LogOutput::StdIn { message }
                        | bollard::container::LogOutput::Console { message } => {
                            (LogStream::Stdout, message)
                        }
                    };

                    LogLine {
                        content: String::from_utf8_lossy(&data).trim_end().to_string(),
                        stream,
                    }
                })
                .map_err(|e| match server_error(&e) {
                    Some((404, message)) => LogError::ContainerNotFound(message.to_string()),
                    _ => LogError::StreamError(e.to_string()),
                })
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_port_conflict_messages() {
        assert!(is_port_conflict(
            "driver failed programming external connectivity on endpoint web: Bind for 0.0.0.0:20001 failed: port is already allocated"
        ));
        assert!(is_port_conflict(
            "rootlessport listen tcp 0.0.0.0:20001: bind: address already in use"
        ));
        assert!(!is_port_conflict("no such image: nginx:nope"));
    }

    #[test]
    fn name_conflicts_map_to_already_exists() {
        let err = map_container_create_error(
            BollardError::DockerResponseServerError {
                status_code: 409,
                message: "Conflict. The container name \"/web-1\" is already in use".into(),
            },
            "web-1",
        );
        assert!(matches!(err, ContainerError::AlreadyExists(name) if name == "web-1"));
    }
}
