// ABOUTME: In-memory container engine for orchestration tests.
// ABOUTME: Scriptable pull failures, port conflicts, start failures and stubborn stops.

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;
use slipway::runtime::{
    BuildOutput, BuildRequest, ContainerConfig, ContainerError, ContainerFilters, ContainerInfo,
    ContainerOps, ContainerState, ContainerSummary, ImageError, ImageOps, LogError, LogLine,
    LogLineStream, LogOps, LogOptions, LogStream, NetworkConfig, NetworkError, NetworkOps,
    RegistryAuth, RuntimeInfo, RuntimeInfoError, RuntimeMetadata, VolumeConfig, VolumeError,
    VolumeOps,
};
use slipway::types::{ContainerId, ImageRef, NetworkId, VolumeId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: ContainerId,
    pub name: String,
    pub image: String,
    pub labels: HashMap<String, String>,
    pub env: HashMap<String, String>,
    pub state: ContainerState,
    pub host_ports: Vec<u16>,
}

/// Counters for every engine call that changes state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpCounts {
    pub pulls: usize,
    pub builds: usize,
    pub creates: usize,
    pub starts: usize,
    pub stops: usize,
    pub removes: usize,
    pub networks: usize,
    pub volumes: usize,
}

impl OpCounts {
    /// Calls that touch containers, networks or volumes.
    pub fn container_ops(&self) -> usize {
        self.creates + self.starts + self.stops + self.removes + self.networks + self.volumes
    }
}

#[derive(Default)]
struct State {
    containers: Vec<FakeContainer>,
    next_id: u64,
    images: HashSet<String>,
    networks: HashSet<String>,
    volumes: HashSet<String>,
    pull_script: VecDeque<Result<(), String>>,
    /// Ports held by something outside the engine.
    foreign_ports: HashSet<u16>,
    /// Replica indexes whose start fails with a fatal error.
    failing_replicas: HashSet<String>,
    /// Containers that ignore stop requests.
    stubborn: HashSet<String>,
    exit_on_start: bool,
    pull_delay: Duration,
    ops: OpCounts,
}

#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<State>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_image(&self, image: &str) {
        self.state.lock().images.insert(image.to_string());
    }

    pub fn remove_image(&self, image: &str) {
        self.state.lock().images.remove(image);
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.state.lock().images.contains(image)
    }

    /// Results for the next pulls, in order. Pulls past the script succeed.
    pub fn script_pulls(&self, results: Vec<Result<(), String>>) {
        self.state.lock().pull_script = results.into();
    }

    pub fn set_pull_delay(&self, delay: Duration) {
        self.state.lock().pull_delay = delay;
    }

    pub fn hold_foreign_ports(&self, ports: impl IntoIterator<Item = u16>) {
        self.state.lock().foreign_ports.extend(ports);
    }

    pub fn fail_replica(&self, index: u32) {
        self.state.lock().failing_replicas.insert(index.to_string());
    }

    pub fn exit_on_start(&self, exit: bool) {
        self.state.lock().exit_on_start = exit;
    }

    pub fn make_stubborn(&self, id: &ContainerId) {
        self.state.lock().stubborn.insert(id.as_str().to_string());
    }

    /// Simulate a container dying outside the orchestrator.
    pub fn kill(&self, id: &ContainerId) {
        if let Some(c) = self.state.lock().containers.iter_mut().find(|c| &c.id == id) {
            c.state = ContainerState::Exited;
        }
    }

    /// Plant a container as if left behind by an earlier process.
    pub fn plant(&self, name: &str, labels: HashMap<String, String>) -> ContainerId {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = ContainerId::new(format!("planted{}", state.next_id));
        state.containers.push(FakeContainer {
            id: id.clone(),
            name: name.to_string(),
            image: "planted:latest".to_string(),
            labels,
            env: HashMap::new(),
            state: ContainerState::Running,
            host_ports: Vec::new(),
        });
        id
    }

    pub fn ops(&self) -> OpCounts {
        self.state.lock().ops
    }

    pub fn containers(&self) -> Vec<FakeContainer> {
        self.state.lock().containers.clone()
    }

    pub fn live_containers(&self) -> Vec<FakeContainer> {
        self.containers()
            .into_iter()
            .filter(|c| c.state.is_live())
            .collect()
    }

    pub fn networks(&self) -> HashSet<String> {
        self.state.lock().networks.clone()
    }

    pub fn volumes(&self) -> HashSet<String> {
        self.state.lock().volumes.clone()
    }
}

fn matches(container: &FakeContainer, id: &ContainerId) -> bool {
    container.id == *id || container.name == id.as_str()
}

#[async_trait]
impl ContainerOps for FakeRuntime {
    async fn create_container(
        &self,
        config: &ContainerConfig,
    ) -> Result<ContainerId, ContainerError> {
        let mut state = self.state.lock();
        state.ops.creates += 1;
        if state.containers.iter().any(|c| c.name == config.name) {
            return Err(ContainerError::AlreadyExists(config.name.clone()));
        }
        state.next_id += 1;
        let id = ContainerId::new(format!("c{:04}", state.next_id));
        state.containers.push(FakeContainer {
            id: id.clone(),
            name: config.name.clone(),
            image: config.image.to_string(),
            labels: config.labels.clone(),
            env: config.env.clone(),
            state: ContainerState::Created,
            host_ports: config.ports.iter().map(|p| p.host_port).collect(),
        });
        Ok(id)
    }

    async fn start_container(&self, id: &ContainerId) -> Result<(), ContainerError> {
        let mut state = self.state.lock();
        state.ops.starts += 1;

        let in_use: HashSet<u16> = state
            .containers
            .iter()
            .filter(|c| c.state.is_live() && c.id != *id)
            .flat_map(|c| c.host_ports.clone())
            .chain(state.foreign_ports.iter().copied())
            .collect();
        let failing = state.failing_replicas.clone();
        let exit_on_start = state.exit_on_start;

        let container = state
            .containers
            .iter_mut()
            .find(|c| matches(c, id))
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;

        if let Some(port) = container.host_ports.iter().find(|p| in_use.contains(p)) {
            return Err(ContainerError::PortInUse(format!(
                "Bind for 0.0.0.0:{port} failed: port is already allocated"
            )));
        }
        if container
            .labels
            .get(slipway::deploy::LABEL_REPLICA)
            .is_some_and(|index| failing.contains(index))
        {
            return Err(ContainerError::Runtime(
                "OCI runtime create failed: exec format error".to_string(),
            ));
        }
        container.state = if exit_on_start {
            ContainerState::Exited
        } else {
            ContainerState::Running
        };
        Ok(())
    }

    async fn stop_container(
        &self,
        id: &ContainerId,
        _timeout: Duration,
    ) -> Result<(), ContainerError> {
        let mut state = self.state.lock();
        state.ops.stops += 1;
        let stubborn = state.stubborn.clone();
        let container = state
            .containers
            .iter_mut()
            .find(|c| matches(c, id))
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        if !container.state.is_live() {
            return Err(ContainerError::NotRunning(id.to_string()));
        }
        if !stubborn.contains(container.id.as_str()) {
            container.state = ContainerState::Exited;
        }
        Ok(())
    }

    async fn remove_container(&self, id: &ContainerId, force: bool) -> Result<(), ContainerError> {
        let mut state = self.state.lock();
        state.ops.removes += 1;
        let position = state
            .containers
            .iter()
            .position(|c| matches(c, id))
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        if state.containers[position].state.is_live() && !force {
            return Err(ContainerError::Runtime(format!(
                "cannot remove running container {id}"
            )));
        }
        state.containers.remove(position);
        Ok(())
    }

    async fn inspect_container(&self, id: &ContainerId) -> Result<ContainerInfo, ContainerError> {
        let state = self.state.lock();
        let container = state
            .containers
            .iter()
            .find(|c| matches(c, id))
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        Ok(ContainerInfo {
            id: container.id.clone(),
            name: container.name.clone(),
            image: container.image.clone(),
            state: container.state,
            exit_code: (!container.state.is_live()).then_some(1),
            labels: container.labels.clone(),
        })
    }

    async fn list_containers(
        &self,
        filters: &ContainerFilters,
    ) -> Result<Vec<ContainerSummary>, ContainerError> {
        let state = self.state.lock();
        Ok(state
            .containers
            .iter()
            .filter(|c| filters.all || c.state.is_live())
            .filter(|c| {
                filters
                    .labels
                    .iter()
                    .all(|(k, v)| c.labels.get(k) == Some(v))
            })
            .filter(|c| filters.name.as_ref().is_none_or(|n| c.name.contains(n)))
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                name: c.name.clone(),
                image: c.image.clone(),
                state: c.state,
                status: c.state.to_string(),
                labels: c.labels.clone(),
                published_ports: c.host_ports.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl ImageOps for FakeRuntime {
    async fn pull_image(
        &self,
        reference: &ImageRef,
        _auth: Option<&RegistryAuth>,
    ) -> Result<(), ImageError> {
        let (delay, result) = {
            let mut state = self.state.lock();
            state.ops.pulls += 1;
            (state.pull_delay, state.pull_script.pop_front().unwrap_or(Ok(())))
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match result {
            Ok(()) => {
                self.state.lock().images.insert(reference.to_string());
                Ok(())
            }
            Err(message) => Err(ImageError::PullFailed(message)),
        }
    }

    async fn build_image(&self, request: &BuildRequest) -> Result<BuildOutput, ImageError> {
        let mut state = self.state.lock();
        state.ops.builds += 1;
        if !request.context_dir.join(&request.dockerfile).exists() {
            return Err(ImageError::BuildFailed {
                message: format!("Dockerfile not found: {}", request.dockerfile),
                log: vec!["Step 1/2 : FROM scratch".to_string()],
            });
        }
        state.images.insert(request.tag.to_string());
        Ok(BuildOutput {
            log: vec![
                "Step 1/2 : FROM scratch".to_string(),
                format!("Successfully tagged {}", request.tag),
            ],
        })
    }

    async fn image_exists(&self, reference: &ImageRef) -> Result<bool, ImageError> {
        Ok(self.state.lock().images.contains(&reference.to_string()))
    }
}

#[async_trait]
impl NetworkOps for FakeRuntime {
    async fn create_network(&self, config: &NetworkConfig) -> Result<NetworkId, NetworkError> {
        let mut state = self.state.lock();
        state.ops.networks += 1;
        if !state.networks.insert(config.name.clone()) {
            return Err(NetworkError::AlreadyExists(config.name.clone()));
        }
        Ok(NetworkId::new(config.name.clone()))
    }

    async fn network_exists(&self, name: &str) -> Result<bool, NetworkError> {
        Ok(self.state.lock().networks.contains(name))
    }
}

#[async_trait]
impl VolumeOps for FakeRuntime {
    async fn create_volume(&self, config: &VolumeConfig) -> Result<VolumeId, VolumeError> {
        let mut state = self.state.lock();
        state.ops.volumes += 1;
        state.volumes.insert(config.name.clone());
        Ok(VolumeId::new(config.name.clone()))
    }
}

#[async_trait]
impl LogOps for FakeRuntime {
    async fn container_logs(
        &self,
        id: &ContainerId,
        _opts: &LogOptions,
    ) -> Result<LogLineStream, LogError> {
        if !self.state.lock().containers.iter().any(|c| matches(c, id)) {
            return Err(LogError::ContainerNotFound(id.to_string()));
        }
        let lines = vec![
            Ok(LogLine {
                content: "booting".to_string(),
                stream: LogStream::Stdout,
            }),
            Ok(LogLine {
                content: "panic: config missing".to_string(),
                stream: LogStream::Stderr,
            }),
        ];
        Ok(Box::pin(stream::iter(lines)))
    }
}

#[async_trait]
impl RuntimeInfo for FakeRuntime {
    async fn info(&self) -> Result<RuntimeMetadata, RuntimeInfoError> {
        Ok(RuntimeMetadata {
            name: "fake".to_string(),
            version: "0.0.0".to_string(),
            api_version: "1.45".to_string(),
            os: "linux".to_string(),
            arch: "x86_64".to_string(),
        })
    }

    async fn ping(&self) -> Result<(), RuntimeInfoError> {
        Ok(())
    }
}
