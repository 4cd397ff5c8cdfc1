// ABOUTME: Container engine adapter used by the orchestrator.
// ABOUTME: Port-retrying launch, pull retry, health probing and verified stop.

mod error;
mod launch;
mod ports;
mod probe;
mod pull;
mod stop;

pub use error::{EngineError, EngineResult};
pub use launch::{LaunchSpec, Launched};
pub use ports::{PortAllocator, pick_port};
pub use probe::{HealthProbe, NetProbe, ProbeTarget};
pub use pull::{PullFailureClass, PullReport, PullRetryPolicy, classify_pull_failure};

use futures::StreamExt;
use snafu::ResultExt;
use std::collections::{HashMap, HashSet};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::runtime::{
    BuildOutput, BuildRequest, ContainerError, ContainerFilters, ContainerRuntime, ContainerState,
    ImageError, LogOptions, NetworkConfig, NetworkError, VolumeConfig,
};
use crate::types::{ContainerId, ImageRef, VolumeId};
use error::{BuildSnafu, ImageSnafu, InspectSnafu, NetworkSnafu, VolumeSnafu};

/// Attempt ceiling for port-conflict retries on container start.
pub const MAX_START_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub port_range: RangeInclusive<u16>,
    /// Also try binding candidate ports on the host before claiming them.
    pub check_host_bind: bool,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    /// Consecutive exited/dead observations before probing gives up.
    pub down_threshold: u32,
    pub pull_retry: PullRetryPolicy,
    pub stop_grace: Duration,
    pub log_tail: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            port_range: 20000..=29999,
            check_host_bind: true,
            probe_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(2),
            down_threshold: 3,
            pull_retry: PullRetryPolicy::default(),
            stop_grace: Duration::from_secs(10),
            log_tail: 50,
        }
    }
}

/// The orchestrator's view of the container engine.
pub struct Engine {
    runtime: Arc<dyn ContainerRuntime>,
    probe: Arc<dyn HealthProbe>,
    ports: PortAllocator,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        probe: Arc<dyn HealthProbe>,
        settings: EngineSettings,
    ) -> Self {
        let ports = PortAllocator::new(settings.port_range.clone(), settings.check_host_bind);
        Self {
            runtime,
            probe,
            ports,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Host ports currently published by running containers.
    pub async fn live_ports(&self) -> EngineResult<HashSet<u16>> {
        let containers = self
            .runtime
            .list_containers(&ContainerFilters::default())
            .await
            .context(InspectSnafu)?;
        Ok(containers
            .into_iter()
            .filter(|c| c.state.is_live())
            .flat_map(|c| c.published_ports)
            .collect())
    }

    /// Current state of a container; `None` once it no longer exists.
    pub async fn container_state(&self, id: &ContainerId) -> EngineResult<Option<ContainerState>> {
        match self.runtime.inspect_container(id).await {
            Ok(info) => Ok(Some(info.state)),
            Err(ContainerError::NotFound(_)) => Ok(None),
            Err(e) => Err(e).context(InspectSnafu),
        }
    }

    pub async fn is_live(&self, id: &ContainerId) -> EngineResult<bool> {
        Ok(self
            .container_state(id)
            .await?
            .is_some_and(ContainerState::is_live))
    }

    /// Containers carrying all of the given labels, running or not.
    pub async fn containers_labelled(
        &self,
        labels: HashMap<String, String>,
    ) -> EngineResult<Vec<crate::runtime::ContainerSummary>> {
        let filters = ContainerFilters {
            labels,
            name: None,
            all: true,
        };
        self.runtime
            .list_containers(&filters)
            .await
            .context(InspectSnafu)
    }

    /// Last log lines of a container, best-effort.
    pub async fn tail_logs(&self, id: &ContainerId) -> Vec<String> {
        let mut stream = match self
            .runtime
            .container_logs(id, &LogOptions::tail(self.settings.log_tail))
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                debug!(container = %id, error = %e, "could not read container logs");
                return Vec::new();
            }
        };
        let mut lines = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(line) => lines.push(line.content),
                Err(_) => break,
            }
        }
        lines
    }

    pub async fn ensure_network(
        &self,
        name: &str,
        labels: HashMap<String, String>,
    ) -> EngineResult<()> {
        if self
            .runtime
            .network_exists(name)
            .await
            .context(NetworkSnafu { name })?
        {
            return Ok(());
        }
        let config = NetworkConfig {
            name: name.to_string(),
            driver: Some("bridge".to_string()),
            labels,
        };
        match self.runtime.create_network(&config).await {
            Ok(_) | Err(NetworkError::AlreadyExists(_)) => Ok(()),
            Err(e) => Err(e).context(NetworkSnafu { name }),
        }
    }

    pub async fn ensure_volume(
        &self,
        name: &str,
        labels: HashMap<String, String>,
    ) -> EngineResult<VolumeId> {
        let config = VolumeConfig {
            name: name.to_string(),
            labels,
        };
        self.runtime
            .create_volume(&config)
            .await
            .context(VolumeSnafu { name })
    }

    pub async fn build(&self, request: &BuildRequest) -> EngineResult<BuildOutput> {
        self.runtime.build_image(request).await.context(BuildSnafu)
    }

    pub async fn image_exists(&self, image: &ImageRef) -> EngineResult<bool> {
        match self.runtime.image_exists(image).await {
            Ok(exists) => Ok(exists),
            Err(ImageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e).context(ImageSnafu),
        }
    }
}
