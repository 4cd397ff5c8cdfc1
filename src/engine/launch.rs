// ABOUTME: Container start with automatic host-port conflict retry.
// ABOUTME: Port and name conflicts are retried; any other failure is fatal.

use snafu::ResultExt;
use std::collections::HashSet;
use tracing::{debug, warn};

use super::error::{
    EngineResult, NoFreePortSnafu, PortsExhaustedSnafu, ReservedPortsSnafu, StartSnafu,
};
use super::{Engine, MAX_START_ATTEMPTS};
use crate::runtime::{ContainerConfig, ContainerError, PortMapping};
use crate::store::Store;
use crate::types::ContainerId;

/// What to run. `config.ports` is ignored; the host port is allocated here.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub config: ContainerConfig,
    pub container_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launched {
    pub container_id: ContainerId,
    pub host_port: u16,
    pub attempts: u32,
}

impl Engine {
    /// Create and start a container on a freshly allocated host port.
    ///
    /// The set of ports in use is re-read from the engine and the store on
    /// every attempt, since other pipelines may claim ports meanwhile.
    pub async fn run_with_port_retry(
        &self,
        spec: &LaunchSpec,
        store: &dyn Store,
    ) -> EngineResult<Launched> {
        let name = spec.config.name.as_str();
        let mut tried: HashSet<u16> = HashSet::new();

        for attempt in 1..=MAX_START_ATTEMPTS {
            let live = self.live_ports().await?;
            let reserved = store.active_host_ports().await.context(ReservedPortsSnafu)?;
            let Some(port) = self.ports.claim(&live, &reserved, &tried) else {
                let range = self.ports.range();
                return NoFreePortSnafu {
                    start: *range.start(),
                    end: *range.end(),
                }
                .fail();
            };

            debug!(container = name, port, attempt, "starting container");
            let result = self.create_and_start(spec, port).await;
            self.ports.release(port);

            match result {
                Ok(container_id) => {
                    return Ok(Launched {
                        container_id,
                        host_port: port,
                        attempts: attempt,
                    });
                }
                Err(ContainerError::PortInUse(message)) => {
                    warn!(container = name, port, attempt, %message, "host port taken, retrying");
                    tried.insert(port);
                }
                Err(ContainerError::AlreadyExists(_)) => {
                    warn!(container = name, attempt, "stale container holds the name, removing");
                    match self
                        .runtime
                        .remove_container(&ContainerId::new(name), true)
                        .await
                    {
                        Ok(()) | Err(ContainerError::NotFound(_)) => {}
                        Err(e) => return Err(e).context(StartSnafu { name }),
                    }
                }
                Err(e) => return Err(e).context(StartSnafu { name }),
            }
        }

        PortsExhaustedSnafu {
            attempts: MAX_START_ATTEMPTS,
            tried: sorted(tried),
        }
        .fail()
    }

    async fn create_and_start(
        &self,
        spec: &LaunchSpec,
        host_port: u16,
    ) -> Result<ContainerId, ContainerError> {
        let mut config = spec.config.clone();
        config.ports = vec![PortMapping {
            host_port,
            container_port: spec.container_port,
        }];

        let id = self.runtime.create_container(&config).await?;
        if let Err(start_error) = self.runtime.start_container(&id).await {
            // Free the name for the next attempt.
            if let Err(e) = self.runtime.remove_container(&id, true).await {
                debug!(container = %id, error = %e, "cleanup after failed start failed");
            }
            return Err(start_error);
        }
        Ok(id)
    }
}

fn sorted(ports: HashSet<u16>) -> Vec<u16> {
    let mut ports: Vec<u16> = ports.into_iter().collect();
    ports.sort_unstable();
    ports
}
