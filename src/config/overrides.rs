// ABOUTME: Per-repository overrides read from .slipway.yml in a checkout.
// ABOUTME: Stored service values first, then any field the override sets wins.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::ResourcesConfig;
use crate::error::{Error, Result};
use crate::model::{Service, ServiceSource};

pub const OVERRIDE_FILENAME: &str = ".slipway.yml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoOverride {
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub dockerfile: Option<String>,
    #[serde(default)]
    pub health_check: Option<HealthCheckOverride>,
    #[serde(default)]
    pub resources: Option<ResourcesConfig>,
    #[serde(default)]
    pub replicas: Option<u32>,
    #[serde(default)]
    pub stop: Option<StopOverride>,
}

/// Unlike the service config, every field is optional so unset ones keep
/// the stored value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthCheckOverride {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StopOverride {
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub drain_delay: Option<Duration>,
}

impl RepoOverride {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let parsed: RepoOverride = serde_yaml::from_str(yaml)?;
        if parsed.replicas == Some(0) {
            return Err(Error::InvalidConfig(
                "override replicas must be at least 1".to_string(),
            ));
        }
        Ok(parsed)
    }

    /// Merge onto the service values used for one deployment.
    pub fn apply(&self, service: &mut Service) -> Result<()> {
        if let Some(port) = self.port {
            service.container_port = port;
        }
        if let Some(dockerfile) = &self.dockerfile
            && let ServiceSource::Repository {
                dockerfile: current,
                ..
            } = &mut service.source
        {
            *current = dockerfile.clone();
        }
        if let Some(health) = &self.health_check {
            if let Some(path) = &health.path {
                // An empty path switches the probe to TCP.
                service.health_check.path = Some(path.clone()).filter(|p| !p.is_empty());
            }
            if let Some(timeout) = health.timeout {
                service.health_check.timeout = timeout;
            }
        }
        if let Some(resources) = &self.resources {
            let limits = resources.to_limits()?;
            if limits.memory_bytes.is_some() {
                service.resources.memory_bytes = limits.memory_bytes;
            }
            if limits.nano_cpus.is_some() {
                service.resources.nano_cpus = limits.nano_cpus;
            }
        }
        if let Some(replicas) = self.replicas {
            service.replicas = replicas;
        }
        if let Some(stop) = &self.stop {
            if let Some(timeout) = stop.timeout {
                service.stop_timeout = timeout;
            }
            if stop.drain_delay.is_some() {
                service.drain_delay = stop.drain_delay;
            }
        }
        Ok(())
    }
}

#[async_trait]
pub trait OverrideLoader: Send + Sync {
    /// Parse the override in a checkout, if the repository carries one.
    async fn load(&self, checkout: &Path) -> Result<Option<RepoOverride>>;
}

/// Reads `.slipway.yml` from the checkout root.
#[derive(Debug, Clone, Copy, Default)]
pub struct RepoOverrides;

#[async_trait]
impl OverrideLoader for RepoOverrides {
    async fn load(&self, checkout: &Path) -> Result<Option<RepoOverride>> {
        let path = checkout.join(OVERRIDE_FILENAME);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                debug!(path = %path.display(), "found repository override");
                RepoOverride::from_yaml(&content).map(Some)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
