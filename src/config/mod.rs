// ABOUTME: Configuration types and parsing for slipway.yml.
// ABOUTME: Host settings plus the project -> environment -> service catalog.

mod catalog;
mod deserialize;
mod env_value;
mod healthcheck;
mod init;
mod overrides;
mod resources;
mod stop;

pub use catalog::{Catalog, environment_id, service_id};
pub use env_value::{EnvValue, resolve_env_map};
pub use healthcheck::HealthcheckConfig;
pub use init::init_config;
pub use overrides::{
    HealthCheckOverride, OVERRIDE_FILENAME, OverrideLoader, RepoOverride, RepoOverrides,
    StopOverride,
};
pub use resources::{ResourcesConfig, parse_cpus, parse_memory};
pub use stop::StopConfig;

use deserialize::{deserialize_command, deserialize_image};

use crate::engine::{EngineSettings, PullRetryPolicy};
use crate::error::{Error, Result};
use crate::runtime::RuntimeConfig;
use crate::types::ServiceName;
use nonempty::NonEmpty;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "slipway.yml";
pub const CONFIG_FILENAME_ALT: &str = "slipway.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".slipway/config.yml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub ports: PortRangeConfig,

    #[serde(default)]
    pub probe: ProbeConfig,

    #[serde(default)]
    pub pull: PullRetryPolicy,

    #[serde(default = "default_stop_grace", with = "humantime_serde")]
    pub stop_grace: Duration,

    #[serde(default)]
    pub routing: Option<RoutingConfig>,

    #[serde(default)]
    pub registries: HashMap<String, RegistryConfig>,

    /// Clone tokens keyed by source installation.
    #[serde(default)]
    pub installations: HashMap<String, EnvValue>,

    #[serde(default)]
    pub projects: BTreeMap<String, ProjectConfig>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PortRangeConfig {
    pub start: u16,
    pub end: u16,
    /// Also test-bind candidate ports on the host.
    #[serde(default = "default_true")]
    pub check_host_bind: bool,
}

impl Default for PortRangeConfig {
    fn default() -> Self {
        Self {
            start: 20000,
            end: 29999,
            check_host_bind: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_interval", with = "humantime_serde")]
    pub interval: Duration,
    #[serde(default = "default_probe_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Consecutive exited/dead observations before giving up early.
    #[serde(default = "default_down_threshold")]
    pub down_threshold: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval: default_probe_interval(),
            timeout: default_probe_timeout(),
            down_threshold: default_down_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    /// Route table path; relative paths resolve under the state directory.
    #[serde(default = "default_routes_file")]
    pub file: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    pub username: String,
    pub password: EnvValue,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub env: HashMap<String, EnvValue>,
    pub environments: BTreeMap<String, EnvironmentConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub env: HashMap<String, EnvValue>,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryConfig {
    pub url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_dockerfile")]
    pub dockerfile: String,
    #[serde(default = "default_context")]
    pub context: String,
    #[serde(default)]
    pub installation: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VolumeConfig {
    pub name: String,
    pub target: String,
    /// Bind a host directory instead of an engine-managed volume.
    #[serde(default)]
    pub host_path: Option<PathBuf>,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default, deserialize_with = "deserialize_image")]
    pub image: Option<String>,
    #[serde(default)]
    pub repository: Option<RepositoryConfig>,
    pub port: u16,
    #[serde(default)]
    pub health_check: Option<HealthcheckConfig>,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default)]
    pub env: HashMap<String, EnvValue>,
    #[serde(default)]
    pub volumes: Vec<VolumeConfig>,
    #[serde(default)]
    pub resources: Option<ResourcesConfig>,
    #[serde(default, deserialize_with = "deserialize_command")]
    pub command: Option<NonEmpty<String>>,
    #[serde(default)]
    pub stop: Option<StopConfig>,
    #[serde(default)]
    pub domains: Vec<String>,
    /// Network override; defaults to the environment network.
    #[serde(default)]
    pub network: Option<String>,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/slipway")
}

fn default_stop_grace() -> Duration {
    Duration::from_secs(10)
}

fn default_true() -> bool {
    true
}

fn default_probe_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_down_threshold() -> u32 {
    3
}

fn default_routes_file() -> PathBuf {
    PathBuf::from("routes.json")
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_dockerfile() -> String {
    "Dockerfile".to_string()
}

fn default_context() -> String {
    ".".to_string()
}

fn default_replicas() -> u32 {
    1
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    fn validate(&self) -> Result<()> {
        if self.ports.start > self.ports.end {
            return Err(Error::InvalidConfig(format!(
                "port range start {} is above end {}",
                self.ports.start, self.ports.end
            )));
        }

        for (project, project_config) in &self.projects {
            for (environment, env_config) in &project_config.environments {
                for (name, service) in &env_config.services {
                    let at = format!("{project}/{environment}/{name}");
                    ServiceName::new(name)
                        .map_err(|e| Error::InvalidConfig(format!("{at}: {e}")))?;
                    match (&service.image, &service.repository) {
                        (Some(_), Some(_)) => {
                            return Err(Error::InvalidConfig(format!(
                                "{at}: set either image or repository, not both"
                            )));
                        }
                        (None, None) => {
                            return Err(Error::InvalidConfig(format!(
                                "{at}: one of image or repository is required"
                            )));
                        }
                        _ => {}
                    }
                    if service.replicas == 0 {
                        return Err(Error::InvalidConfig(format!(
                            "{at}: replicas must be at least 1"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Engine tuning derived from host settings.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            port_range: self.ports.start..=self.ports.end,
            check_host_bind: self.ports.check_host_bind,
            probe_interval: self.probe.interval,
            probe_timeout: self.probe.timeout,
            down_threshold: self.probe.down_threshold,
            pull_retry: self.pull.clone(),
            stop_grace: self.stop_grace,
            ..EngineSettings::default()
        }
    }

    /// Route table location, when routing is enabled.
    pub fn routes_path(&self) -> Option<PathBuf> {
        self.routing.as_ref().map(|r| {
            if r.file.is_absolute() {
                r.file.clone()
            } else {
                self.state_dir.join(&r.file)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
projects:
  shop:
    environments:
      production:
        services:
          web:
            image: nginx:1.27
            port: 80
"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.state_dir, PathBuf::from("/var/lib/slipway"));
        assert_eq!(config.ports.start, 20000);
        assert_eq!(config.pull.max_attempts, 4);
        let web = &config.projects["shop"].environments["production"].services["web"];
        assert_eq!(web.replicas, 1);
        assert!(config.routes_path().is_none());
    }

    #[test]
    fn image_and_repository_are_exclusive() {
        let yaml = r#"
projects:
  shop:
    environments:
      production:
        services:
          web:
            image: nginx
            repository: { url: "https://github.com/acme/web.git" }
            port: 80
"#;
        assert!(matches!(
            Config::from_yaml(yaml),
            Err(Error::InvalidConfig(msg)) if msg.contains("not both")
        ));
    }

    #[test]
    fn invalid_service_names_are_rejected() {
        let yaml = MINIMAL.replace("web:", "Web_App:");
        assert!(matches!(
            Config::from_yaml(&yaml),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn empty_command_is_rejected() {
        let yaml = format!("{MINIMAL}            command: []\n");
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn relative_routes_file_lives_in_state_dir() {
        let yaml = format!("state_dir: /srv/slipway\nrouting: {{}}\n{MINIMAL}");
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(
            config.routes_path(),
            Some(PathBuf::from("/srv/slipway/routes.json"))
        );
    }
}
