// ABOUTME: Builds what every replica of a deployment shares before any container starts.
// ABOUTME: Network, named volumes, merged environment, labels, limits and Postgres TLS.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use super::DeployError;
use super::context::Core;
use super::tls;
use crate::model::{Deployment, Environment, Project, Service, Trigger, VolumeKind};
use crate::runtime::{ContainerConfig, MountKind, ResourceLimits, VolumeMount};
use crate::types::ImageRef;

pub const LABEL_MANAGED: &str = "slipway.managed";
pub const LABEL_SERVICE: &str = "slipway.service";
pub const LABEL_DEPLOYMENT: &str = "slipway.deployment";
pub const LABEL_REPLICA: &str = "slipway.replica";
const LABEL_PROJECT: &str = "slipway.project";
const LABEL_ENVIRONMENT: &str = "slipway.environment";

/// Set on every replica when a deployment runs more than one.
pub const REPLICA_INDEX_VAR: &str = "SLIPWAY_REPLICA_INDEX";

/// Everything needed to start one replica, minus its name, index and port.
#[derive(Debug, Clone)]
pub struct ReplicaTemplate {
    pub(crate) config: ContainerConfig,
    pub(crate) container_port: u16,
    pub(crate) count: u32,
    pub(crate) health_path: Option<String>,
    pub(crate) health_budget: Duration,
    pub(crate) stop_timeout: Duration,
}

impl ReplicaTemplate {
    /// Container config for replica `index` of a deployment.
    pub(crate) fn for_replica(&self, deployment: &Deployment, service: &Service, index: u32) -> ContainerConfig {
        let mut config = self.config.clone();
        config.name = service
            .name
            .container_name(deployment.id.short(), index, self.count);
        config
            .labels
            .insert(LABEL_REPLICA.to_string(), index.to_string());
        if self.count > 1 {
            config
                .env
                .insert(REPLICA_INDEX_VAR.to_string(), index.to_string());
        }
        config
    }
}

/// Labels identifying a managed container of `service`.
pub fn service_labels(service: &Service) -> HashMap<String, String> {
    HashMap::from([
        (LABEL_MANAGED.to_string(), "true".to_string()),
        (LABEL_SERVICE.to_string(), service.id.to_string()),
    ])
}

/// Platform variables first, then project, environment and service values;
/// later entries win.
pub fn merge_env(
    deployment: &Deployment,
    project: &Project,
    environment: &Environment,
    service: &Service,
) -> BTreeMap<String, String> {
    let mut env = platform_env(deployment, project, environment, service);
    for layer in [&project.env, &environment.env, &service.env] {
        env.extend(layer.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    env
}

fn platform_env(
    deployment: &Deployment,
    project: &Project,
    environment: &Environment,
    service: &Service,
) -> BTreeMap<String, String> {
    let mut env = BTreeMap::from([
        ("PORT".to_string(), deployment.container_port.to_string()),
        ("SLIPWAY_DEPLOYMENT_ID".to_string(), deployment.id.to_string()),
        ("SLIPWAY_SERVICE".to_string(), service.name.to_string()),
        ("SLIPWAY_PROJECT".to_string(), project.name.clone()),
        ("SLIPWAY_ENVIRONMENT".to_string(), environment.name.clone()),
    ]);
    if let Some(sha) = &deployment.commit_sha {
        env.insert("SLIPWAY_COMMIT_SHA".to_string(), sha.clone());
    }
    env
}

pub(crate) async fn provision(
    core: &Core,
    deployment: &Deployment,
    service: &Service,
    image: &ImageRef,
) -> Result<(ReplicaTemplate, BTreeMap<String, String>), DeployError> {
    let project = core
        .store
        .project(&service.project_id)
        .await?
        .ok_or_else(|| DeployError::missing("project", &service.project_id))?;
    let environment = core
        .store
        .environment(&service.environment_id)
        .await?
        .ok_or_else(|| DeployError::missing("environment", &service.environment_id))?;

    let mut scope_labels = HashMap::from([
        (LABEL_MANAGED.to_string(), "true".to_string()),
        (LABEL_PROJECT.to_string(), project.id.to_string()),
        (LABEL_ENVIRONMENT.to_string(), environment.id.to_string()),
    ]);
    core.engine
        .ensure_network(&service.network, scope_labels.clone())
        .await?;

    let mut mounts = Vec::with_capacity(service.volumes.len());
    for volume in &service.volumes {
        let mount = match &volume.kind {
            VolumeKind::Named => {
                let name = service
                    .name
                    .volume_name(environment.id.as_str(), &volume.name);
                scope_labels.insert(LABEL_SERVICE.to_string(), service.id.to_string());
                core.engine.ensure_volume(&name, scope_labels.clone()).await?;
                VolumeMount {
                    source: name,
                    target: volume.target.clone(),
                    read_only: volume.read_only,
                    kind: MountKind::Volume,
                }
            }
            VolumeKind::Bind { host_path } => VolumeMount {
                source: host_path.display().to_string(),
                target: volume.target.clone(),
                read_only: volume.read_only,
                kind: MountKind::Bind,
            },
        };
        mounts.push(mount);
    }

    // Rollbacks reuse the target's frozen environment.
    let env = if deployment.trigger == Trigger::Rollback {
        let mut env = deployment.env_vars_snapshot.clone();
        env.insert(
            "SLIPWAY_DEPLOYMENT_ID".to_string(),
            deployment.id.to_string(),
        );
        env
    } else {
        merge_env(deployment, &project, &environment, service)
    };

    let mut command = service.command.clone();
    if image.is_postgres() {
        let material = tls::ensure_postgres_tls(&core.settings.certs_dir(), service).await?;
        mounts.push(material.mount());
        if command.is_none() {
            command = Some(tls::postgres_command());
        }
    }

    let mut labels = service_labels(service);
    labels.insert(LABEL_DEPLOYMENT.to_string(), deployment.id.to_string());

    let resources = (service.resources.memory_bytes.is_some()
        || service.resources.nano_cpus.is_some())
    .then(|| ResourceLimits {
        memory_bytes: service.resources.memory_bytes,
        nano_cpus: service.resources.nano_cpus,
    });

    let config = ContainerConfig {
        name: String::new(),
        image: image.clone(),
        env: env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        labels,
        ports: Vec::new(),
        volumes: mounts,
        command,
        resources,
        stop_timeout: Some(service.stop_timeout),
        network: Some(service.network.clone()),
        network_aliases: vec![service.name.to_string()],
    };

    let template = ReplicaTemplate {
        config,
        container_port: deployment.container_port,
        count: deployment.replica_count.max(1),
        health_path: deployment.health_check_path.clone(),
        health_budget: deployment.health_check_timeout,
        stop_timeout: service.stop_timeout,
    };
    Ok((template, env))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeploymentStatus, HealthCheck, NewDeployment, Resources, ServiceSource};
    use crate::types::{DeploymentId, EnvironmentId, ProjectId, ServiceId, ServiceName};
    use chrono::Utc;

    fn fixtures() -> (Deployment, Project, Environment, Service) {
        let service = Service {
            id: ServiceId::new("shop-production-web"),
            name: ServiceName::new("web").unwrap(),
            project_id: ProjectId::new("shop"),
            environment_id: EnvironmentId::new("shop-production"),
            source: ServiceSource::Image {
                image: "nginx:1.27".to_string(),
            },
            container_port: 8080,
            health_check: HealthCheck::default(),
            replicas: 2,
            env: BTreeMap::from([("LEVEL".to_string(), "service".to_string())]),
            volumes: vec![],
            resources: Resources::default(),
            command: None,
            drain_delay: None,
            stop_timeout: Duration::from_secs(10),
            domains: vec![],
            network: "slipway-shop-production".to_string(),
            current_deployment_id: None,
        };
        let project = Project {
            id: ProjectId::new("shop"),
            name: "shop".to_string(),
            env: BTreeMap::from([
                ("LEVEL".to_string(), "project".to_string()),
                ("ONLY_PROJECT".to_string(), "1".to_string()),
            ]),
        };
        let environment = Environment {
            id: EnvironmentId::new("shop-production"),
            project_id: ProjectId::new("shop"),
            name: "production".to_string(),
            env: BTreeMap::from([
                ("LEVEL".to_string(), "environment".to_string()),
                ("PORT".to_string(), "9999".to_string()),
            ]),
        };
        let deployment = NewDeployment {
            service_id: service.id.clone(),
            environment_id: environment.id.clone(),
            commit_sha: Some("abc1234".to_string()),
            commit_message: None,
            image_name: Some("nginx:1.27".to_string()),
            container_port: 8080,
            health_check_path: None,
            health_check_timeout: Duration::from_secs(60),
            env_vars_snapshot: BTreeMap::new(),
            volumes_snapshot: vec![],
            replica_count: 2,
            rollback_source_id: None,
            trigger: Trigger::Manual,
            triggered_by: None,
        }
        .into_deployment(DeploymentId::new("0123456789abcdef"), Utc::now());
        assert_eq!(deployment.status, DeploymentStatus::Pending);
        (deployment, project, environment, service)
    }

    #[test]
    fn later_layers_win() {
        let (deployment, project, environment, service) = fixtures();
        let env = merge_env(&deployment, &project, &environment, &service);
        assert_eq!(env["LEVEL"], "service");
        assert_eq!(env["ONLY_PROJECT"], "1");
        assert_eq!(env["PORT"], "9999");
        assert_eq!(env["SLIPWAY_DEPLOYMENT_ID"], "0123456789abcdef");
        assert_eq!(env["SLIPWAY_COMMIT_SHA"], "abc1234");
    }

    #[test]
    fn replica_configs_are_named_and_indexed() {
        let (deployment, _, _, service) = fixtures();
        let template = ReplicaTemplate {
            config: ContainerConfig {
                name: String::new(),
                image: ImageRef::parse("nginx:1.27").unwrap(),
                env: HashMap::new(),
                labels: service_labels(&service),
                ports: vec![],
                volumes: vec![],
                command: None,
                resources: None,
                stop_timeout: None,
                network: None,
                network_aliases: vec![],
            },
            container_port: 8080,
            count: 2,
            health_path: None,
            health_budget: Duration::from_secs(60),
            stop_timeout: Duration::from_secs(10),
        };

        let second = template.for_replica(&deployment, &service, 1);
        assert_eq!(second.name, "web-01234567-1");
        assert_eq!(second.env[REPLICA_INDEX_VAR], "1");
        assert_eq!(second.labels[LABEL_REPLICA], "1");

        let single = ReplicaTemplate {
            count: 1,
            ..template
        };
        let only = single.for_replica(&deployment, &service, 0);
        assert_eq!(only.name, "web-01234567");
        assert!(!only.env.contains_key(REPLICA_INDEX_VAR));
    }
}
