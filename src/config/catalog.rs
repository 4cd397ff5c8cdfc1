// ABOUTME: Flattens the configured project tree into store records.
// ABOUTME: Ids are derived from names so repeated syncs update rows in place.

use std::collections::HashMap;

use super::{Config, ServiceConfig, resolve_env_map};
use crate::error::{Error, Result};
use crate::integrations::ConfiguredRegistries;
use crate::model::{
    Environment, HealthCheck, Project, Service, ServiceSource, VolumeKind, VolumeSpec,
};
use crate::types::{EnvironmentId, ProjectId, ServiceId, ServiceName};

pub fn environment_id(project: &str, environment: &str) -> EnvironmentId {
    EnvironmentId::new(format!("{project}-{environment}"))
}

pub fn service_id(project: &str, environment: &str, service: &str) -> ServiceId {
    ServiceId::new(format!("{project}-{environment}-{service}"))
}

/// Store records described by a config file.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub projects: Vec<Project>,
    pub environments: Vec<Environment>,
    pub services: Vec<Service>,
}

impl Config {
    /// Resolve env references and build the records to upsert.
    pub fn catalog(&self) -> Result<Catalog> {
        let mut catalog = Catalog::default();

        for (project_name, project) in &self.projects {
            let project_id = ProjectId::new(project_name.clone());
            catalog.projects.push(Project {
                id: project_id.clone(),
                name: project_name.clone(),
                env: resolve_env_map(&project.env)?,
            });

            for (env_name, environment) in &project.environments {
                let environment_id = environment_id(project_name, env_name);
                catalog.environments.push(Environment {
                    id: environment_id.clone(),
                    project_id: project_id.clone(),
                    name: env_name.clone(),
                    env: resolve_env_map(&environment.env)?,
                });

                let default_network = format!("slipway-{project_name}-{env_name}");
                for (service_name, service) in &environment.services {
                    catalog.services.push(service_record(
                        service_id(project_name, env_name, service_name),
                        service_name,
                        &project_id,
                        &environment_id,
                        &default_network,
                        service,
                    )?);
                }
            }
        }

        Ok(catalog)
    }

    pub fn registry_credentials(&self) -> Result<ConfiguredRegistries> {
        let mut registries = ConfiguredRegistries::new();
        for (host, registry) in &self.registries {
            registries.insert(host.clone(), registry.username.clone(), registry.password.resolve()?);
        }
        Ok(registries)
    }

    /// Clone tokens per installation. Unresolvable entries are skipped so one
    /// missing secret does not block unrelated deploys.
    pub fn installation_tokens(&self) -> HashMap<String, String> {
        self.installations
            .iter()
            .filter_map(|(name, value)| value.resolve().ok().map(|token| (name.clone(), token)))
            .collect()
    }
}

fn service_record(
    id: ServiceId,
    name: &str,
    project_id: &ProjectId,
    environment_id: &EnvironmentId,
    default_network: &str,
    config: &ServiceConfig,
) -> Result<Service> {
    let name = ServiceName::new(name).map_err(|e| Error::InvalidConfig(format!("{id}: {e}")))?;

    let source = match (&config.image, &config.repository) {
        (Some(image), _) => ServiceSource::Image {
            image: image.clone(),
        },
        (None, Some(repo)) => ServiceSource::Repository {
            url: repo.url.clone(),
            branch: repo.branch.clone(),
            dockerfile: repo.dockerfile.clone(),
            context: repo.context.clone(),
            installation: repo.installation.clone(),
        },
        (None, None) => {
            return Err(Error::InvalidConfig(format!(
                "{id}: one of image or repository is required"
            )));
        }
    };

    let volumes = config
        .volumes
        .iter()
        .map(|v| VolumeSpec {
            name: v.name.clone(),
            target: v.target.clone(),
            kind: match &v.host_path {
                Some(host_path) => VolumeKind::Bind {
                    host_path: host_path.clone(),
                },
                None => VolumeKind::Named,
            },
            read_only: v.read_only,
        })
        .collect();

    let stop = config.stop.clone().unwrap_or_default();

    Ok(Service {
        id,
        name,
        project_id: project_id.clone(),
        environment_id: environment_id.clone(),
        source,
        container_port: config.port,
        health_check: config
            .health_check
            .as_ref()
            .map(HealthCheck::from)
            .unwrap_or_default(),
        replicas: config.replicas,
        env: resolve_env_map(&config.env)?,
        volumes,
        resources: config
            .resources
            .as_ref()
            .map(|r| r.to_limits())
            .transpose()?
            .unwrap_or_default(),
        command: config.command.as_ref().map(|c| c.iter().cloned().collect()),
        drain_delay: stop.drain_delay,
        stop_timeout: stop.timeout,
        domains: config.domains.clone(),
        network: config
            .network
            .clone()
            .unwrap_or_else(|| default_network.to_string()),
        current_deployment_id: None,
    })
}
