// ABOUTME: Builds a controller from configuration for CLI commands.
// ABOUTME: Connects the runtime, opens the state store and syncs the catalog.

use slipway::config::{Catalog, Config, RepoOverrides};
use slipway::deploy::{Controller, ControllerSettings};
use slipway::engine::{Engine, NetProbe};
use slipway::error::{Error, Result};
use slipway::integrations::{Collaborators, FileRouter, GitCli, NoopRouter, Router};
use slipway::output::Output;
use slipway::runtime::{
    BollardRuntime, ContainerRuntime, RuntimeError, RuntimeInfo, resolve_endpoint,
};
use slipway::store::{FileStore, Store};
use slipway::types::ServiceId;
use std::sync::Arc;

/// A connected controller plus the catalog it was synced from.
pub struct CommandContext {
    pub controller: Controller,
    pub catalog: Catalog,
}

impl CommandContext {
    pub async fn connect(config: &Config, output: &Output) -> Result<Self> {
        output.progress("  → Detecting runtime...");
        let endpoint = resolve_endpoint(&config.runtime).map_err(RuntimeError::from)?;
        output.progress(&format!(
            "  → Found {} at {}",
            endpoint.runtime_type, endpoint.socket_path
        ));
        let runtime = BollardRuntime::connect(&endpoint).map_err(|source| {
            RuntimeError::Connection {
                socket: endpoint.socket_path.clone(),
                source,
            }
        })?;
        let connection_err = |source| RuntimeError::Connection {
            socket: endpoint.socket_path.clone(),
            source,
        };
        runtime.ping().await.map_err(connection_err)?;
        let info = runtime.info().await.map_err(connection_err)?;
        output.progress(&format!(
            "  → Connected to {} {} ({}/{})",
            info.name, info.version, info.os, info.arch
        ));
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(runtime);
        let engine = Arc::new(Engine::new(
            runtime,
            Arc::new(NetProbe),
            config.engine_settings(),
        ));

        let store: Arc<dyn Store> = Arc::new(FileStore::open(&config.state_dir).await?);
        let catalog = config.catalog()?;
        sync_catalog(store.as_ref(), &catalog).await?;

        let router: Arc<dyn Router> = match config.routes_path() {
            Some(path) => Arc::new(FileRouter::new(path)),
            None => Arc::new(NoopRouter),
        };
        let collaborators = Collaborators {
            source: Arc::new(GitCli::new(config.installation_tokens())),
            registries: Arc::new(config.registry_credentials()?),
            router,
            overrides: Arc::new(RepoOverrides),
        };

        let controller = Controller::new(
            store,
            engine,
            collaborators,
            ControllerSettings::new(&config.state_dir).with_file_locks(),
        );
        Ok(Self {
            controller,
            catalog,
        })
    }

    /// Resolve `project/environment/service` or a raw service id.
    pub fn service_id(&self, arg: &str) -> Result<ServiceId> {
        let candidate = match arg.split('/').collect::<Vec<_>>().as_slice() {
            [project, environment, service] => {
                slipway::config::service_id(project, environment, service)
            }
            _ => ServiceId::new(arg),
        };
        self.catalog
            .services
            .iter()
            .find(|s| s.id == candidate)
            .map(|s| s.id.clone())
            .ok_or_else(|| Error::UnknownService(arg.to_string()))
    }
}

/// Upsert configured projects, environments and services.
pub async fn sync_catalog(store: &dyn Store, catalog: &Catalog) -> Result<()> {
    for project in &catalog.projects {
        store.put_project(project.clone()).await?;
    }
    for environment in &catalog.environments {
        store.put_environment(environment.clone()).await?;
    }
    for service in &catalog.services {
        store.put_service(service.clone()).await?;
    }
    tracing::debug!(services = catalog.services.len(), "catalog synced");
    Ok(())
}
