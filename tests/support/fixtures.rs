// ABOUTME: Wires a controller to the fake engine and in-memory collaborators.
// ABOUTME: Also provides service records and small polling helpers.

use super::fake_runtime::FakeRuntime;
use async_trait::async_trait;
use parking_lot::Mutex;
use slipway::config::RepoOverrides;
use slipway::deploy::{Controller, ControllerSettings};
use slipway::engine::{Engine, EngineSettings, HealthProbe, ProbeTarget, PullRetryPolicy};
use slipway::integrations::{
    Checkout, CheckoutRequest, Collaborators, ConfiguredRegistries, PullRequestComment, Route,
    Router, RoutingError, SourceError, SourceProvider, StatusReport,
};
use slipway::model::{
    Deployment, DeploymentStatus, Environment, HealthCheck, Project, Service, ServiceSource,
    VolumeKind, VolumeSpec,
};
use slipway::store::{FileStore, MemoryStore, Store};
use slipway::types::{DeploymentId, EnvironmentId, ProjectId, ServiceId, ServiceName};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

pub const PORT_START: u16 = 31000;
pub const PORT_END: u16 = 31049;

/// Healthy unless told otherwise; specific ports can be marked unhealthy.
#[derive(Default)]
pub struct ScriptedProbe {
    all_unhealthy: AtomicBool,
    unhealthy_ports: Mutex<HashSet<u16>>,
    probes: AtomicUsize,
}

impl ScriptedProbe {
    pub fn set_unhealthy(&self, unhealthy: bool) {
        self.all_unhealthy.store(unhealthy, Ordering::SeqCst);
    }

    pub fn fail_port(&self, port: u16) {
        self.unhealthy_ports.lock().insert(port);
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self, target: &ProbeTarget, _timeout: Duration) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        !self.all_unhealthy.load(Ordering::SeqCst)
            && !self.unhealthy_ports.lock().contains(&target.host_port)
    }
}

#[derive(Default)]
pub struct RecordingRouter {
    syncs: Mutex<Vec<Vec<Route>>>,
    fail: AtomicBool,
}

impl RecordingRouter {
    pub fn syncs(&self) -> Vec<Vec<Route>> {
        self.syncs.lock().clone()
    }

    pub fn last(&self) -> Option<Vec<Route>> {
        self.syncs.lock().last().cloned()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Router for RecordingRouter {
    async fn sync(&self, routes: &[Route]) -> Result<(), RoutingError> {
        self.syncs.lock().push(routes.to_vec());
        if self.fail.load(Ordering::SeqCst) {
            return Err(RoutingError::Write {
                path: "routes.json".to_string(),
                source: std::io::Error::other("proxy unreachable"),
            });
        }
        Ok(())
    }
}

/// Writes a Dockerfile (and optional override) into the requested checkout.
pub struct FakeSource {
    pub commit_sha: String,
    pub override_yaml: Mutex<Option<String>>,
    requests: Mutex<Vec<CheckoutRequest>>,
    reports: Mutex<Vec<StatusReport>>,
    comments: Mutex<Vec<PullRequestComment>>,
    fail_comments: AtomicBool,
}

impl Default for FakeSource {
    fn default() -> Self {
        Self {
            commit_sha: "4f2a9c1d0b7e8a6f5c3d2e1f0a9b8c7d6e5f4a3b".to_string(),
            override_yaml: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            reports: Mutex::new(Vec::new()),
            comments: Mutex::new(Vec::new()),
            fail_comments: AtomicBool::new(false),
        }
    }
}

impl FakeSource {
    pub fn set_override(&self, yaml: &str) {
        *self.override_yaml.lock() = Some(yaml.to_string());
    }

    pub fn requests(&self) -> Vec<CheckoutRequest> {
        self.requests.lock().clone()
    }

    pub fn reports(&self) -> Vec<StatusReport> {
        self.reports.lock().clone()
    }

    pub fn comments(&self) -> Vec<PullRequestComment> {
        self.comments.lock().clone()
    }

    /// Make the pull request API reject every comment.
    pub fn fail_comments(&self) {
        self.fail_comments.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SourceProvider for FakeSource {
    async fn clone_token(&self, installation: &str) -> Result<Option<String>, SourceError> {
        Ok(Some(format!("token-for-{installation}")))
    }

    async fn checkout(&self, request: &CheckoutRequest) -> Result<Checkout, SourceError> {
        self.requests.lock().push(request.clone());
        tokio::fs::create_dir_all(&request.dest).await?;
        tokio::fs::write(request.dest.join("Dockerfile"), "FROM scratch\n").await?;
        let override_yaml = self.override_yaml.lock().clone();
        if let Some(yaml) = override_yaml {
            tokio::fs::write(request.dest.join(".slipway.yml"), yaml).await?;
        }
        Ok(Checkout {
            dir: request.dest.clone(),
            commit_sha: request
                .commit
                .clone()
                .unwrap_or_else(|| self.commit_sha.clone()),
            commit_message: Some("Fix checkout flow".to_string()),
        })
    }

    async fn report_status(&self, report: &StatusReport) -> Result<(), SourceError> {
        self.reports.lock().push(report.clone());
        Ok(())
    }

    async fn comment_on_pull_request(
        &self,
        comment: &PullRequestComment,
    ) -> Result<(), SourceError> {
        if self.fail_comments.load(Ordering::SeqCst) {
            return Err(SourceError::ReportFailed("pull request API unavailable".to_string()));
        }
        self.comments.lock().push(comment.clone());
        Ok(())
    }
}

pub fn engine_settings() -> EngineSettings {
    EngineSettings {
        port_range: PORT_START..=PORT_END,
        check_host_bind: false,
        probe_interval: Duration::from_millis(10),
        probe_timeout: Duration::from_millis(20),
        down_threshold: 2,
        pull_retry: PullRetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        },
        stop_grace: Duration::from_millis(10),
        log_tail: 20,
    }
}

/// A controller over fakes, plus handles to inspect them.
pub struct Harness {
    pub controller: Controller,
    pub runtime: Arc<FakeRuntime>,
    pub probe: Arc<ScriptedProbe>,
    pub router: Arc<RecordingRouter>,
    pub source: Arc<FakeSource>,
    pub store: Arc<MemoryStore>,
    pub state_dir: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        super::init_tracing();
        let runtime = Arc::new(FakeRuntime::new());
        let probe = Arc::new(ScriptedProbe::default());
        let router = Arc::new(RecordingRouter::default());
        let source = Arc::new(FakeSource::default());
        let store = Arc::new(MemoryStore::new());
        let state_dir = TempDir::new().unwrap();

        let engine = Arc::new(Engine::new(
            runtime.clone(),
            probe.clone(),
            engine_settings(),
        ));
        let mut registries = ConfiguredRegistries::new();
        registries.insert("ghcr.io", "deploy".to_string(), "secret".to_string());
        let collaborators = Collaborators {
            source: source.clone(),
            registries: Arc::new(registries),
            router: router.clone(),
            overrides: Arc::new(RepoOverrides),
        };
        let controller = Controller::new(
            store.clone(),
            engine,
            collaborators,
            ControllerSettings::new(state_dir.path()).with_file_locks(),
        );

        seed_shop(store.as_ref()).await;

        Self {
            controller,
            runtime,
            probe,
            router,
            source,
            store,
            state_dir,
        }
    }

    pub async fn add_service(&self, service: Service) -> ServiceId {
        let id = service.id.clone();
        self.store.put_service(service).await.unwrap();
        id
    }

    pub async fn deployment(&self, id: &DeploymentId) -> Deployment {
        self.store.deployment(id).await.unwrap().unwrap()
    }

    pub async fn service(&self, id: &ServiceId) -> Service {
        self.store.service(id).await.unwrap().unwrap()
    }

    /// Deploy and wait for the pipeline to settle.
    pub async fn deploy_and_wait(&self, service: &ServiceId) -> Deployment {
        let id = self
            .controller
            .deploy(service, Default::default())
            .await
            .unwrap();
        self.controller.wait(&id).await.unwrap();
        self.deployment(&id).await
    }

    pub fn locks_are_idle(&self) -> bool {
        self.controller.locks().held_keys() == 0
    }

    pub async fn deployments_with(&self, service: &ServiceId, status: DeploymentStatus) -> Vec<Deployment> {
        self.store
            .deployments_for_service(service, &[status])
            .await
            .unwrap()
    }
}

/// Project `shop` with environment `shop-prod`.
async fn seed_shop(store: &dyn Store) {
    store
        .put_project(Project {
            id: ProjectId::new("shop"),
            name: "shop".to_string(),
            env: BTreeMap::from([("LOG_LEVEL".to_string(), "info".to_string())]),
        })
        .await
        .unwrap();
    store
        .put_environment(Environment {
            id: EnvironmentId::new("shop-prod"),
            project_id: ProjectId::new("shop"),
            name: "prod".to_string(),
            env: BTreeMap::from([("LOG_LEVEL".to_string(), "warn".to_string())]),
        })
        .await
        .unwrap();
}

/// Two controllers with their own `FileStore` handles on one state dir,
/// the way two CLI invocations share it. The engine side is shared.
pub struct SharedStateDir {
    pub first: Controller,
    pub second: Controller,
    pub runtime: Arc<FakeRuntime>,
    pub state_dir: TempDir,
}

impl SharedStateDir {
    pub async fn new() -> Self {
        super::init_tracing();
        let runtime = Arc::new(FakeRuntime::new());
        let probe = Arc::new(ScriptedProbe::default());
        let state_dir = TempDir::new().unwrap();
        let collaborators = Collaborators {
            source: Arc::new(FakeSource::default()),
            registries: Arc::new(ConfiguredRegistries::new()),
            router: Arc::new(RecordingRouter::default()),
            overrides: Arc::new(RepoOverrides),
        };

        let mut controllers = Vec::new();
        for _ in 0..2 {
            let store = Arc::new(FileStore::open(state_dir.path()).await.unwrap());
            let engine = Arc::new(Engine::new(
                runtime.clone(),
                probe.clone(),
                engine_settings(),
            ));
            controllers.push(Controller::new(
                store,
                engine,
                collaborators.clone(),
                ControllerSettings::new(state_dir.path()).with_file_locks(),
            ));
        }
        let second = controllers.pop().unwrap();
        let first = controllers.pop().unwrap();
        seed_shop(first.store().as_ref()).await;

        Self {
            first,
            second,
            runtime,
            state_dir,
        }
    }

    /// A fresh handle, as a later process would open it.
    pub async fn reopen(&self) -> FileStore {
        FileStore::open(self.state_dir.path()).await.unwrap()
    }
}

/// An image-backed service in shop/prod.
pub fn image_service(name: &str, image: &str, replicas: u32) -> Service {
    Service {
        id: ServiceId::new(format!("shop-prod-{name}")),
        name: ServiceName::new(name).unwrap(),
        project_id: ProjectId::new("shop"),
        environment_id: EnvironmentId::new("shop-prod"),
        source: ServiceSource::Image {
            image: image.to_string(),
        },
        container_port: 8080,
        health_check: HealthCheck {
            path: Some("/health".to_string()),
            timeout: Duration::from_millis(300),
        },
        replicas,
        env: BTreeMap::from([("APP_MODE".to_string(), "web".to_string())]),
        volumes: Vec::new(),
        resources: Default::default(),
        command: None,
        drain_delay: None,
        stop_timeout: Duration::from_millis(10),
        domains: Vec::new(),
        network: "slipway-shop-prod".to_string(),
        current_deployment_id: None,
    }
}

pub fn repo_service(name: &str) -> Service {
    Service {
        source: ServiceSource::Repository {
            url: "https://github.com/acme/shop.git".to_string(),
            branch: "main".to_string(),
            dockerfile: "Dockerfile".to_string(),
            context: ".".to_string(),
            installation: Some("acme".to_string()),
        },
        ..image_service(name, "unused:1", 1)
    }
}

pub fn named_volume(name: &str, target: &str) -> VolumeSpec {
    VolumeSpec {
        name: name.to_string(),
        target: target.to_string(),
        kind: VolumeKind::Named,
        read_only: false,
    }
}
