// ABOUTME: Pipeline state markers for the type state pattern.
// ABOUTME: Each marker carries what the next step needs, so steps cannot be skipped.

use crate::model::Replica;
use crate::types::ImageRef;

use super::provision::ReplicaTemplate;

/// Row inserted, nothing acquired yet.
/// Available actions: `acquire_artifact()`
#[derive(Debug, Clone, Copy, Default)]
pub struct Pending;

/// Image pulled, built, or verified present for a rollback.
/// Available actions: `provision()`
#[derive(Debug, Clone)]
pub struct ArtifactReady {
    pub(crate) image: ImageRef,
}

/// Network, volumes, env and TLS prepared.
/// Available actions: `start_replicas()`
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub(crate) template: ReplicaTemplate,
}

/// Every replica container is up on its own host port.
/// Available actions: `health_check()`, `teardown()`
#[derive(Debug, Clone)]
pub struct ReplicasStarted {
    pub(crate) template: ReplicaTemplate,
    pub(crate) replicas: Vec<Replica>,
}

/// All replicas answered their probe.
/// Available actions: `publish()`, `teardown()`
#[derive(Debug, Clone)]
pub struct Healthy {
    pub(crate) replicas: Vec<Replica>,
}

/// Marked running and set as the service's current deployment.
/// Available actions: `finish()`
#[derive(Debug, Clone)]
pub struct Published {
    pub(crate) replicas: Vec<Replica>,
}

impl ArtifactReady {
    pub fn image(&self) -> &ImageRef {
        &self.image
    }
}

impl ReplicasStarted {
    pub fn replicas(&self) -> &[Replica] {
        &self.replicas
    }
}

impl Healthy {
    pub fn replicas(&self) -> &[Replica] {
        &self.replicas
    }
}

impl Published {
    pub fn replicas(&self) -> &[Replica] {
        &self.replicas
    }
}
