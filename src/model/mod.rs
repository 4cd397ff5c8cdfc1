// ABOUTME: Persisted records: projects, environments, services, deployments, replicas.
// ABOUTME: Plain data; transitions and orchestration live in deploy/.

mod deployment;
mod replica;
mod service;

pub use deployment::{Deployment, DeploymentStatus, DeploymentUpdate, NewDeployment, Trigger};
pub use replica::{Replica, ReplicaStatus};
pub use service::{
    Environment, HealthCheck, Project, Resources, Service, ServiceSource, VolumeKind, VolumeSpec,
};
