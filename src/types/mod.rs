// ABOUTME: Type-safe identifiers and validated domain types.
// ABOUTME: Phantom-typed ids keep deployments, services and containers apart.

mod id;
mod image_ref;
mod service_name;

pub use id::{
    ContainerId, DeploymentId, EnvironmentId, Id, NetworkId, ProjectId, ReplicaId, ServiceId,
    VolumeId,
};
pub use image_ref::{ImageRef, ParseImageRefError};
pub use service_name::{ServiceName, ServiceNameError};
