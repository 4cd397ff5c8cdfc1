// ABOUTME: Composable capability traits for container runtimes.
// ABOUTME: ContainerOps, ImageOps, NetworkOps, VolumeOps, LogOps, RuntimeInfo.

mod container;
mod image;
mod logs;
mod network;
mod runtime_info;
mod shared_types;
mod volume;

pub use container::{ContainerError, ContainerFilters, ContainerOps, ContainerSummary};
pub use image::{ImageError, ImageOps};
pub use logs::{LogError, LogLine, LogLineStream, LogOps, LogOptions, LogStream};
pub use network::{NetworkError, NetworkOps};
pub use runtime_info::{RuntimeInfo, RuntimeInfoError};
pub use shared_types::*;
pub use volume::{VolumeError, VolumeOps};

/// Everything the orchestrator needs from an engine, usable as one trait object.
pub trait ContainerRuntime:
    ContainerOps + ImageOps + NetworkOps + VolumeOps + LogOps + RuntimeInfo
{
}

impl<T> ContainerRuntime for T where
    T: ContainerOps + ImageOps + NetworkOps + VolumeOps + LogOps + RuntimeInfo
{
}
