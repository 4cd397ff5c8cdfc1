// ABOUTME: Engine adapter error type with SNAFU context selectors.
// ABOUTME: Separates retry exhaustion, deterministic artifact failures and runtime failures.

use snafu::Snafu;

use super::pull::PullFailureClass;
use crate::runtime::{ContainerError, ImageError, NetworkError, VolumeError};
use crate::store::StoreError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EngineError {
    #[snafu(display("no free host port after {attempts} attempts (tried {tried:?})"))]
    PortsExhausted { attempts: u32, tried: Vec<u16> },

    #[snafu(display("no free host port left in {start}-{end}"))]
    NoFreePort { start: u16, end: u16 },

    #[snafu(display("failed to start container {name}: {source}"))]
    Start {
        name: String,
        source: ContainerError,
    },

    #[snafu(display("pull of {image} failed after {attempts} attempt(s) [{class}]: {message}"))]
    Pull {
        image: String,
        class: PullFailureClass,
        attempts: u32,
        message: String,
    },

    #[snafu(display("image build failed: {source}"))]
    Build { source: ImageError },

    #[snafu(display("image operation failed: {source}"))]
    Image { source: ImageError },

    #[snafu(display("container {container} is unhealthy: {reason}"))]
    Unhealthy { container: String, reason: String },

    #[snafu(display("failed to stop container {container}: {source}"))]
    Stop {
        container: String,
        source: ContainerError,
    },

    #[snafu(display("container {container} is still running after forced removal"))]
    StillRunning { container: String },

    #[snafu(display("container query failed: {source}"))]
    Inspect { source: ContainerError },

    #[snafu(display("failed to create network {name}: {source}"))]
    Network { name: String, source: NetworkError },

    #[snafu(display("failed to create volume {name}: {source}"))]
    Volume { name: String, source: VolumeError },

    #[snafu(display("failed to read reserved ports: {source}"))]
    ReservedPorts { source: StoreError },
}

impl EngineError {
    /// Deterministic artifact failures that retrying cannot fix.
    pub fn is_artifact_failure(&self) -> bool {
        match self {
            EngineError::Pull { class, .. } => !class.is_retryable(),
            EngineError::Build { .. } => true,
            _ => false,
        }
    }

    /// Retry budget ran out on infrastructure noise.
    pub fn is_transient_exhaustion(&self) -> bool {
        matches!(self, EngineError::Pull { class, .. } if class.is_retryable())
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
