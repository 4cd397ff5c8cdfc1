// ABOUTME: Container runtime access for Docker and Podman.
// ABOUTME: Capability traits, local socket detection and the bollard implementation.

mod bollard;
mod detection;
mod error;
pub mod traits;
mod types;

pub use self::bollard::BollardRuntime;
pub use detection::{DetectionError, detect_local, resolve_endpoint};
pub use error::{RuntimeError, RuntimeErrorKind};
pub use traits::*;
pub use types::{RuntimeConfig, RuntimeEndpoint, RuntimeType};
