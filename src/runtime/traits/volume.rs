// ABOUTME: Volume operations trait for container runtimes.

use super::shared_types::VolumeConfig;
use crate::types::VolumeId;
use async_trait::async_trait;

#[async_trait]
pub trait VolumeOps: Send + Sync {
    /// Create a named volume. Creating an existing volume returns it unchanged.
    async fn create_volume(&self, config: &VolumeConfig) -> Result<VolumeId, VolumeError>;
}

#[derive(Debug, thiserror::Error)]
pub enum VolumeError {
    #[error("volume name conflicts with an existing volume: {0}")]
    Conflict(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}
