// ABOUTME: Image operations trait for container runtimes.
// ABOUTME: Pull, build and check existence of container images.

use super::shared_types::{BuildOutput, BuildRequest, RegistryAuth};
use crate::types::ImageRef;
use async_trait::async_trait;

#[async_trait]
pub trait ImageOps: Send + Sync {
    /// Pull an image from a registry.
    ///
    /// On failure the error carries the engine's message verbatim so callers
    /// can classify it.
    async fn pull_image(
        &self,
        reference: &ImageRef,
        auth: Option<&RegistryAuth>,
    ) -> Result<(), ImageError>;

    /// Build an image from a local context directory.
    async fn build_image(&self, request: &BuildRequest) -> Result<BuildOutput, ImageError>;

    /// Check if an image exists locally.
    async fn image_exists(&self, reference: &ImageRef) -> Result<bool, ImageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("image not found: {0}")]
    NotFound(String),

    #[error("pull failed: {0}")]
    PullFailed(String),

    #[error("build failed: {message}")]
    BuildFailed { message: String, log: Vec<String> },

    #[error("runtime error: {0}")]
    Runtime(String),
}
