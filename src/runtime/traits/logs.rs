// ABOUTME: Log operations trait for container runtimes.
// ABOUTME: Stream or tail container logs.

use crate::types::ContainerId;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

pub type LogLineStream = Pin<Box<dyn Stream<Item = Result<LogLine, LogError>> + Send>>;

#[async_trait]
pub trait LogOps: Send + Sync {
    /// Stream logs from a container.
    async fn container_logs(
        &self,
        id: &ContainerId,
        opts: &LogOptions,
    ) -> Result<LogLineStream, LogError>;
}

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub stdout: bool,
    pub stderr: bool,
    /// Follow log output (like `tail -f`).
    pub follow: bool,
    /// Number of lines to show from the end (all when `None`).
    pub tail: Option<u64>,
}

impl LogOptions {
    /// The last `n` lines of both streams, without following.
    pub fn tail(n: u64) -> Self {
        Self {
            stdout: true,
            stderr: true,
            follow: false,
            tail: Some(n),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogLine {
    pub content: String,
    pub stream: LogStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("stream error: {0}")]
    StreamError(String),
}
