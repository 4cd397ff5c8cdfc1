// ABOUTME: Reverse-proxy route synchronization.
// ABOUTME: FileRouter writes a domain -> upstream ports table for an external proxy to watch.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

use crate::types::ServiceId;

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("failed to write routes to {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to encode routes: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One domain served by a service's current replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub domain: String,
    pub service_id: ServiceId,
    /// Host ports of the replicas serving the domain.
    pub upstreams: Vec<u16>,
}

#[async_trait]
pub trait Router: Send + Sync {
    /// Replace the full route table.
    async fn sync(&self, routes: &[Route]) -> Result<(), RoutingError>;
}

/// Router for hosts without a managed proxy.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRouter;

#[async_trait]
impl Router for NoopRouter {
    async fn sync(&self, routes: &[Route]) -> Result<(), RoutingError> {
        debug!(routes = routes.len(), "routing disabled, skipping sync");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct RouteEntry<'a> {
    service: &'a ServiceId,
    upstreams: Vec<String>,
}

/// Writes `routes.json` atomically (temp file + rename).
#[derive(Debug, Clone)]
pub struct FileRouter {
    path: PathBuf,
}

impl FileRouter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl Router for FileRouter {
    async fn sync(&self, routes: &[Route]) -> Result<(), RoutingError> {
        let table: BTreeMap<&str, RouteEntry<'_>> = routes
            .iter()
            .map(|route| {
                let entry = RouteEntry {
                    service: &route.service_id,
                    upstreams: route
                        .upstreams
                        .iter()
                        .map(|port| format!("127.0.0.1:{port}"))
                        .collect(),
                };
                (route.domain.as_str(), entry)
            })
            .collect();
        let body = serde_json::to_vec_pretty(&table)?;

        let write_err = |source| RoutingError::Write {
            path: self.path.display().to_string(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await.map_err(write_err)?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(write_err)?;

        debug!(path = %self.path.display(), routes = routes.len(), "routes synced");
        Ok(())
    }
}
