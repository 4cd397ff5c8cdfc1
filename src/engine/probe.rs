// ABOUTME: TCP and HTTP health probes and the startup wait loop.
// ABOUTME: Gives up early when the container is seen exited/dead repeatedly.

use async_trait::async_trait;
use hyper_util::rt::TokioIo;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::Engine;
use super::error::{EngineResult, UnhealthySnafu};
use crate::types::ContainerId;

/// One replica endpoint to probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub host_port: u16,
    /// HTTP path; plain TCP connect when `None`.
    pub path: Option<String>,
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Single probe attempt. `true` means healthy.
    async fn probe(&self, target: &ProbeTarget, timeout: Duration) -> bool;
}

/// Probes over the loopback interface.
#[derive(Debug, Clone, Default)]
pub struct NetProbe;

impl NetProbe {
    async fn tcp(port: u16) -> bool {
        TcpStream::connect(("127.0.0.1", port)).await.is_ok()
    }

    async fn http(port: u16, path: &str) -> bool {
        let Ok(stream) = TcpStream::connect(("127.0.0.1", port)).await else {
            return false;
        };
        let io = TokioIo::new(stream);
        let Ok((mut sender, conn)) = hyper::client::conn::http1::handshake(io).await else {
            return false;
        };
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                trace!("probe connection closed: {e}");
            }
        });

        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        let Ok(request) = hyper::Request::builder()
            .method("GET")
            .uri(&path)
            .header("Host", format!("127.0.0.1:{port}"))
            .header("User-Agent", "slipway-health")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
        else {
            return false;
        };

        match sender.send_request(request).await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl HealthProbe for NetProbe {
    async fn probe(&self, target: &ProbeTarget, timeout: Duration) -> bool {
        let attempt = async {
            match &target.path {
                Some(path) => Self::http(target.host_port, path).await,
                None => Self::tcp(target.host_port).await,
            }
        };
        tokio::time::timeout(timeout, attempt).await.unwrap_or(false)
    }
}

impl Engine {
    /// Probe until healthy or until `budget` runs out.
    pub async fn wait_healthy(
        &self,
        container: &ContainerId,
        target: &ProbeTarget,
        budget: Duration,
    ) -> EngineResult<()> {
        let deadline = Instant::now() + budget;
        let mut consecutive_down = 0u32;
        let mut probes = 0u32;

        loop {
            probes += 1;
            if self.probe.probe(target, self.settings.probe_timeout).await {
                debug!(container = %container, probes, "healthy");
                return Ok(());
            }

            match self.container_state(container).await {
                Ok(Some(state)) if state.is_down() => consecutive_down += 1,
                Ok(None) => consecutive_down += 1,
                _ => consecutive_down = 0,
            }
            if consecutive_down >= self.settings.down_threshold.max(1) {
                return UnhealthySnafu {
                    container: container.as_str(),
                    reason: format!(
                        "container stopped running (observed {consecutive_down} times in a row)"
                    ),
                }
                .fail();
            }

            if Instant::now() + self.settings.probe_interval > deadline {
                return UnhealthySnafu {
                    container: container.as_str(),
                    reason: format!(
                        "no healthy response on port {} within {}s ({probes} probes)",
                        target.host_port,
                        budget.as_secs()
                    ),
                }
                .fail();
            }
            tokio::time::sleep(self.settings.probe_interval).await;
        }
    }
}
