// ABOUTME: Graceful container stop with verification.
// ABOUTME: A stop only succeeds once the container is confirmed not running.

use snafu::ResultExt;
use std::time::Duration;
use tracing::{debug, warn};

use super::Engine;
use super::error::{EngineResult, StillRunningSnafu, StopSnafu};
use crate::runtime::ContainerError;
use crate::types::ContainerId;

impl Engine {
    /// Stop with a grace period, then remove the container.
    ///
    /// A container still live after the graceful stop is force-removed.
    /// Returns an error only if the container is verifiably still running.
    pub async fn stop_gracefully(&self, id: &ContainerId, grace: Duration) -> EngineResult<()> {
        match self.runtime.stop_container(id, grace).await {
            Ok(()) | Err(ContainerError::NotRunning(_)) => {}
            Err(ContainerError::NotFound(_)) => return Ok(()),
            Err(e) => warn!(container = %id, error = %e, "graceful stop failed"),
        }

        let force = match self.container_state(id).await {
            Ok(None) => return Ok(()),
            Ok(Some(state)) => state.is_live(),
            Err(e) => {
                warn!(container = %id, error = %e, "could not confirm stop, forcing removal");
                true
            }
        };
        if force {
            warn!(container = %id, "container survived graceful stop, force-removing");
        }

        match self.runtime.remove_container(id, force).await {
            Ok(()) | Err(ContainerError::NotFound(_)) => {}
            Err(e) if force => return Err(e).context(StopSnafu { container: id.as_str() }),
            Err(e) => {
                // Stopped but not removable; retry with force.
                debug!(container = %id, error = %e, "removal failed, forcing");
                match self.runtime.remove_container(id, true).await {
                    Ok(()) | Err(ContainerError::NotFound(_)) => {}
                    Err(e) => return Err(e).context(StopSnafu { container: id.as_str() }),
                }
            }
        }

        if self.is_live(id).await? {
            return StillRunningSnafu { container: id.as_str() }.fail();
        }
        Ok(())
    }
}
