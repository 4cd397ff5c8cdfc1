// ABOUTME: Graceful shutdown and drain configuration.
// ABOUTME: Drain delay keeps superseded replicas serving while routes settle.

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct StopConfig {
    /// Grace period between SIGTERM and a forced kill.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Wait before stopping the previous deployment after cutover.
    #[serde(default, with = "humantime_serde")]
    pub drain_delay: Option<Duration>,
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for StopConfig {
    fn default() -> Self {
        StopConfig {
            timeout: default_timeout(),
            drain_delay: None,
        }
    }
}
