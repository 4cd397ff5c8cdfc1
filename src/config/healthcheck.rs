// ABOUTME: Replica health check configuration.
// ABOUTME: HTTP GET on a path when one is set, TCP connect otherwise.

use serde::Deserialize;
use std::time::Duration;

use crate::model::HealthCheck;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HealthcheckConfig {
    #[serde(default)]
    pub path: Option<String>,

    /// Startup budget for all replicas to answer.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

impl Default for HealthcheckConfig {
    fn default() -> Self {
        Self {
            path: None,
            timeout: default_timeout(),
        }
    }
}

impl From<&HealthcheckConfig> for HealthCheck {
    fn from(config: &HealthcheckConfig) -> Self {
        HealthCheck {
            path: config.path.clone().filter(|p| !p.is_empty()),
            timeout: config.timeout,
        }
    }
}
