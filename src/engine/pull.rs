// ABOUTME: Image pull with retry, exponential backoff and failure classification.
// ABOUTME: Only infrastructure noise and unknown failures are retried.

use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use super::Engine;
use super::error::{EngineResult, PullSnafu};
use crate::runtime::{ImageError, RegistryAuth};
use crate::types::ImageRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PullFailureClass {
    TransientNetwork,
    RateLimit,
    RegistryAuth,
    PlatformMismatch,
    NotFound,
    Unknown,
}

impl PullFailureClass {
    pub fn as_str(self) -> &'static str {
        match self {
            PullFailureClass::TransientNetwork => "infra/transient-network",
            PullFailureClass::RateLimit => "infra/rate-limit",
            PullFailureClass::RegistryAuth => "registry/auth",
            PullFailureClass::PlatformMismatch => "image/platform-mismatch",
            PullFailureClass::NotFound => "image/not-found",
            PullFailureClass::Unknown => "unknown",
        }
    }

    /// `infra/*` and `unknown` are retried; everything else fails fast.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            PullFailureClass::TransientNetwork
                | PullFailureClass::RateLimit
                | PullFailureClass::Unknown
        )
    }
}

impl fmt::Display for PullFailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const PLATFORM_MARKERS: &[&str] = &[
    "does not match the specified platform",
    "no matching manifest for",
    "image with reference",
];
const AUTH_MARKERS: &[&str] = &[
    "unauthorized",
    "authentication required",
    "access denied",
    "denied:",
    "incorrect username or password",
    "no basic auth credentials",
];
const NOT_FOUND_MARKERS: &[&str] = &[
    "manifest unknown",
    "not found",
    "no such image",
    "repository does not exist",
    "name unknown",
];
const RATE_LIMIT_MARKERS: &[&str] = &["toomanyrequests", "too many requests", "rate limit"];
const NETWORK_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "no such host",
    "temporary failure in name resolution",
    "network is unreachable",
    "tls handshake",
    "unexpected eof",
    "broken pipe",
    "service unavailable",
    "bad gateway",
    "gateway timeout",
];

/// How engines and registries print a status code; bare digits also occur in digests.
const STATUS_PREFIXES: &[&str] = &[
    "status ",
    "status: ",
    "status code ",
    "status code: ",
    "http ",
    "http/1.1 ",
    "http/2 ",
];

fn has_http_status(message: &str, codes: &[u16]) -> bool {
    codes.iter().any(|code| {
        STATUS_PREFIXES.iter().any(|prefix| {
            let needle = format!("{prefix}{code}");
            message.match_indices(&needle).any(|(at, _)| {
                !message[at + needle.len()..].starts_with(|c: char| c.is_ascii_digit())
            })
        })
    })
}

/// Classify a failed pull from the engine's message text.
///
/// Checks run platform, auth, not-found, rate-limit, network, in that order.
pub fn classify_pull_failure(message: &str) -> PullFailureClass {
    let message = message.to_ascii_lowercase();
    let has = |markers: &[&str]| markers.iter().any(|m| message.contains(m));

    if (message.contains("no matching manifest") && message.contains("manifest list"))
        || (has(PLATFORM_MARKERS) && message.contains("platform"))
    {
        PullFailureClass::PlatformMismatch
    } else if has(AUTH_MARKERS) {
        PullFailureClass::RegistryAuth
    } else if has(NOT_FOUND_MARKERS) {
        PullFailureClass::NotFound
    } else if has(RATE_LIMIT_MARKERS) || has_http_status(&message, &[429]) {
        PullFailureClass::RateLimit
    } else if has(NETWORK_MARKERS) || has_http_status(&message, &[502, 503, 504]) {
        PullFailureClass::TransientNetwork
    } else {
        PullFailureClass::Unknown
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff", with = "humantime_serde")]
    pub initial_backoff: Duration,

    #[serde(default = "default_max_backoff", with = "humantime_serde")]
    pub max_backoff: Duration,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_backoff() -> Duration {
    Duration::from_secs(2)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(30)
}

impl Default for PullRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

impl PullRetryPolicy {
    /// Delay before retry number `retry` (1-based), doubling and capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Outcome of a successful pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullReport {
    pub attempts: u32,
}

impl Engine {
    /// Pull `image`, retrying retryable failures with capped exponential backoff.
    ///
    /// `on_retry` receives a human-readable line for each failed attempt that
    /// will be retried.
    pub async fn pull_with_retry(
        &self,
        image: &ImageRef,
        auth: Option<&RegistryAuth>,
        on_retry: &(dyn Fn(String) + Send + Sync),
    ) -> EngineResult<PullReport> {
        let policy = &self.settings.pull_retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(image = %image, attempt, "pulling image");
            let message = match self.runtime.pull_image(image, auth).await {
                Ok(()) => return Ok(PullReport { attempts: attempt }),
                Err(ImageError::PullFailed(message)) => message,
                Err(other) => other.to_string(),
            };

            let class = classify_pull_failure(&message);
            if !class.is_retryable() || attempt >= max_attempts {
                return PullSnafu {
                    image: image.to_string(),
                    class,
                    attempts: attempt,
                    message,
                }
                .fail();
            }

            let delay = policy.backoff(attempt);
            warn!(image = %image, attempt, %class, ?delay, "pull failed, retrying");
            on_retry(format!(
                "Pull attempt {attempt}/{max_attempts} failed [{class}], retrying in {}s: {message}",
                delay.as_secs()
            ));
            tokio::time::sleep(delay).await;
        }
    }
}
