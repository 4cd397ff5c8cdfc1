// ABOUTME: Container resource limits as written in config files.
// ABOUTME: Parses "512m"/"1g" memory sizes and fractional CPU counts.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::model::Resources;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResourcesConfig {
    pub memory: Option<String>,
    pub cpus: Option<String>,
}

impl ResourcesConfig {
    pub fn to_limits(&self) -> Result<Resources> {
        let memory_bytes = self
            .memory
            .as_deref()
            .map(|m| {
                parse_memory(m)
                    .ok_or_else(|| Error::InvalidConfig(format!("invalid memory limit: {m}")))
            })
            .transpose()?;
        let nano_cpus = self
            .cpus
            .as_deref()
            .map(|c| {
                parse_cpus(c).ok_or_else(|| Error::InvalidConfig(format!("invalid cpu limit: {c}")))
            })
            .transpose()?;
        Ok(Resources {
            memory_bytes,
            nano_cpus,
        })
    }
}

/// Bytes for a size such as `512m`, `1g`, `64k` or a bare byte count.
pub fn parse_memory(value: &str) -> Option<i64> {
    let value = value.trim().to_lowercase();
    let value = value.strip_suffix('b').unwrap_or(&value);
    let (digits, multiplier) = match value.chars().last()? {
        'g' => (&value[..value.len() - 1], 1024 * 1024 * 1024),
        'm' => (&value[..value.len() - 1], 1024 * 1024),
        'k' => (&value[..value.len() - 1], 1024),
        _ => (value, 1),
    };
    digits
        .parse::<i64>()
        .ok()
        .filter(|n| *n > 0)
        .and_then(|n| n.checked_mul(multiplier))
}

/// Nano-CPUs for a CPU count such as `0.5` or `2`.
pub fn parse_cpus(value: &str) -> Option<i64> {
    let cpus: f64 = value.trim().parse().ok()?;
    if !cpus.is_finite() || cpus <= 0.0 {
        return None;
    }
    Some((cpus * 1_000_000_000.0).round() as i64)
}
