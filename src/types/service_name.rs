// ABOUTME: DNS-compatible service name validation.
// ABOUTME: Service names become container, network and volume name prefixes.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceNameError {
    #[error("service name cannot be empty")]
    Empty,

    #[error("service name exceeds maximum length of 63 characters")]
    TooLong,

    #[error("service name cannot start with a hyphen")]
    StartsWithHyphen,

    #[error("service name cannot end with a hyphen")]
    EndsWithHyphen,

    #[error("service name must be lowercase")]
    NotLowercase,

    #[error("invalid character in service name: '{0}'")]
    InvalidChar(char),
}

/// An RFC 1123 label: lowercase alphanumerics and hyphens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ServiceName(String);

impl ServiceName {
    pub fn new(value: &str) -> Result<Self, ServiceNameError> {
        if value.is_empty() {
            return Err(ServiceNameError::Empty);
        }
        if value.len() > 63 {
            return Err(ServiceNameError::TooLong);
        }
        if value.starts_with('-') {
            return Err(ServiceNameError::StartsWithHyphen);
        }
        if value.ends_with('-') {
            return Err(ServiceNameError::EndsWithHyphen);
        }
        for c in value.chars() {
            if c.is_ascii_uppercase() {
                return Err(ServiceNameError::NotLowercase);
            }
            if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
                return Err(ServiceNameError::InvalidChar(c));
            }
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Container name for one replica of a deployment.
    ///
    /// Single-replica deployments get `<service>-<short id>`; multi-replica
    /// deployments append the replica index.
    pub fn container_name(&self, deployment_short: &str, index: u32, replicas: u32) -> String {
        if replicas > 1 {
            format!("{}-{}-{}", self.0, deployment_short, index)
        } else {
            format!("{}-{}", self.0, deployment_short)
        }
    }

    /// Engine volume name for a declared named volume. `scope` keeps the
    /// same service name in two environments apart.
    pub fn volume_name(&self, scope: &str, volume: &str) -> String {
        format!("slipway-{scope}-{}-{volume}", self.0)
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for ServiceName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_labels() {
        assert!(matches!(ServiceName::new(""), Err(ServiceNameError::Empty)));
        assert!(matches!(
            ServiceName::new("-web"),
            Err(ServiceNameError::StartsWithHyphen)
        ));
        assert!(matches!(
            ServiceName::new("Web"),
            Err(ServiceNameError::NotLowercase)
        ));
        assert!(matches!(
            ServiceName::new("web_1"),
            Err(ServiceNameError::InvalidChar('_'))
        ));
        assert!(matches!(
            ServiceName::new(&"a".repeat(64)),
            Err(ServiceNameError::TooLong)
        ));
    }

    #[test]
    fn container_names_carry_index_only_when_scaled() {
        let name = ServiceName::new("api").unwrap();
        assert_eq!(name.container_name("abcd1234", 0, 1), "api-abcd1234");
        assert_eq!(name.container_name("abcd1234", 2, 3), "api-abcd1234-2");
    }

    #[test]
    fn volume_names_are_scoped() {
        let name = ServiceName::new("db").unwrap();
        assert_eq!(name.volume_name("shop-staging", "data"), "slipway-shop-staging-db-data");
    }
}
