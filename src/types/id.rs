// ABOUTME: Phantom-typed identifiers for compile-time type safety.
// ABOUTME: Engine ids (container, network, volume) and store ids (deployment, service, ...).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Marker types for phantom type parameters.
/// Empty enums cannot be instantiated and need no trait bounds.
pub enum ContainerMarker {}
pub enum NetworkMarker {}
pub enum VolumeMarker {}
pub enum DeploymentMarker {}
pub enum ReplicaMarker {}
pub enum ServiceMarker {}
pub enum EnvironmentMarker {}
pub enum ProjectMarker {}

/// A type-safe identifier.
///
/// A `DeploymentId` cannot be passed where a `ServiceId` is expected, even
/// though both are strings underneath.
///
/// ```compile_fail
/// use slipway::types::{DeploymentId, ServiceId};
///
/// fn takes_service(_id: ServiceId) {}
/// takes_service(DeploymentId::new("d1"));
/// ```
#[must_use = "IDs reference resources and should not be ignored"]
pub struct Id<T> {
    value: String,
    _marker: PhantomData<T>,
}

impl<T> Id<T> {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            _marker: PhantomData,
        }
    }

    /// Generate a fresh, globally unique id.
    pub fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// First eight characters, used in container names and log lines.
    pub fn short(&self) -> &str {
        let end = self
            .value
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.value.len());
        &self.value[..end]
    }

    pub fn into_inner(self) -> String {
        self.value
    }
}

// Manual impls: T is only a marker and implements nothing.

impl<T> std::fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Id").field(&self.value).finish()
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        Self::new(self.value.clone())
    }
}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value.cmp(&other.value)
    }
}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<T> std::fmt::Display for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl<T> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::new(value))
    }
}

pub type ContainerId = Id<ContainerMarker>;
pub type NetworkId = Id<NetworkMarker>;
pub type VolumeId = Id<VolumeMarker>;
pub type DeploymentId = Id<DeploymentMarker>;
pub type ReplicaId = Id<ReplicaMarker>;
pub type ServiceId = Id<ServiceMarker>;
pub type EnvironmentId = Id<EnvironmentMarker>;
pub type ProjectId = Id<ProjectMarker>;
