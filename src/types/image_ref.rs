// ABOUTME: Container image reference parsing and tagging.
// ABOUTME: Handles nginx, nginx:tag, registry:5000/team/app:tag@digest.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseImageRefError {
    #[error("image reference cannot be empty")]
    Empty,

    #[error("invalid character in image reference: {0}")]
    InvalidChar(char),

    #[error("invalid image reference format: {0}")]
    InvalidFormat(String),
}

/// A parsed image reference.
///
/// A reference without tag or digest gets the implicit `latest` tag, so the
/// `Display` form is always fully resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    registry: Option<String>,
    name: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageRef {
    pub fn parse(input: &str) -> Result<Self, ParseImageRefError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ParseImageRefError::Empty);
        }

        if let Some(c) = input
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && !"/:.-_@".contains(*c))
        {
            return Err(ParseImageRefError::InvalidChar(c));
        }

        let (rest, digest) = match input.split_once('@') {
            Some((before, after)) if !after.is_empty() => (before, Some(after.to_string())),
            Some(_) => return Err(ParseImageRefError::InvalidFormat(input.to_string())),
            None => (input, None),
        };

        // A colon followed by a slash belongs to a registry port, not a tag.
        let (rest, tag) = match rest.rsplit_once(':') {
            Some((before, after)) if !after.contains('/') => {
                if after.is_empty() {
                    return Err(ParseImageRefError::InvalidFormat(input.to_string()));
                }
                (before, Some(after.to_string()))
            }
            _ => (rest, None),
        };

        let (registry, name) = split_registry(rest);
        if name.is_empty() || name.starts_with('/') || name.ends_with('/') {
            return Err(ParseImageRefError::InvalidFormat(input.to_string()));
        }

        let tag = match (&tag, &digest) {
            (None, None) => Some("latest".to_string()),
            _ => tag,
        };

        Ok(Self {
            registry,
            name,
            tag,
            digest,
        })
    }

    /// Reference for a locally built image: `<name>:<tag>`.
    pub fn local(name: &str, tag: &str) -> Self {
        Self {
            registry: None,
            name: name.to_string(),
            tag: Some(tag.to_string()),
            digest: None,
        }
    }

    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    /// Registry host used for credential lookup; Docker Hub when unqualified.
    pub fn registry_host(&self) -> &str {
        self.registry.as_deref().unwrap_or("docker.io")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Repository part without tag or digest, as the engine's pull API wants it.
    pub fn repository(&self) -> String {
        match &self.registry {
            Some(registry) => format!("{registry}/{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Whether the last path segment names a PostgreSQL image.
    pub fn is_postgres(&self) -> bool {
        let base = self.name.rsplit('/').next().unwrap_or(&self.name);
        base == "postgres" || base == "postgis" || base.starts_with("postgres-")
    }
}

fn split_registry(input: &str) -> (Option<String>, String) {
    match input.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            (Some(first.to_string()), rest.to_string())
        }
        _ => (None, input.to_string()),
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{registry}/")?;
        }
        write!(f, "{}", self.name)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for ImageRef {
    type Err = ParseImageRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
