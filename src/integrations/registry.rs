// ABOUTME: Registry credential lookup keyed by registry host.
// ABOUTME: Images without an explicit registry resolve to docker.io.

use std::collections::HashMap;

use crate::runtime::RegistryAuth;

pub trait RegistryCredentials: Send + Sync {
    fn credentials_for(&self, host: &str) -> Option<RegistryAuth>;
}

/// Credentials from configuration, one entry per host.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredRegistries {
    by_host: HashMap<String, RegistryAuth>,
}

impl ConfiguredRegistries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, host: impl Into<String>, username: String, password: String) {
        let host = host.into();
        self.by_host.insert(
            host.clone(),
            RegistryAuth {
                username,
                password,
                server: Some(host),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.by_host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_host.is_empty()
    }
}

impl RegistryCredentials for ConfiguredRegistries {
    fn credentials_for(&self, host: &str) -> Option<RegistryAuth> {
        self.by_host.get(host).cloned()
    }
}
