// ABOUTME: External collaborators the orchestrator calls out to.
// ABOUTME: Source checkout and status, registry credentials, route sync.

mod registry;
mod routing;
mod source;

pub use registry::{ConfiguredRegistries, RegistryCredentials};
pub use routing::{FileRouter, NoopRouter, Route, Router, RoutingError};
pub use source::{
    Checkout, CheckoutRequest, CommitState, GitCli, PullRequestComment, SourceError,
    SourceProvider, StatusReport,
};

use std::sync::Arc;

use crate::config::{OverrideLoader, RepoOverrides};

/// Everything the deploy pipeline needs besides the store and the engine.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn SourceProvider>,
    pub registries: Arc<dyn RegistryCredentials>,
    pub router: Arc<dyn Router>,
    pub overrides: Arc<dyn OverrideLoader>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            source: Arc::new(GitCli::default()),
            registries: Arc::new(ConfiguredRegistries::default()),
            router: Arc::new(NoopRouter),
            overrides: Arc::new(RepoOverrides),
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
