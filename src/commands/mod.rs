// ABOUTME: Command module aggregator for the slipway CLI.
// ABOUTME: Re-exports deploy, rollback, status and reconcile handlers.

mod context;
mod deploy;
mod rollback;
mod status;

pub use deploy::{DeployArgs, deploy};
pub use rollback::rollback;
pub use status::{reconcile, status};
