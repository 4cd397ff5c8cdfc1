// ABOUTME: Library root for slipway - the deployment orchestrator core.
// ABOUTME: The main binary is in main.rs.

pub mod config;
pub mod deploy;
pub mod engine;
pub mod error;
pub mod integrations;
pub mod model;
pub mod output;
pub mod runtime;
pub mod store;
pub mod types;
