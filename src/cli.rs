// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "slipway")]
#[command(about = "Self-hosted zero-downtime deployments for Docker and Podman")]
#[command(version)]
pub struct Cli {
    /// Path to the configuration file (default: discovered in the current directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print final results
    #[arg(short, long, global = true, conflicts_with = "json")]
    pub quiet: bool,

    /// Print JSON lines instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new slipway.yml configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Deploy a service and wait for the outcome
    Deploy {
        /// Service as project/environment/service
        service: String,

        /// Commit to check out (repository services)
        #[arg(long)]
        commit: Option<String>,

        /// Commit message recorded on the deployment
        #[arg(long)]
        message: Option<String>,

        /// Who triggered the deploy
        #[arg(long)]
        by: Option<String>,
    },

    /// Redeploy the image of an earlier deployment
    Rollback {
        /// Deployment to roll back to
        deployment: String,

        /// Who triggered the rollback
        #[arg(long)]
        by: Option<String>,
    },

    /// List deployments
    Status {
        /// Limit to one service (project/environment/service)
        service: Option<String>,
    },

    /// Mark running deployments whose containers are gone as stopped
    Reconcile,
}
