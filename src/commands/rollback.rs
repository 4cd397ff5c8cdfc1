// ABOUTME: Rollback command implementation.
// ABOUTME: Redeploys the image of an earlier deployment and waits for the result.

use super::context::CommandContext;
use super::deploy::report;
use slipway::config::Config;
use slipway::error::Result;
use slipway::output::Output;
use slipway::types::DeploymentId;

pub async fn rollback(config: Config, target: &str, by: Option<String>, mut output: Output) -> Result<()> {
    output.start_timer();
    let context = CommandContext::connect(&config, &output).await?;
    let target = DeploymentId::new(target);

    output.progress(&format!("Rolling back to deployment {target}"));
    let id = context.controller.rollback(&target, by).await?;
    output.progress(&format!("  → Deployment {id} created, waiting for pipeline..."));

    let outcome = context.controller.wait(&id).await?;
    report(&context, &id, outcome, &output).await
}
