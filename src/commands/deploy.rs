// ABOUTME: Deploy command implementation.
// ABOUTME: Triggers a deployment, waits for the pipeline and reports the outcome.

use super::context::CommandContext;
use slipway::config::Config;
use slipway::deploy::{DeployOptions, PipelineOutcome};
use slipway::error::{Error, Result};
use slipway::model::{DeploymentStatus, Trigger};
use slipway::output::Output;
use slipway::types::DeploymentId;

pub struct DeployArgs {
    pub service: String,
    pub commit: Option<String>,
    pub message: Option<String>,
    pub by: Option<String>,
}

pub async fn deploy(config: Config, args: DeployArgs, mut output: Output) -> Result<()> {
    output.start_timer();
    let context = CommandContext::connect(&config, &output).await?;
    let service = context.service_id(&args.service)?;

    output.progress(&format!("Deploying {service}"));
    let id = context
        .controller
        .deploy(
            &service,
            DeployOptions {
                commit_sha: args.commit,
                commit_message: args.message,
                trigger: Trigger::Manual,
                triggered_by: args.by,
            },
        )
        .await?;
    output.progress(&format!("  → Deployment {id} created, waiting for pipeline..."));

    let outcome = context.controller.wait(&id).await?;
    report(&context, &id, outcome, &output).await
}

/// Print the build log and turn a non-running outcome into an error.
pub(super) async fn report(
    context: &CommandContext,
    id: &DeploymentId,
    outcome: PipelineOutcome,
    output: &Output,
) -> Result<()> {
    if let Ok(deployment) = context.controller.deployment(id).await {
        for line in deployment.build_log.lines() {
            output.progress(&format!("    {line}"));
        }
    }

    if outcome.status == DeploymentStatus::Running {
        output.success(&format!("Deployment {id} is running"));
        return Ok(());
    }
    Err(Error::DeploymentEnded {
        id: id.to_string(),
        status: outcome.status,
        message: outcome
            .error
            .unwrap_or_else(|| "no error recorded".to_string()),
    })
}
