// ABOUTME: Status and reconcile command implementations.
// ABOUTME: Lists deployments after reconciling stale running rows.

use super::context::CommandContext;
use serde::Serialize;
use slipway::config::Config;
use slipway::error::Result;
use slipway::model::Deployment;
use slipway::output::Output;

#[derive(Serialize)]
struct StatusRow<'a> {
    service: &'a str,
    deployment: &'a str,
    status: String,
    trigger: String,
    image: Option<&'a str>,
    host_port: Option<u16>,
    rollback_eligible: bool,
    created_at: String,
}

pub async fn status(config: Config, service: Option<&str>, output: Output) -> Result<()> {
    let context = CommandContext::connect(&config, &output).await?;
    let services = match service {
        Some(arg) => vec![context.service_id(arg)?],
        None => context.catalog.services.iter().map(|s| s.id.clone()).collect(),
    };

    for service in &services {
        let reconciled = context.controller.reconcile_service(service).await?;
        if reconciled > 0 {
            output.warning(&format!(
                "{service}: {reconciled} deployment(s) no longer running, marked stopped"
            ));
        }
        let deployments = context.controller.deployments(service).await?;
        if deployments.is_empty() {
            output.progress(&format!("{service}: no deployments"));
            continue;
        }
        output.progress(&format!("{service}:"));
        for deployment in &deployments {
            print_row(&output, deployment);
        }
    }
    Ok(())
}

fn print_row(output: &Output, deployment: &Deployment) {
    let row = StatusRow {
        service: deployment.service_id.as_str(),
        deployment: deployment.id.as_str(),
        status: deployment.status.to_string(),
        trigger: deployment.trigger.to_string(),
        image: deployment.image_name.as_deref(),
        host_port: deployment.host_port,
        rollback_eligible: deployment.rollback_eligible,
        created_at: deployment.created_at.to_rfc3339(),
    };
    let text = format!(
        "  {:<32} {:<10} {:<8} {:<40} {:>5} {}",
        row.deployment,
        row.status,
        row.trigger,
        row.image.unwrap_or("-"),
        row.host_port.map_or_else(|| "-".to_string(), |p| p.to_string()),
        if row.rollback_eligible { "rollback-ok" } else { "" },
    );
    output.row(&text, &row);
}

pub async fn reconcile(config: Config, output: Output) -> Result<()> {
    let context = CommandContext::connect(&config, &output).await?;
    let changed = context.controller.reconcile_all().await?;
    output.success(&format!("Reconciled {changed} deployment(s)"));
    Ok(())
}
