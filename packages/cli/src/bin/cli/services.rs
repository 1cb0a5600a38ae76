// ABOUTME: validate-only, list-services, status, logs and remove commands
// ABOUTME: Each loads configuration and the service catalog, then talks to the cluster only when needed

use super::print_validation;
use anyhow::bail;
use colored::*;
use homelab_cli::console::format_elapsed;
use homelab_cli::tables::{config_table, services_table, status_rows, status_table};
use homelab_cli::DeployContext;
use homelab_deploy::cluster::select_node;
use homelab_deploy::executor::DEFAULT_COMMAND_TIMEOUT;
use homelab_deploy::orchestrator::workload_logs_command;
use homelab_deploy::validation::validate_deployment;
use homelab_deploy::{ClusterApi, TracingObserver};
use inquire::Confirm;
use std::sync::Arc;

pub fn validate_only() -> anyhow::Result<()> {
    let ctx = DeployContext::load()?;

    println!("{}", "Configuration".blue().bold());
    println!("{}", config_table(&ctx.config));

    let report = validate_deployment(&ctx.config, &ctx.catalog, &ctx.catalog.names());
    print_validation(&report);
    if !report.is_ok() {
        bail!("Validation failed with {} error(s)", report.errors.len());
    }

    println!(
        "{} Configuration and {} service(s) are valid",
        "✓".green(),
        ctx.catalog.len()
    );
    Ok(())
}

pub fn list_services(details: bool) -> anyhow::Result<()> {
    let ctx = DeployContext::load()?;

    if ctx.catalog.is_empty() {
        println!("{}", "No services found".yellow());
        println!(
            "{}",
            format!("Looked in {}", ctx.config.services_dir.display()).dimmed()
        );
        return Ok(());
    }

    println!("{}", "Homelab Services".blue().bold());
    println!("{}", services_table(&ctx.catalog, details));
    println!("Total: {} services", ctx.catalog.len().to_string().cyan());

    for skipped in ctx.catalog.skipped() {
        println!(
            "{} {} skipped: {}",
            "⚠".yellow(),
            skipped.name,
            skipped.reason
        );
    }
    Ok(())
}

pub async fn status() -> anyhow::Result<()> {
    let ctx = DeployContext::load()?;
    let cluster = ctx.connect()?;
    let node = select_node(cluster.as_ref()).await?;
    let containers = cluster.list_containers(&node).await?;

    println!("{}", format!("Service status on {}", node).blue().bold());
    println!("{}", status_table(&status_rows(&ctx.catalog, &containers)));
    Ok(())
}

pub async fn logs(service: &str, lines: u32, follow: bool) -> anyhow::Result<()> {
    let ctx = DeployContext::load()?;
    let descriptor = ctx.catalog.require(service)?;
    let cluster = ctx.connect()?;
    let orchestrator = ctx.orchestrator(cluster, Arc::new(TracingObserver))?;

    let command = workload_logs_command(service, lines, follow);

    if !follow {
        let output = orchestrator.exec_in_service(descriptor, &command).await?;
        print!("{}", output);
        return Ok(());
    }

    let finished = orchestrator
        .follow_in_service(descriptor, &command, &mut |line: &str| println!("{}", line))
        .await?;
    if !finished {
        println!(
            "{}",
            format!(
                "Stopped following after {}",
                format_elapsed(DEFAULT_COMMAND_TIMEOUT)
            )
            .dimmed()
        );
    }
    Ok(())
}

pub async fn remove(service: &str, force: bool) -> anyhow::Result<()> {
    let ctx = DeployContext::load()?;
    let descriptor = ctx.catalog.require(service)?;

    if !force {
        let confirmed = Confirm::new(&format!(
            "Remove container {} for '{}'? This destroys its data.",
            descriptor.container_spec.id, service
        ))
        .with_default(false)
        .prompt()?;
        if !confirmed {
            println!("{}", "Removal cancelled".yellow());
            return Ok(());
        }
    }

    let cluster = ctx.connect()?;
    let node = select_node(cluster.as_ref()).await?;
    let orchestrator = ctx.orchestrator(cluster, Arc::new(TracingObserver))?;

    if orchestrator.remove_service(&node, descriptor).await? {
        println!("{} Removed {}", "✓".green(), service);
    } else {
        println!("{} {} is not deployed", "ℹ".cyan(), service);
    }
    Ok(())
}
