// ABOUTME: deploy command: validate, show the plan, confirm, then run preflight and the orchestrator
// ABOUTME: Ctrl-C cancels the run through the orchestrator's cancellation token

use super::print_validation;
use anyhow::{bail, Context};
use chrono::Local;
use colored::*;
use homelab_cli::context::requested_services;
use homelab_cli::tables::plan_table;
use homelab_cli::{ConsoleObserver, DeployContext};
use homelab_deploy::{validate_deployment, DeployError, DeploymentAborted};
use inquire::Confirm;
use std::sync::Arc;

pub struct DeployOptions {
    pub services: Vec<String>,
    pub dry_run: bool,
    pub yes: bool,
    pub skip_preflight: bool,
}

pub async fn handle_deploy(options: DeployOptions) -> anyhow::Result<()> {
    let ctx = DeployContext::load()?;

    let requested = requested_services(&ctx.catalog, &options.services);
    if requested.is_empty() {
        println!("{}", "No services to deploy".yellow());
        println!(
            "{}",
            "Pass --services or set auto_deploy in a service.json".dimmed()
        );
        return Ok(());
    }

    let report = validate_deployment(&ctx.config, &ctx.catalog, &requested);
    print_validation(&report);
    if !report.is_ok() {
        bail!("Validation failed with {} error(s)", report.errors.len());
    }

    let resolved = ctx.catalog.resolve(&requested);
    println!("{}", "Deployment plan".blue().bold());
    println!("{}", plan_table(&resolved.plan, &ctx.catalog));
    for cycle in &resolved.cycles {
        println!("{} Circular dependency: {}", "⚠".yellow(), cycle);
    }

    if options.dry_run {
        println!("{}", "Dry run: nothing was deployed".dimmed());
        return Ok(());
    }

    if !options.yes {
        let confirmed = Confirm::new(&format!("Deploy {} service(s)?", resolved.plan.len()))
            .with_default(true)
            .prompt()?;
        if !confirmed {
            println!("{}", "Deployment cancelled".yellow());
            return Ok(());
        }
    }

    let cluster = ctx.connect()?;
    let version = cluster
        .version()
        .await
        .map_err(DeployError::from)
        .context("Cannot reach the Proxmox API")?;
    println!("{} Connected to Proxmox VE {}", "✓".green(), version);

    let orchestrator = ctx.orchestrator(cluster.clone(), Arc::new(ConsoleObserver::new()))?;
    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let preflight = if options.skip_preflight {
        None
    } else {
        Some(ctx.preflight(cluster.clone())?)
    };

    let started = Local::now();
    println!("Deployment started at {}", started.format("%H:%M:%S"));

    match orchestrator
        .run(&requested, &ctx.catalog, preflight.as_ref())
        .await
    {
        Ok(run) => {
            let created = run.outcomes.iter().filter(|o| o.created).count();
            println!(
                "{} new container(s), {} already present, finished at {}",
                created,
                run.outcomes.len() - created,
                Local::now().format("%H:%M:%S")
            );
            Ok(())
        }
        Err(aborted) if aborted.is_cancelled() => {
            print_left_running(&aborted);
            println!("{}", "Deployment cancelled".yellow());
            Ok(())
        }
        Err(aborted) => {
            print_left_running(&aborted);
            Err(aborted.into())
        }
    }
}

fn print_left_running(aborted: &DeploymentAborted) {
    if aborted.completed.is_empty() {
        return;
    }
    println!(
        "{}",
        "Already deployed (left running, remove manually if needed):".dimmed()
    );
    for outcome in &aborted.completed {
        println!("  {} (container {})", outcome.service, outcome.vmid);
    }
}
