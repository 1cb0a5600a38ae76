// ABOUTME: Entry point for the homelab CLI
// ABOUTME: Parses arguments, loads the environment and dispatches to command handlers

use clap::{Parser, Subcommand};
use colored::*;
use homelab_cli::{init_tracing, load_env};
use std::path::PathBuf;
use std::process;

mod cli;

use cli::deploy::DeployOptions;

#[derive(Parser)]
#[command(name = "homelab")]
#[command(about = "Deploy homelab services into Proxmox LXC containers")]
#[command(version)]
struct Cli {
    /// Environment file to load instead of ./.env
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy services in dependency order
    Deploy {
        /// Comma-separated services to deploy (default: all auto-deploy services)
        #[arg(long, value_delimiter = ',')]
        services: Vec<String>,
        /// Validate and print the plan without touching the cluster
        #[arg(long)]
        dry_run: bool,
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
        /// Skip bridge and storage checks
        #[arg(long)]
        skip_preflight: bool,
    },
    /// Validate configuration and service definitions
    ValidateOnly,
    /// List discovered services
    ListServices {
        /// Show dependencies, resources and descriptions
        #[arg(long)]
        details: bool,
    },
    /// Show container state for every service
    Status,
    /// Show workload logs of a service
    Logs {
        service: String,
        /// Keep streaming new output (stops after the command timeout)
        #[arg(short, long)]
        follow: bool,
        /// Number of lines to show
        #[arg(short = 'n', long, default_value = "50")]
        lines: u32,
    },
    /// Stop and destroy a service's container
    Remove {
        service: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = load_env(cli.env_file.as_deref()) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
    init_tracing(cli.verbose);

    if let Err(e) = handle_command(cli.command).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Deploy {
            services,
            dry_run,
            yes,
            skip_preflight,
        } => {
            cli::deploy::handle_deploy(DeployOptions {
                services,
                dry_run,
                yes,
                skip_preflight,
            })
            .await
        }
        Commands::ValidateOnly => cli::services::validate_only(),
        Commands::ListServices { details } => cli::services::list_services(details),
        Commands::Status => cli::services::status().await,
        Commands::Logs {
            service,
            follow,
            lines,
        } => cli::services::logs(&service, lines, follow).await,
        Commands::Remove { service, force } => cli::services::remove(&service, force).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logs_defaults() {
        let cli = Cli::try_parse_from(["homelab", "logs", "pihole"]).unwrap();
        match cli.command {
            Commands::Logs {
                service,
                follow,
                lines,
            } => {
                assert_eq!(service, "pihole");
                assert!(!follow);
                assert_eq!(lines, 50);
            }
            _ => panic!("expected logs command"),
        }
    }

    #[test]
    fn test_deploy_services_are_comma_separated() {
        let cli = Cli::try_parse_from(["homelab", "deploy", "--services", "pihole,nginx", "-y"])
            .unwrap();
        match cli.command {
            Commands::Deploy { services, yes, .. } => {
                assert_eq!(services, vec!["pihole".to_string(), "nginx".to_string()]);
                assert!(yes);
            }
            _ => panic!("expected deploy command"),
        }
    }
}
