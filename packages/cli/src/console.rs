// ABOUTME: Console observer that renders deployment events with spinners and colored status lines
// ABOUTME: All human-facing deployment output goes through here

use colored::*;
use homelab_deploy::{DeploymentEvent, DeploymentObserver, NetworkRemediation, ProvisioningState};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

const SPINNER_TICK: Duration = Duration::from_millis(120);

/// `42s`, `3m 05s`
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else {
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}

pub fn remediation_note(remediation: NetworkRemediation) -> Option<&'static str> {
    match remediation {
        NetworkRemediation::Reachable => None,
        NetworkRemediation::RecoveredWithDns => Some("network recovered after DNS rewrite"),
        NetworkRemediation::FallbackMirror => {
            Some("network still unreachable, switched to fallback package mirror")
        }
    }
}

fn state_message(state: ProvisioningState) -> String {
    match state {
        ProvisioningState::WaitingReady => "waiting for container to come up...".to_string(),
        ProvisioningState::BootstrappingRuntime => "installing Docker (this takes a while)...".to_string(),
        other => format!("{}...", other),
    }
}

/// Renders events as one spinner per service plus permanent status lines
pub struct ConsoleObserver {
    spinner: Mutex<Option<ProgressBar>>,
}

impl Default for ConsoleObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleObserver {
    pub fn new() -> Self {
        Self {
            spinner: Mutex::new(None),
        }
    }

    fn start(&self, prefix: String) {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {prefix:.bold} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_prefix(prefix);
        pb.set_message("pending...");
        pb.enable_steady_tick(SPINNER_TICK);
        if let Ok(mut slot) = self.spinner.lock() {
            if let Some(previous) = slot.replace(pb) {
                previous.finish_and_clear();
            }
        }
    }

    fn update(&self, message: String) {
        if let Ok(slot) = self.spinner.lock() {
            if let Some(pb) = slot.as_ref() {
                pb.set_message(message);
            }
        }
    }

    /// Print above the spinner if one is active
    fn line(&self, text: String) {
        match self.spinner.lock() {
            Ok(slot) => match slot.as_ref() {
                Some(pb) => pb.println(text),
                None => println!("{}", text),
            },
            Err(_) => println!("{}", text),
        }
    }

    fn finish(&self, text: String) {
        if let Ok(mut slot) = self.spinner.lock() {
            if let Some(pb) = slot.take() {
                pb.finish_and_clear();
            }
        }
        println!("{}", text);
    }
}

impl DeploymentObserver for ConsoleObserver {
    fn on_event(&self, event: &DeploymentEvent) {
        match event {
            DeploymentEvent::PlanResolved { plan } => {
                println!("{} {}", "Deployment order:".bold(), plan.join(" -> ").cyan());
            }
            DeploymentEvent::DependencyCycle { cycle } => {
                println!("{} Circular dependency: {}", "⚠".yellow(), cycle);
            }
            DeploymentEvent::BridgePresent { bridge } => {
                println!("{} Container bridge {} exists", "✓".green(), bridge);
            }
            DeploymentEvent::BridgeCreated {
                bridge,
                restart_required,
            } => {
                println!("{} Created container bridge {}", "✓".green(), bridge);
                if *restart_required {
                    println!(
                        "{} Network changes may require a Proxmox reboot to take effect",
                        "⚠".yellow()
                    );
                }
            }
            DeploymentEvent::StorageReachable { server } => {
                println!("{} NFS server {} reachable", "✓".green(), server);
            }
            DeploymentEvent::StorageUnreachable { server, reason } => {
                println!(
                    "{} NFS server {} may not be reachable: {}",
                    "⚠".yellow(),
                    server,
                    reason.dimmed()
                );
            }
            DeploymentEvent::ServiceStarted {
                service,
                position,
                total,
            } => self.start(format!("[{}/{}] {}", position, total, service)),
            DeploymentEvent::StateChanged { to, .. } => self.update(state_message(*to)),
            DeploymentEvent::ContainerExists { vmid, .. } => self.line(format!(
                "  {} container {} already exists, skipping creation",
                "↺".cyan(),
                vmid
            )),
            DeploymentEvent::NetworkRemediated { remediation, .. } => {
                if let Some(note) = remediation_note(*remediation) {
                    self.line(format!("  {} {}", "⚠".yellow(), note));
                }
            }
            DeploymentEvent::ServiceRunning {
                service,
                vmid,
                elapsed,
            } => self.finish(format!(
                "{} {} running in container {} ({})",
                "✓".green(),
                service.bold(),
                vmid,
                format_elapsed(*elapsed).dimmed()
            )),
            DeploymentEvent::ServiceFailed {
                service,
                state,
                error,
            } => self.finish(format!(
                "{} {} failed while {}: {}",
                "✗".red(),
                service.bold(),
                state,
                error.red()
            )),
            DeploymentEvent::RunCompleted { deployed } => {
                println!();
                println!(
                    "{}",
                    format!("Deployed {} services", deployed.len()).green().bold()
                );
            }
            DeploymentEvent::RunAborted {
                failed,
                not_attempted,
            } => {
                println!();
                println!("{} {}", "Deployment aborted at".red().bold(), failed.red());
                if !not_attempted.is_empty() {
                    println!("Not attempted: {}", not_attempted.join(", ").dimmed());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, "0s")]
    #[case(42, "42s")]
    #[case(60, "1m 00s")]
    #[case(185, "3m 05s")]
    fn test_format_elapsed(#[case] secs: u64, #[case] expected: &str) {
        assert_eq!(format_elapsed(Duration::from_secs(secs)), expected);
    }

    #[test]
    fn test_remediation_note_silent_when_reachable() {
        assert_eq!(remediation_note(NetworkRemediation::Reachable), None);
        assert!(remediation_note(NetworkRemediation::FallbackMirror)
            .unwrap()
            .contains("mirror"));
    }
}
