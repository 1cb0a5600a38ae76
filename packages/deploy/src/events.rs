// ABOUTME: Structured deployment progress events and the observer interface that receives them
// ABOUTME: Includes a tracing-backed observer and an in-memory recorder

use crate::bootstrap::NetworkRemediation;
use crate::resolver::DependencyCycle;
use crate::state::ProvisioningState;
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeploymentEvent {
    PlanResolved {
        plan: Vec<String>,
    },
    DependencyCycle {
        cycle: DependencyCycle,
    },
    BridgePresent {
        bridge: String,
    },
    BridgeCreated {
        bridge: String,
        restart_required: bool,
    },
    StorageReachable {
        server: String,
    },
    StorageUnreachable {
        server: String,
        reason: String,
    },
    ServiceStarted {
        service: String,
        position: usize,
        total: usize,
    },
    StateChanged {
        service: String,
        from: ProvisioningState,
        to: ProvisioningState,
    },
    ContainerExists {
        service: String,
        vmid: u32,
    },
    NetworkRemediated {
        service: String,
        vmid: u32,
        remediation: NetworkRemediation,
    },
    ServiceRunning {
        service: String,
        vmid: u32,
        elapsed: Duration,
    },
    ServiceFailed {
        service: String,
        state: ProvisioningState,
        error: String,
    },
    RunCompleted {
        deployed: Vec<String>,
    },
    RunAborted {
        failed: String,
        not_attempted: Vec<String>,
    },
}

/// Receives progress events from the orchestrator
pub trait DeploymentObserver: Send + Sync {
    fn on_event(&self, event: &DeploymentEvent);
}

/// Forwards events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl DeploymentObserver for TracingObserver {
    fn on_event(&self, event: &DeploymentEvent) {
        match event {
            DeploymentEvent::PlanResolved { plan } => {
                info!("Deployment order: {}", plan.join(", "))
            }
            DeploymentEvent::DependencyCycle { cycle } => {
                warn!("Circular dependency, using best-effort order: {}", cycle)
            }
            DeploymentEvent::BridgePresent { bridge } => {
                info!("Container bridge {} already exists", bridge)
            }
            DeploymentEvent::BridgeCreated {
                bridge,
                restart_required,
            } => {
                info!("Created bridge {}", bridge);
                if *restart_required {
                    warn!("Network changes may require a Proxmox reboot to take effect");
                }
            }
            DeploymentEvent::StorageReachable { server } => {
                info!("NFS server {} is reachable", server)
            }
            DeploymentEvent::StorageUnreachable { server, reason } => {
                warn!("NFS server {} may not be reachable: {}", server, reason)
            }
            DeploymentEvent::ServiceStarted {
                service,
                position,
                total,
            } => info!("[{}/{}] Deploying {}", position, total, service),
            DeploymentEvent::StateChanged { service, from, to } => {
                debug!("{}: {} -> {}", service, from, to)
            }
            DeploymentEvent::ContainerExists { service, vmid } => {
                info!("Container {} for {} already exists, skipping creation", vmid, service)
            }
            DeploymentEvent::NetworkRemediated {
                service,
                remediation,
                ..
            } => match remediation {
                NetworkRemediation::Reachable => debug!("{}: outbound network ok", service),
                NetworkRemediation::RecoveredWithDns => {
                    warn!("{}: outbound network recovered after DNS rewrite", service)
                }
                NetworkRemediation::FallbackMirror => {
                    warn!("{}: network still failing, using fallback mirror", service)
                }
            },
            DeploymentEvent::ServiceRunning {
                service,
                vmid,
                elapsed,
            } => info!(
                "{} is running in container {} ({}s)",
                service,
                vmid,
                elapsed.as_secs()
            ),
            DeploymentEvent::ServiceFailed {
                service,
                state,
                error: err,
            } => error!("{} failed while {}: {}", service, state, err),
            DeploymentEvent::RunCompleted { deployed } => {
                info!("Deployment complete: {} services", deployed.len())
            }
            DeploymentEvent::RunAborted {
                failed,
                not_attempted,
            } => error!(
                "Deployment aborted at {}; not attempted: {}",
                failed,
                not_attempted.join(", ")
            ),
        }
    }
}

/// Keeps every event in memory, in arrival order
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<DeploymentEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DeploymentEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl DeploymentObserver for EventLog {
    fn on_event(&self, event: &DeploymentEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
