// ABOUTME: Deployment orchestrator driving each service through its provisioning state machine
// ABOUTME: Runs services strictly in plan order and aborts the whole run on the first hard failure

use crate::bootstrap::{BootstrapConfig, NetworkRemediation, RuntimeBootstrap};
use crate::channel::shell_quote;
use crate::cluster::{
    select_node, ClusterApi, ContainerRunState, CreateContainerRequest, OperationHandle,
    OperationStatus,
};
use crate::config::{ConfigError, DeployConfig};
use crate::discovery::{ServiceCatalog, ServiceDescriptor};
use crate::error::{DeployError, Result};
use crate::events::{DeploymentEvent, DeploymentObserver, TracingObserver};
use crate::executor::RemoteExecutor;
use crate::net::Ipv4Subnet;
use crate::preflight::{Preflight, PreflightReport};
use crate::resolver::{DeploymentPlan, ResolvedPlan};
use crate::spec::ContainerSpec;
use crate::state::{ProvisioningState, ProvisioningTracker};
use crate::template::DescriptorRenderer;
use crate::waiter::{PollStatus, WaitError, Waiter, POLL_INTERVAL, READINESS_DEADLINE, TASK_DEADLINE};
use homelab_config::constants as vars;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-attempt bound on the in-container liveness probe
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

const DESCRIPTOR_ROOT: &str = "/opt";
const DESCRIPTOR_FILE: &str = "docker-compose.yml";
const ALWAYS_ON_FEATURE: &str = "nesting=1";

/// Cluster-wide parameters applied to every container
#[derive(Debug, Clone)]
pub struct ProvisioningSettings {
    pub ostemplate: String,
    pub storage: String,
    pub bridge: String,
    pub gateway: String,
    pub prefix: u8,
    pub searchdomain: String,
    pub readiness_probe: String,
    pub poll_interval: Duration,
    pub task_deadline: Duration,
    pub readiness_deadline: Duration,
}

impl ProvisioningSettings {
    pub fn from_config(config: &DeployConfig) -> std::result::Result<Self, ConfigError> {
        let subnet: Ipv4Subnet = config.network.container_subnet.parse().map_err(
            |e: crate::net::SubnetParseError| ConfigError::Invalid {
                var: vars::CONTAINER_SUBNET,
                reason: e.to_string(),
            },
        )?;

        let template = &config.proxmox.template;
        let ostemplate = if template.contains(':') {
            template.clone()
        } else {
            format!("local:vztmpl/{}", template)
        };

        Ok(Self {
            ostemplate,
            storage: config.proxmox.storage.clone(),
            bridge: config.network.container_bridge.clone(),
            gateway: config.network.container_gateway.clone(),
            prefix: subnet.prefix(),
            searchdomain: config.cluster.domain.clone(),
            ..Self::default()
        })
    }
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            ostemplate: "local:vztmpl/ubuntu-24.04-standard_24.04-2_amd64.tar.zst".to_string(),
            storage: "local-lvm".to_string(),
            bridge: "vmbr1".to_string(),
            gateway: "10.0.0.1".to_string(),
            prefix: 24,
            searchdomain: "local".to_string(),
            readiness_probe: "echo ready".to_string(),
            poll_interval: POLL_INTERVAL,
            task_deadline: TASK_DEADLINE,
            readiness_deadline: READINESS_DEADLINE,
        }
    }
}

/// A successfully provisioned service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceOutcome {
    pub service: String,
    pub vmid: u32,
    /// False when the container already existed
    pub created: bool,
    pub remediation: NetworkRemediation,
    pub elapsed: Duration,
    pub path: Vec<ProvisioningState>,
}

#[derive(Error, Debug)]
#[error("{service} failed while {state}: {error}")]
pub struct ServiceFailure {
    pub service: String,
    pub state: ProvisioningState,
    #[source]
    pub error: DeployError,
}

/// Where a run stopped
#[derive(Debug, Clone, PartialEq)]
pub enum AbortStage {
    /// Before any cluster mutation
    Validation,
    Preflight,
    Service {
        name: String,
        state: ProvisioningState,
    },
}

impl fmt::Display for AbortStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortStage::Validation => write!(f, "validation"),
            AbortStage::Preflight => write!(f, "preflight"),
            AbortStage::Service { name, state } => write!(f, "{} ({})", name, state),
        }
    }
}

/// First hard error of a run. Services in `completed` are left running.
#[derive(Error, Debug)]
#[error("Deployment aborted at {stage}: {source}")]
pub struct DeploymentAborted {
    pub stage: AbortStage,
    pub completed: Vec<ServiceOutcome>,
    pub not_attempted: Vec<String>,
    #[source]
    pub source: DeployError,
}

impl DeploymentAborted {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, DeployError::Cancelled)
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub resolved: ResolvedPlan,
    pub node: String,
    pub preflight: Option<PreflightReport>,
    pub outcomes: Vec<ServiceOutcome>,
}

/// Path of the uploaded compose file inside a service container
pub fn descriptor_path(service: &str) -> String {
    format!("{}/{}/{}", DESCRIPTOR_ROOT, service, DESCRIPTOR_FILE)
}

pub fn workload_up_command(service: &str) -> String {
    format!("docker compose -f {} up -d", shell_quote(&descriptor_path(service)))
}

pub fn workload_logs_command(service: &str, lines: u32, follow: bool) -> String {
    let mut command = format!(
        "docker compose -f {} logs --tail {}",
        shell_quote(&descriptor_path(service)),
        lines
    );
    if follow {
        command.push_str(" --follow");
    }
    command
}

/// Flags that work in unprivileged containers. Nesting is always on for Docker.
pub fn unprivileged_features(spec: &ContainerSpec) -> Vec<String> {
    for feature in spec.features.iter().filter(|f| *f != ALWAYS_ON_FEATURE) {
        debug!(
            "Dropping feature '{}' for container {}: not allowed in unprivileged containers",
            feature, spec.id
        );
    }
    vec![ALWAYS_ON_FEATURE.to_string()]
}

pub struct Orchestrator {
    cluster: Arc<dyn ClusterApi>,
    executor: RemoteExecutor,
    bootstrap: RuntimeBootstrap,
    renderer: Arc<dyn DescriptorRenderer>,
    observer: Arc<dyn DeploymentObserver>,
    settings: ProvisioningSettings,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        executor: RemoteExecutor,
        renderer: Arc<dyn DescriptorRenderer>,
        settings: ProvisioningSettings,
    ) -> Self {
        Self {
            bootstrap: RuntimeBootstrap::new(executor.clone(), BootstrapConfig::default()),
            cluster,
            executor,
            renderer,
            observer: Arc::new(TracingObserver),
            settings,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn DeploymentObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_bootstrap_config(mut self, config: BootstrapConfig) -> Self {
        self.bootstrap = RuntimeBootstrap::new(self.executor.clone(), config);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that interrupts waits and stops the run before its next step
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn settings(&self) -> &ProvisioningSettings {
        &self.settings
    }

    fn emit(&self, event: DeploymentEvent) {
        self.observer.on_event(&event);
    }

    fn waiter(&self, deadline: Duration) -> Waiter {
        Waiter::new(self.settings.poll_interval, deadline).with_cancellation(self.cancel.clone())
    }

    /// Resolve, check descriptors, run preflight once, then deploy the plan
    pub async fn run<S: AsRef<str>>(
        &self,
        requested: &[S],
        catalog: &ServiceCatalog,
        preflight: Option<&Preflight>,
    ) -> std::result::Result<RunReport, DeploymentAborted> {
        let resolved = catalog.resolve(requested);
        self.emit(DeploymentEvent::PlanResolved {
            plan: resolved.plan.services().to_vec(),
        });
        for cycle in &resolved.cycles {
            self.emit(DeploymentEvent::DependencyCycle {
                cycle: cycle.clone(),
            });
        }

        self.check_descriptors(&resolved.plan, catalog)?;

        let abort_preflight = |source: DeployError| DeploymentAborted {
            stage: AbortStage::Preflight,
            completed: Vec::new(),
            not_attempted: resolved.plan.services().to_vec(),
            source,
        };

        let node = select_node(self.cluster.as_ref())
            .await
            .map_err(|e| abort_preflight(e.into()))?;
        info!("Deploying to node {}", node);

        let preflight_report = match preflight {
            Some(preflight) => Some(
                preflight
                    .run(&node, self.observer.as_ref())
                    .await
                    .map_err(abort_preflight)?,
            ),
            None => None,
        };

        let outcomes = self.deploy(&node, &resolved.plan, catalog).await?;

        Ok(RunReport {
            resolved,
            node,
            preflight: preflight_report,
            outcomes,
        })
    }

    fn check_descriptors(
        &self,
        plan: &DeploymentPlan,
        catalog: &ServiceCatalog,
    ) -> std::result::Result<(), DeploymentAborted> {
        for name in plan.iter() {
            if let Err(source) = catalog.require(name) {
                return Err(DeploymentAborted {
                    stage: AbortStage::Validation,
                    completed: Vec::new(),
                    not_attempted: plan.services().to_vec(),
                    source,
                });
            }
        }
        Ok(())
    }

    /// Provision every plan entry in order, one at a time.
    ///
    /// The first failure stops the run. Earlier services stay deployed and later
    /// ones are reported as not attempted.
    pub async fn deploy(
        &self,
        node: &str,
        plan: &DeploymentPlan,
        catalog: &ServiceCatalog,
    ) -> std::result::Result<Vec<ServiceOutcome>, DeploymentAborted> {
        self.check_descriptors(plan, catalog)?;

        let total = plan.len();
        let mut completed: Vec<ServiceOutcome> = Vec::with_capacity(total);

        for (i, name) in plan.iter().enumerate() {
            let failure = match catalog.require(name) {
                Ok(service) => {
                    self.emit(DeploymentEvent::ServiceStarted {
                        service: name.clone(),
                        position: i + 1,
                        total,
                    });
                    match self.provision_service(node, service).await {
                        Ok(outcome) => {
                            completed.push(outcome);
                            continue;
                        }
                        Err(failure) => failure,
                    }
                }
                Err(error) => ServiceFailure {
                    service: name.clone(),
                    state: ProvisioningState::Pending,
                    error,
                },
            };

            let not_attempted = plan.services()[i + 1..].to_vec();
            self.emit(DeploymentEvent::RunAborted {
                failed: failure.service.clone(),
                not_attempted: not_attempted.clone(),
            });
            return Err(DeploymentAborted {
                stage: AbortStage::Service {
                    name: failure.service,
                    state: failure.state,
                },
                completed,
                not_attempted,
                source: failure.error,
            });
        }

        self.emit(DeploymentEvent::RunCompleted {
            deployed: completed.iter().map(|o| o.service.clone()).collect(),
        });
        Ok(completed)
    }

    /// Drive one service from Pending to Running
    pub async fn provision_service(
        &self,
        node: &str,
        service: &ServiceDescriptor,
    ) -> std::result::Result<ServiceOutcome, ServiceFailure> {
        let mut tracker = ProvisioningTracker::new();
        let started = Instant::now();

        match self.provision_steps(node, service, &mut tracker).await {
            Ok((created, remediation)) => Ok(ServiceOutcome {
                service: service.name.clone(),
                vmid: service.container_spec.id,
                created,
                remediation,
                elapsed: started.elapsed(),
                path: tracker.path(),
            }),
            Err(error) => {
                let state = tracker.current();
                let _ = tracker.advance(ProvisioningState::Failed);
                self.emit(DeploymentEvent::ServiceFailed {
                    service: service.name.clone(),
                    state,
                    error: error.to_string(),
                });
                Err(ServiceFailure {
                    service: service.name.clone(),
                    state,
                    error,
                })
            }
        }
    }

    fn transition(
        &self,
        service: &str,
        tracker: &mut ProvisioningTracker,
        next: ProvisioningState,
    ) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(DeployError::Cancelled);
        }
        let from = tracker.current();
        tracker
            .advance(next)
            .map_err(|e| DeployError::Deployment(e.to_string()))?;
        self.emit(DeploymentEvent::StateChanged {
            service: service.to_string(),
            from,
            to: next,
        });
        Ok(())
    }

    async fn provision_steps(
        &self,
        node: &str,
        service: &ServiceDescriptor,
        tracker: &mut ProvisioningTracker,
    ) -> Result<(bool, NetworkRemediation)> {
        use ProvisioningState::*;

        let name = service.name.as_str();
        let spec = &service.container_spec;
        let vmid = spec.id;
        let started = Instant::now();

        let created = match self.cluster.find_container(node, vmid).await? {
            Some(existing) => {
                self.transition(name, tracker, ContainerExisting)?;
                self.emit(DeploymentEvent::ContainerExists {
                    service: name.to_string(),
                    vmid,
                });
                if existing.status != ContainerRunState::Running {
                    self.transition(name, tracker, ContainerStarting)?;
                    self.cluster.start_container(node, vmid).await?;
                }
                false
            }
            None => {
                self.transition(name, tracker, ContainerCreating)?;
                let request = self.create_request(service);
                let handle = self.cluster.create_container(node, &request).await?;
                self.wait_for_task(node, &handle).await?;
                info!("Created container {} ({})", vmid, spec.hostname);

                self.transition(name, tracker, ContainerStarting)?;
                self.cluster.start_container(node, vmid).await?;
                true
            }
        };

        self.transition(name, tracker, WaitingReady)?;
        self.wait_ready(node, vmid).await?;

        self.transition(name, tracker, BootstrappingRuntime)?;
        let remediation = self.bootstrap.remediate_network(vmid).await?;
        self.emit(DeploymentEvent::NetworkRemediated {
            service: name.to_string(),
            vmid,
            remediation,
        });
        self.bootstrap.install_runtime(vmid).await?;

        self.transition(name, tracker, UploadingDescriptor)?;
        let content = self.renderer.render(service)?;
        self.executor
            .upload_file(vmid, &descriptor_path(name), &content)
            .await?;

        self.transition(name, tracker, StartingWorkload)?;
        self.executor.exec(vmid, &workload_up_command(name)).await?;

        self.transition(name, tracker, Running)?;
        self.emit(DeploymentEvent::ServiceRunning {
            service: name.to_string(),
            vmid,
            elapsed: started.elapsed(),
        });

        Ok((created, remediation))
    }

    pub fn create_request(&self, service: &ServiceDescriptor) -> CreateContainerRequest {
        let spec = &service.container_spec;
        let ip_cidr = if spec.ip_address.contains('/') {
            spec.ip_address.clone()
        } else {
            format!("{}/{}", spec.ip_address, self.settings.prefix)
        };

        CreateContainerRequest {
            vmid: spec.id,
            hostname: spec.hostname.clone(),
            ostemplate: self.settings.ostemplate.clone(),
            cores: spec.cpu_cores,
            memory_mb: spec.memory_mb,
            storage: self.settings.storage.clone(),
            disk_gb: spec.disk_gb,
            bridge: self.settings.bridge.clone(),
            ip_cidr,
            gateway: self.settings.gateway.clone(),
            nameserver: self.settings.gateway.clone(),
            searchdomain: self.settings.searchdomain.clone(),
            features: unprivileged_features(spec),
            mounts: spec.mounts.clone(),
            description: format!("Homelab service: {}", service.name),
        }
    }

    /// Wait for an asynchronous cluster task to stop with exit status OK
    pub async fn wait_for_task(&self, node: &str, handle: &OperationHandle) -> Result<()> {
        let deadline = self.settings.task_deadline;
        let cluster = &self.cluster;

        let result = self
            .waiter(deadline)
            .wait(|| async move {
                match cluster.operation_status(node, handle).await {
                    Ok(status) if status.succeeded() => PollStatus::Ready(()),
                    Ok(OperationStatus::Stopped { exit_status }) => PollStatus::Failed(
                        exit_status.unwrap_or_else(|| "no exit status".to_string()),
                    ),
                    Ok(OperationStatus::Running) => PollStatus::Pending,
                    Err(e) if e.is_transient() => {
                        debug!("Task {} status unavailable: {}", handle, e);
                        PollStatus::Pending
                    }
                    Err(e) => PollStatus::Failed(DeployError::from(e).to_string()),
                }
            })
            .await;

        match result {
            Ok(outcome) => {
                debug!("Task {} finished after {} polls", handle, outcome.polls);
                Ok(())
            }
            Err(WaitError::TimedOut { deadline, .. }) => Err(DeployError::TaskTimeout {
                task: handle.to_string(),
                timeout: deadline,
            }),
            Err(WaitError::Failed { reason, .. }) => Err(DeployError::Deployment(format!(
                "Task {} failed: {}",
                handle, reason
            ))),
            Err(WaitError::Cancelled { .. }) => Err(DeployError::Cancelled),
        }
    }

    /// Wait until the container reports running and answers the liveness probe
    pub async fn wait_ready(&self, node: &str, vmid: u32) -> Result<()> {
        let deadline = self.settings.readiness_deadline;
        let cluster = &self.cluster;
        let executor = &self.executor;
        let probe = self.settings.readiness_probe.as_str();

        let result = self
            .waiter(deadline)
            .wait(|| async move {
                match cluster.container_status(node, vmid).await {
                    Ok(ContainerRunState::Running) => {
                        match executor.exec_with_timeout(vmid, probe, PROBE_TIMEOUT).await {
                            Ok(_) => PollStatus::Ready(()),
                            Err(e) => {
                                debug!("Container {} running but probe failed: {}", vmid, e);
                                PollStatus::Pending
                            }
                        }
                    }
                    Ok(state) => {
                        debug!("Container {} is {}", vmid, state);
                        PollStatus::Pending
                    }
                    Err(e) if e.is_transient() => {
                        debug!("Container {} status unavailable: {}", vmid, e);
                        PollStatus::Pending
                    }
                    Err(e) => PollStatus::Failed(DeployError::from(e).to_string()),
                }
            })
            .await;

        match result {
            Ok(outcome) => {
                info!("Container {} ready after {}s", vmid, outcome.elapsed.as_secs());
                Ok(())
            }
            Err(WaitError::TimedOut { deadline, .. }) => Err(DeployError::ReadinessTimeout {
                vmid,
                timeout: deadline,
            }),
            Err(WaitError::Failed { reason, .. }) => Err(DeployError::Deployment(reason)),
            Err(WaitError::Cancelled { .. }) => Err(DeployError::Cancelled),
        }
    }

    /// Stop and destroy a service's container. Returns false when it did not exist.
    pub async fn remove_service(&self, node: &str, service: &ServiceDescriptor) -> Result<bool> {
        let vmid = service.container_spec.id;
        let Some(existing) = self.cluster.find_container(node, vmid).await? else {
            warn!("Container {} for {} does not exist", vmid, service.name);
            return Ok(false);
        };

        if existing.status == ContainerRunState::Running {
            let handle = self.cluster.stop_container(node, vmid).await?;
            self.wait_for_task(node, &handle).await?;
        }

        let handle = self.cluster.destroy_container(node, vmid).await?;
        self.wait_for_task(node, &handle).await?;
        info!("Removed container {} ({})", vmid, service.name);
        Ok(true)
    }

    /// Run a command in a service's container, e.g. to read workload logs
    pub async fn exec_in_service(
        &self,
        service: &ServiceDescriptor,
        command: &str,
    ) -> Result<String> {
        let output = self
            .executor
            .exec(service.container_spec.id, command)
            .await?;
        Ok(output.stdout)
    }

    /// Stream a long-running command's output from a service's container.
    ///
    /// Runs until the command exits or the executor's default timeout is reached;
    /// returns false in the latter case.
    pub async fn follow_in_service(
        &self,
        service: &ServiceDescriptor,
        command: &str,
        on_line: &mut (dyn FnMut(&str) + Send),
    ) -> Result<bool> {
        self.executor
            .stream(
                service.container_spec.id,
                command,
                self.executor.default_timeout(),
                on_line,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::{clear_env, set_minimal_env};
    use crate::spec::normalize_container_spec;
    use serial_test::serial;

    #[test]
    fn test_descriptor_path_and_commands() {
        assert_eq!(descriptor_path("pihole"), "/opt/pihole/docker-compose.yml");
        assert_eq!(
            workload_up_command("pihole"),
            "docker compose -f '/opt/pihole/docker-compose.yml' up -d"
        );
        assert_eq!(
            workload_logs_command("pihole", 50, true),
            "docker compose -f '/opt/pihole/docker-compose.yml' logs --tail 50 --follow"
        );
    }

    #[test]
    fn test_unprivileged_features_keep_only_nesting() {
        let spec = normalize_container_spec(&serde_json::json!({
            "container_id": 1, "hostname": "a", "ip_address": "10.0.0.2",
            "features": ["keyctl=1", "nesting=1", "fuse=1"]
        }))
        .unwrap();
        assert_eq!(unprivileged_features(&spec), vec!["nesting=1".to_string()]);
    }

    #[test]
    fn test_abort_stage_display() {
        let stage = AbortStage::Service {
            name: "pihole".to_string(),
            state: ProvisioningState::WaitingReady,
        };
        assert_eq!(stage.to_string(), "pihole (waiting for container)");
    }

    #[test]
    #[serial]
    fn test_settings_from_config() {
        clear_env();
        set_minimal_env();
        std::env::set_var(vars::PROXMOX_TEMPLATE, "debian-12-standard_12.2-1_amd64.tar.zst");
        std::env::set_var(vars::CONTAINER_SUBNET, "10.10.0.0/16");
        let config = DeployConfig::from_env().unwrap();
        std::env::remove_var(vars::PROXMOX_TEMPLATE);
        std::env::remove_var(vars::CONTAINER_SUBNET);
        clear_env();

        let settings = ProvisioningSettings::from_config(&config).unwrap();
        assert_eq!(
            settings.ostemplate,
            "local:vztmpl/debian-12-standard_12.2-1_amd64.tar.zst"
        );
        assert_eq!(settings.prefix, 16);
        assert_eq!(settings.searchdomain, "example.com");
        assert_eq!(settings.readiness_deadline, READINESS_DEADLINE);
    }
}
