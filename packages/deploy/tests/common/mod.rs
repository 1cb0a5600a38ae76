// ABOUTME: Common test utilities for deployment integration tests
// ABOUTME: In-memory cluster, scripted command channel and fixed renderer fakes

#![allow(dead_code)]

use async_trait::async_trait;
use homelab_deploy::channel::{ChannelError, CommandChannel, CommandOutput};
use homelab_deploy::cluster::{
    BridgeConfig, ClusterApi, ClusterError, ContainerRunState, ContainerSummary,
    CreateContainerRequest, NetworkInterface, NodeInfo, OperationHandle, OperationStatus,
};
use homelab_deploy::preflight::StorageProbe;
use homelab_deploy::{
    normalize_container_spec, DescriptorRenderer, EventLog, Orchestrator, ProvisioningSettings,
    RemoteExecutor, ServiceCatalog, ServiceDescriptor,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

pub const NODE: &str = "pve";

#[derive(Debug, Default)]
pub struct ClusterState {
    pub containers: BTreeMap<u32, ContainerRunState>,
    pub created: Vec<CreateContainerRequest>,
    pub started: Vec<u32>,
    pub stopped: Vec<u32>,
    pub destroyed: Vec<u32>,
    pub task_polls: HashMap<String, u32>,
    pub bridges: Vec<String>,
    pub node_queries: u32,
}

/// Cluster fake. Tasks report done after `polls_until_done` status queries.
pub struct FakeCluster {
    pub state: Mutex<ClusterState>,
    pub polls_until_done: u32,
    pub task_exit_status: String,
    pub failing_creates: Vec<u32>,
    pub interfaces: Vec<String>,
    /// Returned by every task status query when set
    pub status_error: Option<ClusterError>,
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self {
            state: Mutex::new(ClusterState::default()),
            polls_until_done: 1,
            task_exit_status: "OK".to_string(),
            failing_creates: Vec::new(),
            interfaces: vec!["vmbr0".to_string(), "vmbr1".to_string()],
            status_error: None,
        }
    }
}

impl FakeCluster {
    pub fn with_container(self, vmid: u32, status: ContainerRunState) -> Self {
        self.state.lock().unwrap().containers.insert(vmid, status);
        self
    }

    pub fn created_ids(&self) -> Vec<u32> {
        self.state
            .lock()
            .unwrap()
            .created
            .iter()
            .map(|r| r.vmid)
            .collect()
    }

    pub fn started_ids(&self) -> Vec<u32> {
        self.state.lock().unwrap().started.clone()
    }

    fn task(&self, kind: &str, vmid: u32) -> OperationHandle {
        OperationHandle(format!("UPID:{}:{}:{}", NODE, kind, vmid))
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, ClusterError> {
        self.state.lock().unwrap().node_queries += 1;
        Ok(vec![NodeInfo {
            name: NODE.to_string(),
            online: true,
        }])
    }

    async fn find_container(
        &self,
        _node: &str,
        vmid: u32,
    ) -> Result<Option<ContainerSummary>, ClusterError> {
        let state = self.state.lock().unwrap();
        Ok(state.containers.get(&vmid).map(|status| ContainerSummary {
            vmid,
            name: None,
            status: status.clone(),
        }))
    }

    async fn create_container(
        &self,
        _node: &str,
        request: &CreateContainerRequest,
    ) -> Result<OperationHandle, ClusterError> {
        if self.failing_creates.contains(&request.vmid) {
            return Err(ClusterError::Api {
                status: 500,
                message: format!("unable to create CT {}", request.vmid),
            });
        }
        let mut state = self.state.lock().unwrap();
        state.created.push(request.clone());
        state
            .containers
            .insert(request.vmid, ContainerRunState::Stopped);
        Ok(self.task("vzcreate", request.vmid))
    }

    async fn start_container(&self, _node: &str, vmid: u32) -> Result<OperationHandle, ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.started.push(vmid);
        state.containers.insert(vmid, ContainerRunState::Running);
        Ok(self.task("vzstart", vmid))
    }

    async fn stop_container(&self, _node: &str, vmid: u32) -> Result<OperationHandle, ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.stopped.push(vmid);
        state.containers.insert(vmid, ContainerRunState::Stopped);
        Ok(self.task("vzstop", vmid))
    }

    async fn destroy_container(
        &self,
        _node: &str,
        vmid: u32,
    ) -> Result<OperationHandle, ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.destroyed.push(vmid);
        state.containers.remove(&vmid);
        Ok(self.task("vzdestroy", vmid))
    }

    async fn container_status(
        &self,
        _node: &str,
        vmid: u32,
    ) -> Result<ContainerRunState, ClusterError> {
        let state = self.state.lock().unwrap();
        state.containers.get(&vmid).cloned().ok_or(ClusterError::Api {
            status: 500,
            message: format!("CT {} does not exist", vmid),
        })
    }

    async fn operation_status(
        &self,
        _node: &str,
        handle: &OperationHandle,
    ) -> Result<OperationStatus, ClusterError> {
        let mut state = self.state.lock().unwrap();
        let polls = state.task_polls.entry(handle.0.clone()).or_insert(0);
        *polls += 1;
        if let Some(err) = &self.status_error {
            return Err(err.clone());
        }
        if *polls >= self.polls_until_done {
            Ok(OperationStatus::Stopped {
                exit_status: Some(self.task_exit_status.clone()),
            })
        } else {
            Ok(OperationStatus::Running)
        }
    }

    async fn list_network_interfaces(
        &self,
        _node: &str,
    ) -> Result<Vec<NetworkInterface>, ClusterError> {
        let state = self.state.lock().unwrap();
        Ok(self
            .interfaces
            .iter()
            .chain(state.bridges.iter())
            .map(|name| NetworkInterface {
                name: name.clone(),
                kind: "bridge".to_string(),
                address: None,
            })
            .collect())
    }

    async fn create_network_bridge(
        &self,
        _node: &str,
        bridge: &BridgeConfig,
    ) -> Result<(), ClusterError> {
        self.state.lock().unwrap().bridges.push(bridge.name.clone());
        Ok(())
    }

    async fn list_containers(&self, _node: &str) -> Result<Vec<ContainerSummary>, ClusterError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .iter()
            .map(|(vmid, status)| ContainerSummary {
                vmid: *vmid,
                name: None,
                status: status.clone(),
            })
            .collect())
    }
}

struct Rule {
    pattern: String,
    outputs: VecDeque<i32>,
    fallback: i32,
}

/// Command channel answering by substring rules; unmatched commands succeed
#[derive(Default)]
pub struct FakeChannel {
    rules: Mutex<Vec<Rule>>,
    pub seen: Mutex<Vec<(u32, String)>>,
}

impl FakeChannel {
    /// Commands containing `pattern` exit with each code in `sequence` in turn,
    /// then with `fallback` forever
    pub fn script(&self, pattern: &str, sequence: &[i32], fallback: i32) {
        self.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_string(),
            outputs: sequence.iter().copied().collect(),
            fallback,
        });
    }

    pub fn commands(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn count_containing(&self, pattern: &str) -> usize {
        self.commands().iter().filter(|c| c.contains(pattern)).count()
    }
}

#[async_trait]
impl CommandChannel for FakeChannel {
    async fn exec(&self, vmid: u32, command: &str) -> Result<CommandOutput, ChannelError> {
        self.seen.lock().unwrap().push((vmid, command.to_string()));

        let mut rules = self.rules.lock().unwrap();
        let exit_code = rules
            .iter_mut()
            .find(|r| command.contains(&r.pattern))
            .map(|r| r.outputs.pop_front().unwrap_or(r.fallback))
            .unwrap_or(0);

        Ok(CommandOutput {
            stdout: String::new(),
            stderr: if exit_code == 0 {
                String::new()
            } else {
                "scripted failure".to_string()
            },
            exit_code,
        })
    }
}

/// Renders `services: <name>` for every service
pub struct StaticRenderer;

impl DescriptorRenderer for StaticRenderer {
    fn render(&self, service: &ServiceDescriptor) -> homelab_deploy::Result<String> {
        Ok(format!("services:\n  {}: {{}}\n", service.name))
    }
}

pub struct FakeStorage {
    pub reachable: bool,
}

#[async_trait]
impl StorageProbe for FakeStorage {
    async fn check(&self, _server: &str) -> Result<(), String> {
        if self.reachable {
            Ok(())
        } else {
            Err("connection refused".to_string())
        }
    }
}

pub fn service(name: &str, vmid: u32, deps: &[&str]) -> ServiceDescriptor {
    let spec = normalize_container_spec(&serde_json::json!({
        "container_id": vmid,
        "hostname": name,
        "ip_address": format!("10.0.0.{}", vmid % 250),
    }))
    .unwrap();
    ServiceDescriptor::new(name, spec).with_dependencies(deps.iter().copied())
}

pub fn catalog(services: Vec<ServiceDescriptor>) -> ServiceCatalog {
    ServiceCatalog::from_descriptors(services)
}

pub struct Harness {
    pub cluster: Arc<FakeCluster>,
    pub channel: Arc<FakeChannel>,
    pub events: Arc<EventLog>,
    pub orchestrator: Orchestrator,
}

pub fn harness(cluster: FakeCluster) -> Harness {
    harness_with(cluster, ProvisioningSettings::default())
}

pub fn harness_with(cluster: FakeCluster, settings: ProvisioningSettings) -> Harness {
    let cluster = Arc::new(cluster);
    let channel = Arc::new(FakeChannel::default());
    let events = Arc::new(EventLog::new());
    let orchestrator = Orchestrator::new(
        cluster.clone(),
        RemoteExecutor::new(channel.clone()),
        Arc::new(StaticRenderer),
        settings,
    )
    .with_observer(events.clone());

    Harness {
        cluster,
        channel,
        events,
        orchestrator,
    }
}
