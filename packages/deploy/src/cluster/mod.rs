// ABOUTME: Cluster control API trait and shared types for container lifecycle management
// ABOUTME: Abstracts the Proxmox REST API so orchestration can run against fakes in tests

use crate::spec::Mount;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod proxmox;

pub use proxmox::ProxmoxClient;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClusterError {
    #[error("Connection error: {0}")]
    Connectivity(String),

    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected API response: {0}")]
    Decode(String),

    #[error("Cluster has no nodes")]
    NoNodes,
}

impl ClusterError {
    /// Worth polling again: the API was unreachable or answered with a server-side error.
    /// Client errors (auth, unknown task, bad request) and undecodable bodies are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            ClusterError::Connectivity(_) => true,
            ClusterError::Api { status, .. } => *status >= 500,
            ClusterError::Decode(_) | ClusterError::NoNodes => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClusterError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub online: bool,
}

/// Lifecycle state reported for a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerRunState {
    Running,
    Stopped,
    Other(String),
}

impl ContainerRunState {
    pub fn from_api(status: &str) -> Self {
        match status {
            "running" => ContainerRunState::Running,
            "stopped" => ContainerRunState::Stopped,
            other => ContainerRunState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ContainerRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerRunState::Running => write!(f, "running"),
            ContainerRunState::Stopped => write!(f, "stopped"),
            ContainerRunState::Other(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub vmid: u32,
    pub name: Option<String>,
    pub status: ContainerRunState,
}

/// Handle for an asynchronous cluster task (a Proxmox UPID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationHandle(pub String);

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Running,
    Stopped { exit_status: Option<String> },
}

impl OperationStatus {
    pub fn succeeded(&self) -> bool {
        matches!(self, OperationStatus::Stopped { exit_status: Some(s) } if s == "OK")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub name: String,
    pub kind: String,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub name: String,
    pub address: String,
    pub netmask: String,
    pub comments: String,
}

impl BridgeConfig {
    pub fn to_params(&self) -> Vec<(String, String)> {
        vec![
            ("iface".to_string(), self.name.clone()),
            ("type".to_string(), "bridge".to_string()),
            ("address".to_string(), self.address.clone()),
            ("netmask".to_string(), self.netmask.clone()),
            ("bridge_ports".to_string(), "none".to_string()),
            ("bridge_stp".to_string(), "off".to_string()),
            ("bridge_fd".to_string(), "0".to_string()),
            ("autostart".to_string(), "1".to_string()),
            ("comments".to_string(), self.comments.clone()),
        ]
    }
}

/// Declarative container creation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateContainerRequest {
    pub vmid: u32,
    pub hostname: String,
    pub ostemplate: String,
    pub cores: u32,
    pub memory_mb: u64,
    pub storage: String,
    pub disk_gb: u64,
    pub bridge: String,
    /// Address with prefix, e.g. `10.0.0.41/24`
    pub ip_cidr: String,
    pub gateway: String,
    pub nameserver: String,
    pub searchdomain: String,
    pub features: Vec<String>,
    pub mounts: Vec<Mount>,
    pub description: String,
}

impl CreateContainerRequest {
    /// Form parameters for `POST /nodes/{node}/lxc`
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("vmid".to_string(), self.vmid.to_string()),
            ("hostname".to_string(), self.hostname.clone()),
            ("ostemplate".to_string(), self.ostemplate.clone()),
            ("cores".to_string(), self.cores.to_string()),
            ("memory".to_string(), self.memory_mb.to_string()),
            (
                "rootfs".to_string(),
                format!("{}:{}", self.storage, self.disk_gb),
            ),
            (
                "net0".to_string(),
                format!(
                    "name=eth0,bridge={},ip={},gw={}",
                    self.bridge, self.ip_cidr, self.gateway
                ),
            ),
            ("nameserver".to_string(), self.nameserver.clone()),
            ("searchdomain".to_string(), self.searchdomain.clone()),
        ];

        if !self.features.is_empty() {
            params.push(("features".to_string(), self.features.join(",")));
        }

        params.push(("unprivileged".to_string(), "1".to_string()));
        params.push(("onboot".to_string(), "1".to_string()));
        params.push(("startup".to_string(), "order=1".to_string()));
        params.push(("description".to_string(), self.description.clone()));

        for (i, mount) in self.mounts.iter().enumerate() {
            let mut value = format!("{},mp={}", mount.source, mount.target);
            if mount.readonly {
                value.push_str(",ro=1");
            }
            params.push((format!("mp{}", i), value));
        }

        params
    }
}

/// Cluster control API used by preflight and the orchestrator
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>>;

    /// Explicit presence query; `Ok(None)` when no container has this id
    async fn find_container(&self, node: &str, vmid: u32) -> Result<Option<ContainerSummary>>;

    async fn create_container(
        &self,
        node: &str,
        request: &CreateContainerRequest,
    ) -> Result<OperationHandle>;

    async fn start_container(&self, node: &str, vmid: u32) -> Result<OperationHandle>;

    async fn stop_container(&self, node: &str, vmid: u32) -> Result<OperationHandle>;

    async fn destroy_container(&self, node: &str, vmid: u32) -> Result<OperationHandle>;

    async fn container_status(&self, node: &str, vmid: u32) -> Result<ContainerRunState>;

    async fn operation_status(&self, node: &str, handle: &OperationHandle)
        -> Result<OperationStatus>;

    async fn list_network_interfaces(&self, node: &str) -> Result<Vec<NetworkInterface>>;

    async fn create_network_bridge(&self, node: &str, bridge: &BridgeConfig) -> Result<()>;

    async fn list_containers(&self, node: &str) -> Result<Vec<ContainerSummary>>;
}

/// Pick the node to deploy on. Single-node clusters are the norm, so the first node wins.
pub async fn select_node(api: &dyn ClusterApi) -> Result<String> {
    api.list_nodes()
        .await?
        .into_iter()
        .next()
        .map(|n| n.name)
        .ok_or(ClusterError::NoNodes)
}
