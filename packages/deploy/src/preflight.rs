// ABOUTME: Once-per-run cluster preflight: container bridge setup and shared storage reachability
// ABOUTME: Bridge creation failures are fatal; storage problems only produce warnings

use crate::cluster::{BridgeConfig, ClusterApi};
use crate::config::{ConfigError, DeployConfig};
use crate::error::Result;
use crate::events::{DeploymentEvent, DeploymentObserver};
use crate::net::Ipv4Subnet;
use async_trait::async_trait;
use homelab_config::constants as vars;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info};

pub const NFS_PORT: u16 = 2049;
pub const STORAGE_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Best-effort reachability check for the shared storage server
#[async_trait]
pub trait StorageProbe: Send + Sync {
    async fn check(&self, server: &str) -> std::result::Result<(), String>;
}

/// Opens a TCP connection to the NFS port
#[derive(Debug, Clone)]
pub struct TcpStorageProbe {
    port: u16,
    timeout: Duration,
}

impl Default for TcpStorageProbe {
    fn default() -> Self {
        Self {
            port: NFS_PORT,
            timeout: STORAGE_PROBE_TIMEOUT,
        }
    }
}

impl TcpStorageProbe {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }
}

#[async_trait]
impl StorageProbe for TcpStorageProbe {
    async fn check(&self, server: &str) -> std::result::Result<(), String> {
        match tokio::time::timeout(self.timeout, TcpStream::connect((server, self.port))).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "no answer on port {} within {}s",
                self.port,
                self.timeout.as_secs()
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightSettings {
    pub bridge: String,
    pub gateway: String,
    pub netmask: String,
    pub nfs_server: String,
}

impl PreflightSettings {
    pub fn from_config(config: &DeployConfig) -> std::result::Result<Self, ConfigError> {
        let subnet: Ipv4Subnet =
            config
                .network
                .container_subnet
                .parse()
                .map_err(|e: crate::net::SubnetParseError| ConfigError::Invalid {
                    var: vars::CONTAINER_SUBNET,
                    reason: e.to_string(),
                })?;

        Ok(Self {
            bridge: config.network.container_bridge.clone(),
            gateway: config.network.container_gateway.clone(),
            netmask: subnet.netmask().to_string(),
            nfs_server: config.storage.nfs_server.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BridgeOutcome {
    AlreadyPresent,
    Created,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StorageOutcome {
    Reachable,
    Unreachable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreflightReport {
    pub bridge: BridgeOutcome,
    pub storage: StorageOutcome,
}

pub struct Preflight {
    cluster: Arc<dyn ClusterApi>,
    probe: Arc<dyn StorageProbe>,
    settings: PreflightSettings,
}

impl Preflight {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        probe: Arc<dyn StorageProbe>,
        settings: PreflightSettings,
    ) -> Self {
        Self {
            cluster,
            probe,
            settings,
        }
    }

    /// Make sure the container bridge exists on `node`
    pub async fn ensure_bridge(
        &self,
        node: &str,
        observer: &dyn DeploymentObserver,
    ) -> Result<BridgeOutcome> {
        let interfaces = self.cluster.list_network_interfaces(node).await?;
        if interfaces.iter().any(|i| i.name == self.settings.bridge) {
            observer.on_event(&DeploymentEvent::BridgePresent {
                bridge: self.settings.bridge.clone(),
            });
            return Ok(BridgeOutcome::AlreadyPresent);
        }

        info!("Creating container bridge {} on {}", self.settings.bridge, node);
        let bridge = BridgeConfig {
            name: self.settings.bridge.clone(),
            address: self.settings.gateway.clone(),
            netmask: self.settings.netmask.clone(),
            comments: "Container network bridge (auto-created by homelab)".to_string(),
        };
        self.cluster.create_network_bridge(node, &bridge).await?;

        observer.on_event(&DeploymentEvent::BridgeCreated {
            bridge: self.settings.bridge.clone(),
            restart_required: true,
        });
        Ok(BridgeOutcome::Created)
    }

    /// Never fails; an unreachable server is reported and the run continues
    pub async fn check_storage(&self, observer: &dyn DeploymentObserver) -> StorageOutcome {
        let server = &self.settings.nfs_server;
        debug!("Checking NFS server {}", server);
        match self.probe.check(server).await {
            Ok(()) => {
                observer.on_event(&DeploymentEvent::StorageReachable {
                    server: server.clone(),
                });
                StorageOutcome::Reachable
            }
            Err(reason) => {
                observer.on_event(&DeploymentEvent::StorageUnreachable {
                    server: server.clone(),
                    reason: reason.clone(),
                });
                StorageOutcome::Unreachable(reason)
            }
        }
    }

    pub async fn run(&self, node: &str, observer: &dyn DeploymentObserver) -> Result<PreflightReport> {
        let bridge = self.ensure_bridge(node, observer).await?;
        let storage = self.check_storage(observer).await;
        Ok(PreflightReport { bridge, storage })
    }
}
