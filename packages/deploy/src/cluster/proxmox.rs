// ABOUTME: Proxmox VE REST client implementing the ClusterApi trait
// ABOUTME: Token-authenticated JSON API over HTTPS with self-signed certificates accepted

use super::{
    BridgeConfig, ClusterApi, ClusterError, ContainerRunState, ContainerSummary,
    CreateContainerRequest, NetworkInterface, NodeInfo, OperationHandle, OperationStatus, Result,
};
use crate::config::{DeployConfig, ProxmoxToken};
use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct ApiNode {
    node: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Deserialize)]
struct ApiContainer {
    #[serde(deserialize_with = "vmid_from_number_or_string")]
    vmid: u32,
    #[serde(default)]
    name: Option<String>,
    status: String,
}

#[derive(Deserialize)]
struct ApiStatus {
    status: String,
}

#[derive(Deserialize)]
struct ApiTaskStatus {
    status: String,
    #[serde(default)]
    exitstatus: Option<String>,
}

#[derive(Deserialize)]
struct ApiInterface {
    iface: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    address: Option<String>,
}

fn vmid_from_number_or_string<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Proxmox VE API client
pub struct ProxmoxClient {
    client: Client,
    base_url: String,
    auth_header: String,
}

impl ProxmoxClient {
    pub fn with_tls_verification(
        host: &str,
        port: u16,
        token: &ProxmoxToken,
        verify_tls: bool,
    ) -> Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(!verify_tls)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ClusterError::Connectivity(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: format!("https://{}:{}/api2/json", host, port),
            auth_header: token.header_value(),
        })
    }

    pub fn from_config(config: &DeployConfig) -> Result<Self> {
        Self::with_tls_verification(
            &config.proxmox.host,
            config.proxmox.api_port,
            &config.proxmox.token,
            config.proxmox.verify_tls,
        )
    }

    /// Check the API answers and return the Proxmox VE version string
    pub async fn version(&self) -> Result<String> {
        #[derive(Deserialize)]
        struct Version {
            version: String,
        }
        let v: Version = self.get("/version").await?;
        Ok(v.version)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        form: Option<&[(String, String)]>,
    ) -> Result<Response> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Proxmox {} {}", method, path);

        let mut request = self
            .client
            .request(method, &url)
            .header("Authorization", &self.auth_header);
        if let Some(form) = form {
            request = request.form(form);
        }

        let response = request.send().await.map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| status.canonical_reason().unwrap_or("unknown").to_string());
            return Err(ClusterError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| ClusterError::Decode(e.to_string()))?;
        Ok(envelope.data)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(Method::GET, path, None).await?;
        Self::decode(response).await
    }

    async fn post_for_task(&self, path: &str, form: &[(String, String)]) -> Result<OperationHandle> {
        let response = self.send(Method::POST, path, Some(form)).await?;
        let upid: String = Self::decode(response).await?;
        Ok(OperationHandle(upid))
    }
}

fn map_transport_error(err: reqwest::Error) -> ClusterError {
    if err.is_connect() || err.is_timeout() || err.is_request() {
        ClusterError::Connectivity(err.to_string())
    } else {
        ClusterError::Decode(err.to_string())
    }
}

#[async_trait]
impl ClusterApi for ProxmoxClient {
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        let nodes: Vec<ApiNode> = self.get("/nodes").await?;
        Ok(nodes
            .into_iter()
            .map(|n| NodeInfo {
                online: n.status.as_deref() != Some("offline"),
                name: n.node,
            })
            .collect())
    }

    async fn find_container(&self, node: &str, vmid: u32) -> Result<Option<ContainerSummary>> {
        Ok(self
            .list_containers(node)
            .await?
            .into_iter()
            .find(|c| c.vmid == vmid))
    }

    async fn create_container(
        &self,
        node: &str,
        request: &CreateContainerRequest,
    ) -> Result<OperationHandle> {
        self.post_for_task(&format!("/nodes/{}/lxc", node), &request.to_params())
            .await
    }

    async fn start_container(&self, node: &str, vmid: u32) -> Result<OperationHandle> {
        self.post_for_task(&format!("/nodes/{}/lxc/{}/status/start", node, vmid), &[])
            .await
    }

    async fn stop_container(&self, node: &str, vmid: u32) -> Result<OperationHandle> {
        self.post_for_task(&format!("/nodes/{}/lxc/{}/status/stop", node, vmid), &[])
            .await
    }

    async fn destroy_container(&self, node: &str, vmid: u32) -> Result<OperationHandle> {
        let response = self
            .send(
                Method::DELETE,
                &format!("/nodes/{}/lxc/{}?purge=1", node, vmid),
                None,
            )
            .await?;
        let upid: String = Self::decode(response).await?;
        Ok(OperationHandle(upid))
    }

    async fn container_status(&self, node: &str, vmid: u32) -> Result<ContainerRunState> {
        let status: ApiStatus = self
            .get(&format!("/nodes/{}/lxc/{}/status/current", node, vmid))
            .await?;
        Ok(ContainerRunState::from_api(&status.status))
    }

    async fn operation_status(
        &self,
        node: &str,
        handle: &OperationHandle,
    ) -> Result<OperationStatus> {
        let task: ApiTaskStatus = self
            .get(&format!("/nodes/{}/tasks/{}/status", node, handle))
            .await?;
        Ok(match task.status.as_str() {
            "stopped" => OperationStatus::Stopped {
                exit_status: task.exitstatus,
            },
            _ => OperationStatus::Running,
        })
    }

    async fn list_network_interfaces(&self, node: &str) -> Result<Vec<NetworkInterface>> {
        let interfaces: Vec<ApiInterface> = self.get(&format!("/nodes/{}/network", node)).await?;
        Ok(interfaces
            .into_iter()
            .map(|i| NetworkInterface {
                name: i.iface,
                kind: i.kind,
                address: i.address,
            })
            .collect())
    }

    async fn create_network_bridge(&self, node: &str, bridge: &BridgeConfig) -> Result<()> {
        self.send(
            Method::POST,
            &format!("/nodes/{}/network", node),
            Some(&bridge.to_params()),
        )
        .await?;
        Ok(())
    }

    async fn list_containers(&self, node: &str) -> Result<Vec<ContainerSummary>> {
        let containers: Vec<ApiContainer> = self.get(&format!("/nodes/{}/lxc", node)).await?;
        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                vmid: c.vmid,
                name: c.name,
                status: ContainerRunState::from_api(&c.status),
            })
            .collect())
    }
}
