// ABOUTME: Container runtime bootstrap with outbound-network remediation
// ABOUTME: Probes connectivity, escalates through DNS rewrite and mirror switch, then installs Docker

use crate::error::{DeployError, Result};
use crate::executor::RemoteExecutor;
use serde::Serialize;
use tracing::{info, warn};

/// How the outbound network was brought up before installation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NetworkRemediation {
    /// First probe succeeded
    Reachable,
    /// Probe succeeded after rewriting the resolver configuration
    RecoveredWithDns,
    /// Both probes failed; package sources were switched and installation proceeds anyway
    FallbackMirror,
}

#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub probe_command: String,
    pub dns_servers: Vec<String>,
    pub fallback_mirror: String,
    pub install_commands: Vec<String>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            probe_command: "ping -c 1 -W 5 archive.ubuntu.com".to_string(),
            dns_servers: vec!["1.1.1.1".to_string(), "8.8.8.8".to_string()],
            fallback_mirror: "http://mirrors.kernel.org/ubuntu".to_string(),
            install_commands: default_install_commands(),
        }
    }
}

fn default_install_commands() -> Vec<String> {
    [
        "DEBIAN_FRONTEND=noninteractive apt-get update",
        "DEBIAN_FRONTEND=noninteractive apt-get install -y apt-transport-https ca-certificates curl gnupg lsb-release",
        "mkdir -p /usr/share/keyrings",
        "curl -fsSL https://download.docker.com/linux/ubuntu/gpg | gpg --batch --yes --dearmor -o /usr/share/keyrings/docker-archive-keyring.gpg",
        "echo \"deb [arch=$(dpkg --print-architecture) signed-by=/usr/share/keyrings/docker-archive-keyring.gpg] https://download.docker.com/linux/ubuntu $(lsb_release -cs) stable\" > /etc/apt/sources.list.d/docker.list",
        "DEBIAN_FRONTEND=noninteractive apt-get update",
        "DEBIAN_FRONTEND=noninteractive apt-get install -y docker-ce docker-ce-cli containerd.io docker-compose-plugin",
        "systemctl enable docker",
        "systemctl start docker",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect()
}

impl BootstrapConfig {
    pub fn dns_rewrite_command(&self) -> String {
        let lines: String = self
            .dns_servers
            .iter()
            .map(|s| format!("nameserver {}\\n", s))
            .collect();
        format!("printf '{}' > /etc/resolv.conf", lines)
    }

    pub fn mirror_switch_command(&self) -> String {
        format!(
            "for f in /etc/apt/sources.list /etc/apt/sources.list.d/ubuntu.sources; do \
             [ -f \"$f\" ] && sed -i -e 's|http://archive.ubuntu.com/ubuntu|{m}|g' -e 's|http://security.ubuntu.com/ubuntu|{m}|g' \"$f\"; \
             done; true",
            m = self.fallback_mirror
        )
    }
}

/// Installs the container runtime inside a freshly started container
pub struct RuntimeBootstrap {
    executor: RemoteExecutor,
    config: BootstrapConfig,
}

impl RuntimeBootstrap {
    pub fn new(executor: RemoteExecutor, config: BootstrapConfig) -> Self {
        Self { executor, config }
    }

    /// A probe that exceeds its timeout counts as unreachable
    async fn probe(&self, vmid: u32) -> Result<bool> {
        match self.executor.exec_tolerant(vmid, &self.config.probe_command).await {
            Ok(output) => Ok(output.success()),
            Err(DeployError::CommandTimeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn remediate_network(&self, vmid: u32) -> Result<NetworkRemediation> {
        if self.probe(vmid).await? {
            return Ok(NetworkRemediation::Reachable);
        }

        warn!(
            "Container {} has no outbound connectivity, rewriting DNS configuration",
            vmid
        );
        self.executor
            .exec_tolerant(vmid, &self.config.dns_rewrite_command())
            .await?;

        if self.probe(vmid).await? {
            info!("Container {} reachable after DNS rewrite", vmid);
            return Ok(NetworkRemediation::RecoveredWithDns);
        }

        warn!(
            "Container {} still unreachable, switching package sources to {}",
            vmid, self.config.fallback_mirror
        );
        self.executor
            .exec_tolerant(vmid, &self.config.mirror_switch_command())
            .await?;

        Ok(NetworkRemediation::FallbackMirror)
    }

    pub async fn install_runtime(&self, vmid: u32) -> Result<()> {
        info!("Installing Docker in container {}", vmid);
        for command in &self.config.install_commands {
            self.executor.exec(vmid, command).await?;
        }
        Ok(())
    }
}
