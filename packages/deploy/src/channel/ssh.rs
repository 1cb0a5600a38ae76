// ABOUTME: Command channel that reaches containers through `pct exec` over SSH to the Proxmox host
// ABOUTME: Runs each command as `sh -c` inside the container and captures stdout, stderr and exit code

use super::{shell_quote, ChannelError, CommandChannel, CommandOutput};
use crate::config::DeployConfig;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

/// ssh reserves exit status 255 for its own failures
const SSH_TRANSPORT_FAILURE: i32 = 255;

pub struct PctSshChannel {
    host: String,
    user: String,
}

impl PctSshChannel {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
        }
    }

    pub fn from_config(config: &DeployConfig) -> Self {
        Self::new(&config.proxmox.host, &config.proxmox.ssh_user)
    }

    fn remote_command(vmid: u32, command: &str) -> String {
        format!("pct exec {} -- sh -c {}", vmid, shell_quote(command))
    }

    fn ssh_args(&self, vmid: u32, command: &str) -> Vec<String> {
        vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            format!("{}@{}", self.user, self.host),
            Self::remote_command(vmid, command),
        ]
    }
}

#[async_trait]
impl CommandChannel for PctSshChannel {
    async fn exec(&self, vmid: u32, command: &str) -> Result<CommandOutput, ChannelError> {
        debug!("Executing in container {}: {}", vmid, command);

        let output = Command::new("ssh")
            .args(self.ssh_args(vmid, command))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if exit_code == SSH_TRANSPORT_FAILURE {
            return Err(ChannelError::Transport(format!(
                "ssh to {} failed: {}",
                self.host,
                stderr.trim()
            )));
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
            exit_code,
        })
    }

    /// stderr goes straight to the caller's terminal
    async fn stream(
        &self,
        vmid: u32,
        command: &str,
        on_line: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<i32, ChannelError> {
        debug!("Streaming from container {}: {}", vmid, command);

        let mut child = Command::new("ssh")
            .args(self.ssh_args(vmid, command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ChannelError::Transport("ssh stdout was not captured".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            on_line(&line);
        }

        let exit_code = child.wait().await?.code().unwrap_or(-1);
        if exit_code == SSH_TRANSPORT_FAILURE {
            return Err(ChannelError::Transport(format!(
                "ssh to {} failed while streaming",
                self.host
            )));
        }
        Ok(exit_code)
    }
}
