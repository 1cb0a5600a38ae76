// ABOUTME: Error taxonomy for the deployment core
// ABOUTME: Separates shape, connectivity, timeout, command and deployment failures

use crate::channel::ChannelError;
use crate::cluster::ClusterError;
use crate::spec::ConfigShapeError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Invalid container spec for service '{service}': {source}")]
    ConfigShape {
        service: String,
        #[source]
        source: ConfigShapeError,
    },

    #[error("Cluster control API unreachable: {0}")]
    ClusterConnectivity(String),

    #[error("Cluster API error: {0}")]
    Cluster(String),

    #[error("Task {task} did not finish within {}s", .timeout.as_secs())]
    TaskTimeout { task: String, timeout: Duration },

    #[error("Container {vmid} was not ready within {}s", .timeout.as_secs())]
    ReadinessTimeout { vmid: u32, timeout: Duration },

    #[error("Deployment failed: {0}")]
    Deployment(String),

    #[error("Command timed out after {}s in container {vmid}: {command}", .timeout.as_secs())]
    CommandTimeout {
        vmid: u32,
        command: String,
        timeout: Duration,
    },

    #[error("Command exited with {exit_code} in container {vmid}: {command}: {stderr}")]
    CommandFailed {
        vmid: u32,
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Command channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ClusterError> for DeployError {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::Connectivity(msg) => DeployError::ClusterConnectivity(msg),
            ClusterError::NoNodes => {
                DeployError::ClusterConnectivity("cluster reported no nodes".to_string())
            }
            other => DeployError::Cluster(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;
