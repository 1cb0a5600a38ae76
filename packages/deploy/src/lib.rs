// ABOUTME: Deployment core for a Proxmox homelab: discovery, ordering, preflight and provisioning
// ABOUTME: Re-exports the types the CLI and integration tests work with

//! # Homelab Deploy
//!
//! Discovers service definitions on disk, orders them by dependency and
//! provisions each one into its own LXC container, strictly one at a time.

pub mod bootstrap;
pub mod channel;
pub mod cluster;
pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod executor;
pub mod net;
pub mod orchestrator;
pub mod preflight;
pub mod resolver;
pub mod spec;
pub mod state;
pub mod template;
pub mod validation;
pub mod waiter;

pub use bootstrap::{BootstrapConfig, NetworkRemediation, RuntimeBootstrap};
pub use channel::{ssh::PctSshChannel, ChannelError, CommandChannel, CommandOutput};
pub use cluster::{
    ClusterApi, ClusterError, ContainerRunState, ContainerSummary, CreateContainerRequest,
    NodeInfo, OperationHandle, OperationStatus, ProxmoxClient,
};
pub use config::{ConfigError, DeployConfig, ProxmoxToken};
pub use discovery::{discover, ServiceCatalog, ServiceDescriptor, SkipReason};
pub use error::{DeployError, Result};
pub use events::{DeploymentEvent, DeploymentObserver, EventLog, TracingObserver};
pub use executor::RemoteExecutor;
pub use orchestrator::{
    AbortStage, DeploymentAborted, Orchestrator, ProvisioningSettings, RunReport, ServiceFailure,
    ServiceOutcome,
};
pub use preflight::{Preflight, PreflightReport, PreflightSettings, StorageProbe, TcpStorageProbe};
pub use resolver::{resolve, DependencyCycle, DeploymentPlan, ResolvedPlan};
pub use spec::{normalize_container_spec, ConfigShapeError, ContainerSpec, Mount, SpecShape};
pub use state::{ProvisioningState, ProvisioningTracker};
pub use template::{DescriptorRenderer, TemplateRenderer};
pub use validation::{validate_deployment, ValidationReport};
pub use waiter::{PollStatus, WaitError, Waiter};
