// ABOUTME: Builds the deployment core (cluster client, executor, renderer, orchestrator) from configuration
// ABOUTME: Also owns .env loading and tracing subscriber setup for the binary

use anyhow::Context;
use homelab_deploy::{
    discover, ClusterApi, DeployConfig, DeploymentObserver, Orchestrator, PctSshChannel, Preflight,
    PreflightSettings, ProvisioningSettings, ProxmoxClient, RemoteExecutor, ServiceCatalog,
    TcpStorageProbe, TemplateRenderer,
};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Load `path`, or `./.env` when present
pub fn load_env(path: Option<&Path>) -> anyhow::Result<()> {
    match path {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("Failed to load environment file {}", path.display()))?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }
    Ok(())
}

/// `RUST_LOG` wins; otherwise `info`, or `debug` with --verbose
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .compact()
        .try_init();
}

/// Explicit service list, or every auto-deploy service when none was given
pub fn requested_services(catalog: &ServiceCatalog, explicit: &[String]) -> Vec<String> {
    if explicit.is_empty() {
        catalog.auto_deploy()
    } else {
        explicit.to_vec()
    }
}

pub struct DeployContext {
    pub config: DeployConfig,
    pub catalog: ServiceCatalog,
}

impl DeployContext {
    pub fn load() -> anyhow::Result<Self> {
        let config = DeployConfig::from_env().context("Invalid configuration")?;
        let catalog = discover(&config.services_dir).with_context(|| {
            format!(
                "Failed to scan services directory {}",
                config.services_dir.display()
            )
        })?;
        debug!(
            "Discovered {} services in {}",
            catalog.len(),
            config.services_dir.display()
        );
        Ok(Self { config, catalog })
    }

    pub fn connect(&self) -> anyhow::Result<Arc<ProxmoxClient>> {
        let client = ProxmoxClient::from_config(&self.config)
            .context("Failed to create Proxmox API client")?;
        Ok(Arc::new(client))
    }

    pub fn orchestrator(
        &self,
        cluster: Arc<dyn ClusterApi>,
        observer: Arc<dyn DeploymentObserver>,
    ) -> anyhow::Result<Orchestrator> {
        let settings = ProvisioningSettings::from_config(&self.config)?;
        let executor = RemoteExecutor::new(Arc::new(PctSshChannel::from_config(&self.config)));
        let renderer = Arc::new(TemplateRenderer::from_config(&self.config));
        Ok(Orchestrator::new(cluster, executor, renderer, settings).with_observer(observer))
    }

    pub fn preflight(&self, cluster: Arc<dyn ClusterApi>) -> anyhow::Result<Preflight> {
        let settings = PreflightSettings::from_config(&self.config)?;
        Ok(Preflight::new(
            cluster,
            Arc::new(TcpStorageProbe::default()),
            settings,
        ))
    }
}
