// ABOUTME: Service discovery from the on-disk services directory
// ABOUTME: Builds a catalog of service descriptors from container.json, service.json and compose files

use crate::error::DeployError;
use crate::spec::{normalize_container_spec, ConfigShapeError, ContainerSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

pub const CONTAINER_FILE: &str = "container.json";
pub const SERVICE_FILE: &str = "service.json";
pub const COMPOSE_FILES: [&str; 2] = ["docker-compose.yml", "docker-compose.yaml"];

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Failed to read services directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// service.json as written by service authors
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceManifest {
    #[serde(default)]
    pub auto_deploy: bool,
    #[serde(default)]
    pub service: ServiceMetadata,
    #[serde(default)]
    pub dependencies: ServiceDependencies,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceMetadata {
    #[serde(default = "unknown_category")]
    pub category: String,
    #[serde(default)]
    pub description: String,
}

impl Default for ServiceMetadata {
    fn default() -> Self {
        Self {
            category: unknown_category(),
            description: String::new(),
        }
    }
}

fn unknown_category() -> String {
    "unknown".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceDependencies {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub optional: Vec<String>,
}

/// A deployable service, read-only once discovered
#[derive(Debug, Clone, Serialize)]
pub struct ServiceDescriptor {
    pub name: String,
    /// Required dependencies in declaration order, without duplicates
    pub dependencies: Vec<String>,
    pub auto_deploy: bool,
    pub category: String,
    pub description: String,
    pub container_spec: ContainerSpec,
    pub workload_descriptor_path: PathBuf,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>, container_spec: ContainerSpec) -> Self {
        let name = name.into();
        Self {
            workload_descriptor_path: PathBuf::from(&name).join(COMPOSE_FILES[0]),
            name,
            dependencies: Vec::new(),
            auto_deploy: false,
            category: unknown_category(),
            description: String::new(),
            container_spec,
        }
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.clear();
        for dep in deps {
            let dep = dep.into();
            if !self.dependencies.contains(&dep) {
                self.dependencies.push(dep);
            }
        }
        self
    }
}

/// Why a service directory was left out of the catalog
#[derive(Debug, Clone)]
pub enum SkipReason {
    MissingFiles(Vec<String>),
    InvalidManifest(String),
    UnreadableSpec(String),
    InvalidSpec(ConfigShapeError),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MissingFiles(files) => write!(f, "missing {}", files.join(", ")),
            SkipReason::InvalidManifest(reason) => write!(f, "invalid {}: {}", SERVICE_FILE, reason),
            SkipReason::UnreadableSpec(reason) => write!(f, "unreadable {}: {}", CONTAINER_FILE, reason),
            SkipReason::InvalidSpec(err) => write!(f, "{}", err),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SkippedService {
    pub name: String,
    pub reason: SkipReason,
}

/// All valid services found under a services directory, keyed by name
#[derive(Debug, Clone, Default)]
pub struct ServiceCatalog {
    services: BTreeMap<String, ServiceDescriptor>,
    skipped: Vec<SkippedService>,
}

impl ServiceCatalog {
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = ServiceDescriptor>) -> Self {
        Self {
            services: descriptors
                .into_iter()
                .map(|d| (d.name.clone(), d))
                .collect(),
            skipped: Vec::new(),
        }
    }

    /// Sorted service names
    pub fn names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.services.values()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn auto_deploy(&self) -> Vec<String> {
        self.iter()
            .filter(|d| d.auto_deploy)
            .map(|d| d.name.clone())
            .collect()
    }

    pub fn by_category(&self, category: &str) -> Vec<String> {
        self.iter()
            .filter(|d| d.category == category)
            .map(|d| d.name.clone())
            .collect()
    }

    pub fn skipped(&self) -> &[SkippedService] {
        &self.skipped
    }

    pub fn skipped_reason(&self, name: &str) -> Option<&SkipReason> {
        self.skipped.iter().find(|s| s.name == name).map(|s| &s.reason)
    }

    /// Look up a service that is about to be deployed.
    ///
    /// A service that was skipped because its container spec has an unknown shape
    /// reports the shape error; anything else absent is a plain deployment error.
    pub fn require(&self, name: &str) -> Result<&ServiceDescriptor, DeployError> {
        if let Some(descriptor) = self.get(name) {
            return Ok(descriptor);
        }
        match self.skipped_reason(name) {
            Some(SkipReason::InvalidSpec(err)) => Err(DeployError::ConfigShape {
                service: name.to_string(),
                source: err.clone(),
            }),
            Some(other) => Err(DeployError::Deployment(format!(
                "Service {} is not deployable: {}",
                name, other
            ))),
            None => Err(DeployError::Deployment(format!(
                "Service {} not found",
                name
            ))),
        }
    }
}

/// Scan `services_dir` and load every valid service directory.
///
/// A missing services directory yields an empty catalog. Hidden directories are
/// ignored; incomplete or malformed services are recorded as skipped.
pub fn discover(services_dir: &Path) -> Result<ServiceCatalog, DiscoveryError> {
    let mut catalog = ServiceCatalog::default();

    if !services_dir.is_dir() {
        warn!("Services directory not found: {}", services_dir.display());
        return Ok(catalog);
    }

    let io_err = |source| DiscoveryError::Io {
        path: services_dir.to_path_buf(),
        source,
    };

    let mut dirs = Vec::new();
    for entry in fs::read_dir(services_dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if path.is_dir() && !name.starts_with('.') {
            dirs.push((name, path));
        }
    }
    dirs.sort();

    for (name, dir) in dirs {
        match load_service(&name, &dir) {
            Ok(descriptor) => {
                debug!("Discovered service {}", name);
                catalog.services.insert(name, descriptor);
            }
            Err(reason) => {
                warn!("Skipping {}: {}", name, reason);
                catalog.skipped.push(SkippedService { name, reason });
            }
        }
    }

    Ok(catalog)
}

fn missing_files(dir: &Path) -> Vec<String> {
    let mut missing: Vec<String> = [CONTAINER_FILE, SERVICE_FILE]
        .iter()
        .filter(|f| !dir.join(f).is_file())
        .map(|f| f.to_string())
        .collect();
    if !COMPOSE_FILES.iter().any(|f| dir.join(f).is_file()) {
        missing.push(COMPOSE_FILES[0].to_string());
    }
    missing
}

fn read_json(path: &Path) -> Result<serde_json::Value, String> {
    let content = fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&content).map_err(|e| e.to_string())
}

fn load_service(name: &str, dir: &Path) -> Result<ServiceDescriptor, SkipReason> {
    let missing = missing_files(dir);
    if !missing.is_empty() {
        return Err(SkipReason::MissingFiles(missing));
    }

    let manifest: ServiceManifest = read_json(&dir.join(SERVICE_FILE))
        .and_then(|v| serde_json::from_value(v).map_err(|e| e.to_string()))
        .map_err(SkipReason::InvalidManifest)?;

    let raw_spec = read_json(&dir.join(CONTAINER_FILE)).map_err(SkipReason::UnreadableSpec)?;
    let container_spec = normalize_container_spec(&raw_spec).map_err(SkipReason::InvalidSpec)?;

    let compose = COMPOSE_FILES
        .iter()
        .map(|f| dir.join(f))
        .find(|p| p.is_file())
        .unwrap_or_else(|| dir.join(COMPOSE_FILES[0]));

    let mut descriptor = ServiceDescriptor::new(name, container_spec)
        .with_dependencies(manifest.dependencies.required);
    descriptor.auto_deploy = manifest.auto_deploy;
    descriptor.category = manifest.service.category;
    descriptor.description = manifest.service.description;
    descriptor.workload_descriptor_path = compose;
    Ok(descriptor)
}
