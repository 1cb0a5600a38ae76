// ABOUTME: Canonical container resource spec and normalization of the two on-disk shapes
// ABOUTME: Accepts the nested (`container`) and flat (`container_id`) container.json layouts

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

const DEFAULT_CPU_CORES: u32 = 1;
const DEFAULT_MEMORY_MB: u64 = 512;
const DEFAULT_DISK_GB: u64 = 8;

/// Which raw layout a container.json used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpecShape {
    Nested,
    Flat,
}

impl fmt::Display for SpecShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpecShape::Nested => write!(f, "nested"),
            SpecShape::Flat => write!(f, "flat"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigShapeError {
    #[error("Container spec matches neither the nested (`container`) nor the flat (`container_id`) shape")]
    UnrecognizedShape,

    #[error("Invalid {shape} container spec: {reason}")]
    InvalidField { shape: SpecShape, reason: String },
}

/// A bind mount into the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub readonly: bool,
}

/// Normalized container resource spec, independent of the source layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerSpec {
    pub id: u32,
    pub hostname: String,
    pub ip_address: String,
    pub cpu_cores: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
    pub mounts: Vec<Mount>,
    pub features: BTreeSet<String>,
}

impl ContainerSpec {
    /// Address without any CIDR suffix the file may carry
    pub fn bare_ip(&self) -> &str {
        self.ip_address
            .split('/')
            .next()
            .unwrap_or(&self.ip_address)
    }
}

#[derive(Debug, Deserialize)]
struct NestedShape {
    container: NestedContainer,
}

#[derive(Debug, Deserialize)]
struct NestedContainer {
    id: u32,
    hostname: String,
    ip: String,
    resources: NestedResources,
    #[serde(default)]
    features: Vec<String>,
    #[serde(default)]
    nfs_mounts: Option<Vec<Mount>>,
}

#[derive(Debug, Deserialize)]
struct NestedResources {
    cpu: u32,
    memory: u64,
    disk: u64,
}

#[derive(Debug, Deserialize)]
struct FlatShape {
    container_id: u32,
    hostname: String,
    ip_address: String,
    #[serde(default = "default_cpu_cores")]
    cpu_cores: u32,
    #[serde(default = "default_memory_mb")]
    memory_mb: u64,
    #[serde(default = "default_disk_gb")]
    disk_gb: u64,
    #[serde(default)]
    features: Vec<String>,
    #[serde(default)]
    mounts: Option<Vec<Mount>>,
}

fn default_cpu_cores() -> u32 {
    DEFAULT_CPU_CORES
}

fn default_memory_mb() -> u64 {
    DEFAULT_MEMORY_MB
}

fn default_disk_gb() -> u64 {
    DEFAULT_DISK_GB
}

/// Identify the layout of a raw container.json document by its top-level keys
pub fn detect_shape(raw: &Value) -> Option<SpecShape> {
    let object = raw.as_object()?;
    if object.contains_key("container") {
        Some(SpecShape::Nested)
    } else if object.contains_key("container_id") {
        Some(SpecShape::Flat)
    } else {
        None
    }
}

/// Normalize a raw container.json document into a [`ContainerSpec`].
///
/// Only the two documented layouts are accepted. A document that looks like one
/// of them but has missing or mistyped fields is reported against that layout.
pub fn normalize_container_spec(raw: &Value) -> Result<ContainerSpec, ConfigShapeError> {
    let shape = detect_shape(raw).ok_or(ConfigShapeError::UnrecognizedShape)?;
    let invalid = |e: serde_json::Error| ConfigShapeError::InvalidField {
        shape,
        reason: e.to_string(),
    };

    let spec = match shape {
        SpecShape::Nested => {
            let nested = NestedShape::deserialize(raw).map_err(invalid)?.container;
            ContainerSpec {
                id: nested.id,
                hostname: nested.hostname,
                ip_address: nested.ip,
                cpu_cores: nested.resources.cpu,
                memory_mb: nested.resources.memory,
                disk_gb: nested.resources.disk,
                mounts: nested.nfs_mounts.unwrap_or_default(),
                features: nested.features.into_iter().collect(),
            }
        }
        SpecShape::Flat => {
            let flat = FlatShape::deserialize(raw).map_err(invalid)?;
            ContainerSpec {
                id: flat.container_id,
                hostname: flat.hostname,
                ip_address: flat.ip_address,
                cpu_cores: flat.cpu_cores,
                memory_mb: flat.memory_mb,
                disk_gb: flat.disk_gb,
                mounts: flat.mounts.unwrap_or_default(),
                features: flat.features.into_iter().collect(),
            }
        }
    };

    if spec.hostname.trim().is_empty() {
        return Err(ConfigShapeError::InvalidField {
            shape,
            reason: "hostname must not be empty".to_string(),
        });
    }

    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn test_nested_and_flat_normalize_to_same_spec() {
        let nested = json!({
            "container": {
                "id": 105,
                "hostname": "pihole",
                "ip": "10.0.0.41",
                "resources": { "cpu": 2, "memory": 1024, "disk": 16 },
                "features": ["nesting=1"],
                "nfs_mounts": [
                    { "source": "/mnt/tank/config/pihole", "target": "/config", "readonly": false }
                ]
            }
        });
        let flat = json!({
            "container_id": 105,
            "hostname": "pihole",
            "ip_address": "10.0.0.41",
            "cpu_cores": 2,
            "memory_mb": 1024,
            "disk_gb": 16,
            "features": ["nesting=1"],
            "mounts": [
                { "source": "/mnt/tank/config/pihole", "target": "/config" }
            ]
        });

        let a = normalize_container_spec(&nested).unwrap();
        let b = normalize_container_spec(&flat).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.id, 105);
        assert_eq!(a.mounts.len(), 1);
        assert!(!a.mounts[0].readonly);
    }

    #[test]
    fn test_flat_shape_applies_resource_defaults() {
        let flat = json!({
            "container_id": 120,
            "hostname": "homepage",
            "ip_address": "10.0.0.44"
        });

        let spec = normalize_container_spec(&flat).unwrap();
        assert_eq!(spec.cpu_cores, 1);
        assert_eq!(spec.memory_mb, 512);
        assert_eq!(spec.disk_gb, 8);
        assert!(spec.mounts.is_empty());
        assert!(spec.features.is_empty());
    }

    #[test]
    fn test_null_mount_list_is_empty() {
        let nested = json!({
            "container": {
                "id": 110,
                "hostname": "sonarr",
                "ip": "10.0.0.10",
                "resources": { "cpu": 1, "memory": 512, "disk": 8 },
                "nfs_mounts": null
            }
        });
        assert!(normalize_container_spec(&nested).unwrap().mounts.is_empty());
    }

    #[rstest]
    #[case(json!({ "id": 1, "hostname": "x" }))]
    #[case(json!([1, 2, 3]))]
    #[case(json!("container"))]
    #[case(json!({}))]
    fn test_unrecognized_shapes(#[case] raw: Value) {
        assert_eq!(
            normalize_container_spec(&raw),
            Err(ConfigShapeError::UnrecognizedShape)
        );
    }

    #[rstest]
    #[case(json!({ "container": { "id": 1, "hostname": "x", "ip": "10.0.0.2" } }), SpecShape::Nested)]
    #[case(json!({ "container_id": "abc", "hostname": "x", "ip_address": "10.0.0.2" }), SpecShape::Flat)]
    #[case(json!({ "container_id": 7, "hostname": "  ", "ip_address": "10.0.0.2" }), SpecShape::Flat)]
    fn test_recognized_shape_with_bad_fields(#[case] raw: Value, #[case] expected: SpecShape) {
        match normalize_container_spec(&raw) {
            Err(ConfigShapeError::InvalidField { shape, .. }) => assert_eq!(shape, expected),
            other => panic!("expected InvalidField, got {:?}", other),
        }
    }

    #[test]
    fn test_bare_ip_strips_prefix() {
        let spec = normalize_container_spec(&json!({
            "container_id": 7,
            "hostname": "vpn",
            "ip_address": "10.0.0.42/24"
        }))
        .unwrap();
        assert_eq!(spec.bare_ip(), "10.0.0.42");
    }
}
