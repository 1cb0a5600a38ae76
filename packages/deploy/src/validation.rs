// ABOUTME: Pre-deployment validation of configuration and requested services
// ABOUTME: Collects errors and warnings so every problem is reported before any cluster mutation

use crate::config::DeployConfig;
use crate::discovery::ServiceCatalog;
use crate::net::{parse_host_addr, Ipv4Subnet};
use homelab_config::constants as vars;
use serde::Serialize;
use std::collections::HashMap;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }
}

fn parse_subnet(report: &mut ValidationReport, label: &str, raw: &str) -> Option<Ipv4Subnet> {
    match raw.parse::<Ipv4Subnet>() {
        Ok(subnet) => Some(subnet),
        Err(e) => {
            report.error(format!("{} subnet: {}", label, e));
            None
        }
    }
}

fn parse_addr(report: &mut ValidationReport, label: &str, raw: &str) -> Option<Ipv4Addr> {
    match raw.trim().parse::<Ipv4Addr>() {
        Ok(addr) => Some(addr),
        Err(_) => {
            report.error(format!("{} '{}' is not a valid IPv4 address", label, raw));
            None
        }
    }
}

/// Check network layout and required secrets
pub fn validate_config(config: &DeployConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    let net = &config.network;

    let mgmt = parse_subnet(&mut report, "Management", &net.management_subnet);
    let mgmt_gw = parse_addr(&mut report, "Management gateway", &net.management_gateway);
    let containers = parse_subnet(&mut report, "Container", &net.container_subnet);
    let container_gw = parse_addr(&mut report, "Container gateway", &net.container_gateway);

    if let (Some(subnet), Some(gw)) = (mgmt, mgmt_gw) {
        if !subnet.contains(gw) {
            report.error(format!(
                "Management gateway {} is not in management subnet {}",
                gw, subnet
            ));
        }
    }

    if let (Some(subnet), Some(gw)) = (containers, container_gw) {
        if !subnet.contains(gw) {
            report.error(format!(
                "Container gateway {} is not in container subnet {}",
                gw, subnet
            ));
        }
    }

    if let (Some(a), Some(b)) = (mgmt, containers) {
        if a.overlaps(&b) {
            report.error(format!(
                "Management network {} overlaps with container network {}",
                a, b
            ));
        }
    }

    if let Some(subnet) = mgmt {
        for (label, host) in [
            ("Proxmox host", &config.proxmox.host),
            ("NFS server", &config.storage.nfs_server),
        ] {
            match host.trim().parse::<Ipv4Addr>() {
                Ok(addr) if !subnet.contains(addr) => report.error(format!(
                    "{} {} is not in management network {}",
                    label, addr, subnet
                )),
                Ok(_) => {}
                Err(_) => report.warn(format!(
                    "{} '{}' is not an IPv4 address; management subnet check skipped",
                    label, host
                )),
            }
        }
    }

    let secrets = &config.secrets;
    for (name, value) in [
        (vars::CLOUDFLARE_API_TOKEN, &secrets.cloudflare_api_token),
        (vars::AUTHENTIK_ADMIN_PASSWORD, &secrets.authentik_admin_password),
    ] {
        if value.is_none() {
            report.error(format!("Missing required secret: {}", name));
        }
    }

    if secrets.cloudflare_tunnel_token.is_none() {
        report.warn(format!(
            "{} is not set; Cloudflare tunnel will not start",
            vars::CLOUDFLARE_TUNNEL_TOKEN
        ));
    }

    report
}

/// Check that requested services and their required dependencies exist and do not collide
pub fn validate_services<S: AsRef<str>>(catalog: &ServiceCatalog, requested: &[S]) -> ValidationReport {
    let mut report = ValidationReport::default();

    for skipped in catalog.skipped() {
        report.warn(format!("Skipping {}: {}", skipped.name, skipped.reason));
    }

    let mut ids: HashMap<u32, &str> = HashMap::new();
    let mut ips: HashMap<&str, &str> = HashMap::new();

    for name in requested {
        let name = name.as_ref();
        let Some(service) = catalog.get(name) else {
            match catalog.skipped_reason(name) {
                Some(reason) => report.error(format!("Service {} is invalid: {}", name, reason)),
                None => report.error(format!("Service not found: {}", name)),
            }
            continue;
        };

        let missing: Vec<&str> = service
            .dependencies
            .iter()
            .filter(|d| !catalog.contains(d))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            report.error(format!(
                "Service {} has missing dependencies: {}",
                name,
                missing.join(", ")
            ));
        }

        let spec = &service.container_spec;
        if let Some(other) = ids.insert(spec.id, name) {
            if other != name {
                report.error(format!(
                    "Services {} and {} share container id {}",
                    other, name, spec.id
                ));
            }
        }
        if let Some(other) = ips.insert(spec.bare_ip(), name) {
            if other != name {
                report.error(format!(
                    "Services {} and {} share IP address {}",
                    other,
                    name,
                    spec.bare_ip()
                ));
            }
        }
    }

    report
}

/// Check that requested containers sit inside the container subnet
pub fn validate_addresses<S: AsRef<str>>(
    config: &DeployConfig,
    catalog: &ServiceCatalog,
    requested: &[S],
) -> ValidationReport {
    let mut report = ValidationReport::default();
    let Ok(subnet) = config.network.container_subnet.parse::<Ipv4Subnet>() else {
        return report;
    };

    for service in requested.iter().filter_map(|n| catalog.get(n.as_ref())) {
        match parse_host_addr(&service.container_spec.ip_address) {
            Some(addr) if subnet.contains(addr) => {}
            Some(addr) => report.error(format!(
                "Service {} address {} is outside container subnet {}",
                service.name, addr, subnet
            )),
            None => report.error(format!(
                "Service {} has invalid IP address '{}'",
                service.name, service.container_spec.ip_address
            )),
        }
    }

    report
}

/// Everything checked before a deployment run
pub fn validate_deployment<S: AsRef<str>>(
    config: &DeployConfig,
    catalog: &ServiceCatalog,
    requested: &[S],
) -> ValidationReport {
    let mut report = validate_config(config);
    report.merge(validate_services(catalog, requested));
    report.merge(validate_addresses(config, catalog, requested));
    report
}
