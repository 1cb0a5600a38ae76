// ABOUTME: Table rendering for services, deployment plans, configuration and container status
// ABOUTME: Secret values never reach a table; only whether they are set

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};
use homelab_deploy::{
    ContainerRunState, ContainerSummary, DeployConfig, DeploymentPlan, ServiceCatalog,
};
use std::collections::HashMap;

fn table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn join_or_dash(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

pub fn services_table(catalog: &ServiceCatalog, details: bool) -> Table {
    let mut table = table();
    let mut header = vec!["Service", "Category", "Auto-deploy", "Container", "IP"];
    if details {
        header.extend(["Depends on", "Resources", "Description"]);
    }
    table.set_header(header);

    for service in catalog.iter() {
        let spec = &service.container_spec;
        let mut row = vec![
            service.name.clone(),
            service.category.clone(),
            if service.auto_deploy { "yes" } else { "no" }.to_string(),
            spec.id.to_string(),
            spec.bare_ip().to_string(),
        ];
        if details {
            row.push(join_or_dash(&service.dependencies));
            row.push(format!(
                "{} CPU / {} MB / {} GB",
                spec.cpu_cores, spec.memory_mb, spec.disk_gb
            ));
            row.push(service.description.clone());
        }
        table.add_row(row);
    }
    table
}

pub fn plan_table(plan: &DeploymentPlan, catalog: &ServiceCatalog) -> Table {
    let mut table = table();
    table.set_header(vec!["#", "Service", "Container", "IP", "Depends on"]);
    for (i, name) in plan.iter().enumerate() {
        let (vmid, ip, deps) = match catalog.get(name) {
            Some(service) => (
                service.container_spec.id.to_string(),
                service.container_spec.bare_ip().to_string(),
                join_or_dash(&service.dependencies),
            ),
            None => ("?".to_string(), "?".to_string(), "-".to_string()),
        };
        table.add_row(vec![(i + 1).to_string(), name.clone(), vmid, ip, deps]);
    }
    table
}

pub fn config_table(config: &DeployConfig) -> Table {
    let mut table = table();
    table.set_header(vec!["Setting", "Value"]);

    let rows = [
        ("Cluster", config.cluster.name.clone()),
        ("Domain", config.cluster.domain.clone()),
        (
            "Management network",
            format!(
                "{} via {} ({})",
                config.network.management_subnet,
                config.network.management_gateway,
                config.network.management_bridge
            ),
        ),
        (
            "Container network",
            format!(
                "{} via {} ({})",
                config.network.container_subnet,
                config.network.container_gateway,
                config.network.container_bridge
            ),
        ),
        (
            "Proxmox",
            format!("{}:{}", config.proxmox.host, config.proxmox.api_port),
        ),
        (
            "TLS verification",
            if config.proxmox.verify_tls { "on" } else { "off" }.to_string(),
        ),
        ("Storage", config.proxmox.storage.clone()),
        ("Template", config.proxmox.template.clone()),
        ("NFS server", config.storage.nfs_server.clone()),
        (
            "Services directory",
            config.services_dir.display().to_string(),
        ),
    ];
    for (name, value) in rows {
        table.add_row(vec![name.to_string(), value]);
    }

    for (name, value) in config.secrets.entries() {
        let state = if value.is_some() { "set" } else { "missing" };
        table.add_row(vec![name.to_string(), state.to_string()]);
    }
    table
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub service: String,
    pub vmid: u32,
    pub ip: String,
    /// None when no container with this id exists
    pub state: Option<ContainerRunState>,
}

/// Join discovered services with the containers present on the node
pub fn status_rows(catalog: &ServiceCatalog, containers: &[ContainerSummary]) -> Vec<StatusRow> {
    let by_id: HashMap<u32, &ContainerRunState> =
        containers.iter().map(|c| (c.vmid, &c.status)).collect();

    catalog
        .iter()
        .map(|service| {
            let vmid = service.container_spec.id;
            StatusRow {
                service: service.name.clone(),
                vmid,
                ip: service.container_spec.bare_ip().to_string(),
                state: by_id.get(&vmid).map(|s| (*s).clone()),
            }
        })
        .collect()
}

pub fn status_table(rows: &[StatusRow]) -> Table {
    let mut table = table();
    table.set_header(vec!["Service", "Container", "IP", "State"]);
    for row in rows {
        let state = match &row.state {
            Some(state) => state.to_string(),
            None => "not deployed".to_string(),
        };
        table.add_row(vec![
            row.service.clone(),
            row.vmid.to_string(),
            row.ip.clone(),
            state,
        ]);
    }
    table
}
