// ABOUTME: Placeholder substitution for compose file templates
// ABOUTME: Supports {{ name }} and {{ name | default('value') }} against config-derived variables

use crate::config::DeployConfig;
use crate::discovery::ServiceDescriptor;
use crate::error::Result;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::fs;

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(
        r#"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*(?:\|\s*default\(\s*(?:'([^']*)'|"([^"]*)")\s*\)\s*)?\}\}"#
    )
    .expect("placeholder pattern is valid");
}

/// Produces the exact workload descriptor text uploaded for a service
pub trait DescriptorRenderer: Send + Sync {
    fn render(&self, service: &ServiceDescriptor) -> Result<String>;
}

#[derive(Debug, Clone, Default)]
pub struct TemplateRenderer {
    vars: BTreeMap<String, String>,
}

impl TemplateRenderer {
    pub fn new(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }

    pub fn from_config(config: &DeployConfig) -> Self {
        let mut vars = config.template_vars();
        vars.entry("mysql_database".to_string())
            .or_insert_with(|| "homelab".to_string());
        vars.entry("mysql_user".to_string())
            .or_insert_with(|| "homelab".to_string());
        Self { vars }
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Substitute placeholders. Unknown or empty variables render as their default, or nothing.
    pub fn render_str(&self, template: &str, extra: &BTreeMap<String, String>) -> String {
        PLACEHOLDER
            .replace_all(template, |caps: &Captures| {
                let name = &caps[1];
                let value = extra
                    .get(name)
                    .or_else(|| self.vars.get(name))
                    .filter(|v| !v.is_empty());
                match value {
                    Some(v) => v.clone(),
                    None => caps
                        .get(2)
                        .or_else(|| caps.get(3))
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default(),
                }
            })
            .into_owned()
    }

    fn service_vars(&self, service: &ServiceDescriptor) -> BTreeMap<String, String> {
        let mut extra = BTreeMap::new();
        extra.insert("service_name".to_string(), service.name.clone());
        extra.insert(
            "service_ip".to_string(),
            service.container_spec.bare_ip().to_string(),
        );
        if let Some(domain) = self.vars.get("domain") {
            extra.insert(
                "service_hostname".to_string(),
                format!("{}.{}", service.name, domain),
            );
        }
        extra
    }
}

impl DescriptorRenderer for TemplateRenderer {
    fn render(&self, service: &ServiceDescriptor) -> Result<String> {
        let template = fs::read_to_string(&service.workload_descriptor_path)?;
        Ok(self.render_str(&template, &self.service_vars(service)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::normalize_container_spec;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn renderer() -> TemplateRenderer {
        let mut vars = BTreeMap::new();
        vars.insert("domain".to_string(), "example.com".to_string());
        vars.insert("timezone".to_string(), "UTC".to_string());
        vars.insert("redis_password".to_string(), String::new());
        TemplateRenderer::new(vars)
    }

    #[test]
    fn test_render_variables_and_defaults() {
        let out = renderer().render_str(
            "TZ={{ timezone }}\nHOST={{domain}}\nPW={{ redis_password | default('changeme') }}\nX={{ missing }}|{{ missing | default(\"d\") }}",
            &BTreeMap::new(),
        );
        assert_eq!(out, "TZ=UTC\nHOST=example.com\nPW=changeme\nX=|d");
    }

    #[test]
    fn test_non_placeholders_untouched() {
        let template = "command: echo ${HOME} {not_a_var} {{ }} $$";
        assert_eq!(renderer().render_str(template, &BTreeMap::new()), template);
    }

    #[test]
    fn test_render_descriptor_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("docker-compose.yml");
        fs::write(
            &path,
            "services:\n  {{ service_name }}:\n    hostname: {{ service_hostname }}\n    ip: {{ service_ip }}\n",
        )
        .unwrap();

        let spec = normalize_container_spec(&serde_json::json!({
            "container_id": 105, "hostname": "pihole", "ip_address": "10.0.0.41/24"
        }))
        .unwrap();
        let mut service = ServiceDescriptor::new("pihole", spec);
        service.workload_descriptor_path = path;

        let out = renderer().render(&service).unwrap();
        assert_eq!(
            out,
            "services:\n  pihole:\n    hostname: pihole.example.com\n    ip: 10.0.0.41\n"
        );
    }
}
