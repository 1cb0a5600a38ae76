// ABOUTME: Deployment configuration loaded from environment variables
// ABOUTME: Groups cluster, network, Proxmox, storage, defaults and secrets with redacted Debug output

use homelab_config::constants as vars;
use homelab_config::{env_or_default, optional_env, parse_bool_env, parse_env_or_default};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Required environment variable {0} is not set")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("Malformed Proxmox API token, expected user@realm!tokenid=secret")]
    MalformedToken,
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Proxmox API token in `user@realm!tokenid=secret` form
#[derive(Clone, PartialEq, Eq)]
pub struct ProxmoxToken {
    pub user: String,
    pub token_id: String,
    secret: String,
}

impl ProxmoxToken {
    pub fn parse(raw: &str) -> Result<Self> {
        let (identity, secret) = raw.trim().split_once('=').ok_or(ConfigError::MalformedToken)?;
        let (user, token_id) = identity.split_once('!').ok_or(ConfigError::MalformedToken)?;
        if user.is_empty() || token_id.is_empty() || secret.is_empty() {
            return Err(ConfigError::MalformedToken);
        }
        Ok(Self {
            user: user.to_string(),
            token_id: token_id.to_string(),
            secret: secret.to_string(),
        })
    }

    /// Value for the `Authorization` header
    pub fn header_value(&self) -> String {
        format!("PVEAPIToken={}!{}={}", self.user, self.token_id, self.secret)
    }
}

impl fmt::Debug for ProxmoxToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxmoxToken")
            .field("user", &self.user)
            .field("token_id", &self.token_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ClusterSection {
    pub name: String,
    pub domain: String,
    pub internal_domain: String,
    pub admin_email: String,
    pub timezone: String,
}

#[derive(Debug, Clone)]
pub struct NetworkSection {
    pub management_subnet: String,
    pub management_gateway: String,
    pub management_bridge: String,
    pub container_subnet: String,
    pub container_gateway: String,
    pub container_bridge: String,
}

#[derive(Debug, Clone)]
pub struct ProxmoxSection {
    pub host: String,
    pub api_port: u16,
    pub token: ProxmoxToken,
    pub storage: String,
    pub template: String,
    pub ssh_user: String,
    /// Reject self-signed API certificates
    pub verify_tls: bool,
}

#[derive(Debug, Clone)]
pub struct StorageSection {
    pub nfs_server: String,
    pub media_path: String,
    pub config_path: String,
    pub backup_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceDefaults {
    pub cpu: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
}

/// Optional credentials passed through to workload descriptors
#[derive(Clone, Default)]
pub struct Secrets {
    pub cloudflare_api_token: Option<String>,
    pub cloudflare_tunnel_token: Option<String>,
    pub authentik_admin_password: Option<String>,
    pub mysql_root_password: Option<String>,
    pub mysql_password: Option<String>,
    pub redis_password: Option<String>,
    pub discord_webhook: Option<String>,
    pub nordvpn_username: Option<String>,
    pub nordvpn_password: Option<String>,
    pub nordvpn_private_key: Option<String>,
}

impl Secrets {
    /// Every secret by environment variable name, present or not
    pub fn entries(&self) -> Vec<(&'static str, Option<&str>)> {
        vec![
            (vars::CLOUDFLARE_API_TOKEN, self.cloudflare_api_token.as_deref()),
            (vars::CLOUDFLARE_TUNNEL_TOKEN, self.cloudflare_tunnel_token.as_deref()),
            (vars::AUTHENTIK_ADMIN_PASSWORD, self.authentik_admin_password.as_deref()),
            (vars::MYSQL_ROOT_PASSWORD, self.mysql_root_password.as_deref()),
            (vars::MYSQL_PASSWORD, self.mysql_password.as_deref()),
            (vars::REDIS_PASSWORD, self.redis_password.as_deref()),
            (vars::DISCORD_WEBHOOK, self.discord_webhook.as_deref()),
            (vars::NORDVPN_USERNAME, self.nordvpn_username.as_deref()),
            (vars::NORDVPN_PASSWORD, self.nordvpn_password.as_deref()),
            (vars::NORDVPN_PRIVATE_KEY, self.nordvpn_private_key.as_deref()),
        ]
    }
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, value) in self.entries() {
            map.entry(&name, &value.map(|_| "<redacted>"));
        }
        map.finish()
    }
}

#[derive(Debug, Clone)]
pub struct DeployConfig {
    pub cluster: ClusterSection,
    pub network: NetworkSection,
    pub proxmox: ProxmoxSection,
    pub storage: StorageSection,
    pub defaults: ResourceDefaults,
    pub secrets: Secrets,
    pub services_dir: PathBuf,
}

fn required(var: &'static str) -> Result<String> {
    optional_env(var).ok_or(ConfigError::Missing(var))
}

impl DeployConfig {
    /// Build the configuration from the process environment.
    ///
    /// Call after the `.env` file has been loaded. Only presence and basic syntax
    /// are checked here; network consistency is the job of `validation`.
    pub fn from_env() -> Result<Self> {
        let domain = required(vars::DOMAIN)?;

        let cluster = ClusterSection {
            name: env_or_default(vars::CLUSTER_NAME, "homelab"),
            internal_domain: env_or_default(vars::INTERNAL_DOMAIN, &domain),
            domain,
            admin_email: required(vars::ADMIN_EMAIL)?,
            timezone: env_or_default(vars::TIMEZONE, "America/New_York"),
        };

        let network = NetworkSection {
            management_subnet: required(vars::MANAGEMENT_SUBNET)?,
            management_gateway: required(vars::MANAGEMENT_GATEWAY)?,
            management_bridge: env_or_default(vars::MANAGEMENT_BRIDGE, "vmbr0"),
            container_subnet: env_or_default(vars::CONTAINER_SUBNET, "10.0.0.0/24"),
            container_gateway: env_or_default(vars::CONTAINER_GATEWAY, "10.0.0.1"),
            container_bridge: env_or_default(vars::CONTAINER_BRIDGE, "vmbr1"),
        };

        let api_port = match optional_env(vars::PROXMOX_API_PORT) {
            Some(raw) => raw.parse::<u16>().map_err(|e| ConfigError::Invalid {
                var: vars::PROXMOX_API_PORT,
                reason: e.to_string(),
            })?,
            None => 8006,
        };

        let proxmox = ProxmoxSection {
            host: required(vars::PROXMOX_HOST)?,
            api_port,
            token: ProxmoxToken::parse(&required(vars::PROXMOX_TOKEN)?)?,
            storage: env_or_default(vars::PROXMOX_STORAGE, "local-lvm"),
            template: env_or_default(
                vars::PROXMOX_TEMPLATE,
                "local:vztmpl/ubuntu-24.04-standard_24.04-2_amd64.tar.zst",
            ),
            ssh_user: env_or_default(vars::PROXMOX_SSH_USER, "root"),
            verify_tls: parse_bool_env(vars::PROXMOX_VERIFY_TLS, false),
        };

        let storage = StorageSection {
            nfs_server: required(vars::NFS_SERVER)?,
            media_path: env_or_default(vars::NFS_MEDIA_PATH, "/mnt/tank/media"),
            config_path: env_or_default(vars::NFS_CONFIG_PATH, "/mnt/tank/config"),
            backup_path: env_or_default(vars::NFS_BACKUP_PATH, "/mnt/tank/backups"),
        };

        let defaults = ResourceDefaults {
            cpu: parse_env_or_default(vars::DEFAULT_CPU, 1),
            memory_mb: parse_env_or_default(vars::DEFAULT_MEMORY, 512),
            disk_gb: parse_env_or_default(vars::DEFAULT_DISK, 8),
        };

        let secrets = Secrets {
            cloudflare_api_token: optional_env(vars::CLOUDFLARE_API_TOKEN),
            cloudflare_tunnel_token: optional_env(vars::CLOUDFLARE_TUNNEL_TOKEN),
            authentik_admin_password: optional_env(vars::AUTHENTIK_ADMIN_PASSWORD),
            mysql_root_password: optional_env(vars::MYSQL_ROOT_PASSWORD),
            mysql_password: optional_env(vars::MYSQL_PASSWORD),
            redis_password: optional_env(vars::REDIS_PASSWORD),
            discord_webhook: optional_env(vars::DISCORD_WEBHOOK),
            nordvpn_username: optional_env(vars::NORDVPN_USERNAME),
            nordvpn_password: optional_env(vars::NORDVPN_PASSWORD),
            nordvpn_private_key: optional_env(vars::NORDVPN_PRIVATE_KEY),
        };

        Ok(Self {
            cluster,
            network,
            proxmox,
            storage,
            defaults,
            secrets,
            services_dir: PathBuf::from(env_or_default(
                vars::HOMELAB_SERVICES_DIR,
                "config/services",
            )),
        })
    }

    /// Variables available to workload descriptor templates
    pub fn template_vars(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        let mut put = |k: &str, v: &str| {
            out.insert(k.to_string(), v.to_string());
        };

        put("cluster_name", &self.cluster.name);
        put("domain", &self.cluster.domain);
        put("internal_domain", &self.cluster.internal_domain);
        put("admin_email", &self.cluster.admin_email);
        put("timezone", &self.cluster.timezone);

        put("management_subnet", &self.network.management_subnet);
        put("management_gateway", &self.network.management_gateway);
        put("management_bridge", &self.network.management_bridge);
        put("container_subnet", &self.network.container_subnet);
        put("container_gateway", &self.network.container_gateway);
        put("container_bridge", &self.network.container_bridge);

        put("proxmox_host", &self.proxmox.host);
        put("proxmox_api_port", &self.proxmox.api_port.to_string());
        put("proxmox_storage", &self.proxmox.storage);
        put("proxmox_template", &self.proxmox.template);

        put("nfs_server", &self.storage.nfs_server);
        put("nfs_media_path", &self.storage.media_path);
        put("nfs_config_path", &self.storage.config_path);
        put("nfs_backup_path", &self.storage.backup_path);

        put("default_cpu", &self.defaults.cpu.to_string());
        put("default_memory", &self.defaults.memory_mb.to_string());
        put("default_disk", &self.defaults.disk_gb.to_string());

        for (name, value) in self.secrets.entries() {
            if let Some(value) = value {
                put(&name.to_lowercase(), value);
            }
        }

        out
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serial_test::serial;

    pub(crate) fn set_minimal_env() {
        std::env::set_var(vars::DOMAIN, "example.com");
        std::env::set_var(vars::ADMIN_EMAIL, "admin@example.com");
        std::env::set_var(vars::MANAGEMENT_SUBNET, "192.168.1.0/24");
        std::env::set_var(vars::MANAGEMENT_GATEWAY, "192.168.1.1");
        std::env::set_var(vars::PROXMOX_HOST, "192.168.1.10");
        std::env::set_var(vars::PROXMOX_TOKEN, "root@pam!deploy=abc-123");
        std::env::set_var(vars::NFS_SERVER, "192.168.1.20");
    }

    pub(crate) fn clear_env() {
        for var in [
            vars::DOMAIN,
            vars::INTERNAL_DOMAIN,
            vars::ADMIN_EMAIL,
            vars::MANAGEMENT_SUBNET,
            vars::MANAGEMENT_GATEWAY,
            vars::PROXMOX_HOST,
            vars::PROXMOX_TOKEN,
            vars::PROXMOX_API_PORT,
            vars::PROXMOX_VERIFY_TLS,
            vars::NFS_SERVER,
            vars::CLOUDFLARE_API_TOKEN,
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_token_parse() {
        let token = ProxmoxToken::parse("root@pam!deploy=abc-123").unwrap();
        assert_eq!(token.user, "root@pam");
        assert_eq!(token.token_id, "deploy");
        assert_eq!(token.header_value(), "PVEAPIToken=root@pam!deploy=abc-123");
    }

    #[test]
    fn test_token_parse_rejects_malformed() {
        assert_eq!(
            ProxmoxToken::parse("root@pam=abc"),
            Err(ConfigError::MalformedToken)
        );
        assert_eq!(
            ProxmoxToken::parse("root@pam!deploy="),
            Err(ConfigError::MalformedToken)
        );
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let token = ProxmoxToken::parse("root@pam!deploy=supersecret").unwrap();
        assert!(!format!("{:?}", token).contains("supersecret"));

        let secrets = Secrets {
            redis_password: Some("hunter2".to_string()),
            ..Default::default()
        };
        let rendered = format!("{:?}", secrets);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("REDIS_PASSWORD"));
    }

    #[test]
    #[serial]
    fn test_from_env_applies_defaults() {
        clear_env();
        set_minimal_env();

        let config = DeployConfig::from_env().unwrap();
        assert_eq!(config.cluster.name, "homelab");
        assert_eq!(config.cluster.internal_domain, "example.com");
        assert_eq!(config.network.container_bridge, "vmbr1");
        assert_eq!(config.proxmox.api_port, 8006);
        assert!(!config.proxmox.verify_tls);
        assert_eq!(config.defaults.memory_mb, 512);
        assert!(config.secrets.cloudflare_api_token.is_none());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_missing_required() {
        clear_env();
        set_minimal_env();
        std::env::remove_var(vars::NFS_SERVER);

        assert_eq!(
            DeployConfig::from_env().unwrap_err(),
            ConfigError::Missing(vars::NFS_SERVER)
        );

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_verify_tls_opt_in() {
        clear_env();
        set_minimal_env();
        std::env::set_var(vars::PROXMOX_VERIFY_TLS, "yes");

        let config = DeployConfig::from_env().unwrap();
        assert!(config.proxmox.verify_tls);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_bad_port() {
        clear_env();
        set_minimal_env();
        std::env::set_var(vars::PROXMOX_API_PORT, "eighty");

        assert!(matches!(
            DeployConfig::from_env(),
            Err(ConfigError::Invalid { var, .. }) if var == vars::PROXMOX_API_PORT
        ));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_template_vars_include_present_secrets_only() {
        clear_env();
        set_minimal_env();
        std::env::set_var(vars::CLOUDFLARE_API_TOKEN, "cf-token");

        let config = DeployConfig::from_env().unwrap();
        let vars_map = config.template_vars();
        assert_eq!(vars_map.get("domain").map(String::as_str), Some("example.com"));
        assert_eq!(
            vars_map.get("cloudflare_api_token").map(String::as_str),
            Some("cf-token")
        );
        assert!(!vars_map.contains_key("redis_password"));

        clear_env();
    }
}
