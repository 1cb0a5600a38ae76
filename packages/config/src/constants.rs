// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of every variable the deployer reads from the .env file

// Cluster
pub const CLUSTER_NAME: &str = "CLUSTER_NAME";
pub const DOMAIN: &str = "DOMAIN";
pub const INTERNAL_DOMAIN: &str = "INTERNAL_DOMAIN";
pub const ADMIN_EMAIL: &str = "ADMIN_EMAIL";
pub const TIMEZONE: &str = "TIMEZONE";

// Network
pub const MANAGEMENT_SUBNET: &str = "MANAGEMENT_SUBNET";
pub const MANAGEMENT_GATEWAY: &str = "MANAGEMENT_GATEWAY";
pub const MANAGEMENT_BRIDGE: &str = "MANAGEMENT_BRIDGE";
pub const CONTAINER_SUBNET: &str = "CONTAINER_SUBNET";
pub const CONTAINER_GATEWAY: &str = "CONTAINER_GATEWAY";
pub const CONTAINER_BRIDGE: &str = "CONTAINER_BRIDGE";

// Proxmox
pub const PROXMOX_HOST: &str = "PROXMOX_HOST";
pub const PROXMOX_API_PORT: &str = "PROXMOX_API_PORT";
pub const PROXMOX_TOKEN: &str = "PROXMOX_TOKEN";
pub const PROXMOX_STORAGE: &str = "PROXMOX_STORAGE";
pub const PROXMOX_TEMPLATE: &str = "PROXMOX_TEMPLATE";
pub const PROXMOX_SSH_USER: &str = "PROXMOX_SSH_USER";
pub const PROXMOX_VERIFY_TLS: &str = "PROXMOX_VERIFY_TLS";

// Shared storage
pub const NFS_SERVER: &str = "NFS_SERVER";
pub const NFS_MEDIA_PATH: &str = "NFS_MEDIA_PATH";
pub const NFS_CONFIG_PATH: &str = "NFS_CONFIG_PATH";
pub const NFS_BACKUP_PATH: &str = "NFS_BACKUP_PATH";

// Resource defaults
pub const DEFAULT_CPU: &str = "DEFAULT_CPU";
pub const DEFAULT_MEMORY: &str = "DEFAULT_MEMORY";
pub const DEFAULT_DISK: &str = "DEFAULT_DISK";

// Secrets
pub const CLOUDFLARE_API_TOKEN: &str = "CLOUDFLARE_API_TOKEN";
pub const CLOUDFLARE_TUNNEL_TOKEN: &str = "CLOUDFLARE_TUNNEL_TOKEN";
pub const AUTHENTIK_ADMIN_PASSWORD: &str = "AUTHENTIK_ADMIN_PASSWORD";
pub const MYSQL_ROOT_PASSWORD: &str = "MYSQL_ROOT_PASSWORD";
pub const MYSQL_PASSWORD: &str = "MYSQL_PASSWORD";
pub const REDIS_PASSWORD: &str = "REDIS_PASSWORD";
pub const DISCORD_WEBHOOK: &str = "DISCORD_WEBHOOK";
pub const NORDVPN_USERNAME: &str = "NORDVPN_USERNAME";
pub const NORDVPN_PASSWORD: &str = "NORDVPN_PASSWORD";
pub const NORDVPN_PRIVATE_KEY: &str = "NORDVPN_PRIVATE_KEY";

// Paths
pub const HOMELAB_SERVICES_DIR: &str = "HOMELAB_SERVICES_DIR";
