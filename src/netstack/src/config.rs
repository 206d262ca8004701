//! Netstack provisioning configuration
//! Loaded from netstack.toml; every section falls back to compiled defaults.
use crate::error::{ProvisionError, Result};
use crate::facts;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "netstack.toml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NetstackConfig {
    #[serde(default)]
    pub host: LoginConfig,
    #[serde(default)]
    pub guest: GuestConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub console: ConsoleConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub tap: TapConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub facts: FactPatterns,
}

impl NetstackConfig {
    /// Load from an explicit path, else `netstack.toml` in the working directory,
    /// else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
        if fallback.exists() {
            return Self::from_file(&fallback);
        }

        tracing::info!("[config] No {} found, using defaults", DEFAULT_CONFIG_FILE);
        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProvisionError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        let config = Self::from_toml(&content)
            .map_err(|e| ProvisionError::Config(format!("{:?}: {}", path, e)))?;
        tracing::info!("[config] Loaded netstack config from {:?}", path);
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ProvisionError::Config(format!("Failed to parse config: {}", e)))
    }
}

/// Password login used for both SSH sessions and the console sub-dialogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    pub username: String,
    pub password: String,
    pub port: u16,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            username: "root".to_string(),
            password: "lab".to_string(),
            port: 22,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuestConfig {
    pub username: String,
    pub password: String,
    /// Guest shell address as seen from the host; the local forward targets it.
    pub internal_address: String,
    pub internal_port: u16,
    /// Router console login, sent blind after `exec`.
    pub console_username: String,
    pub console_password: String,
}

impl Default for GuestConfig {
    fn default() -> Self {
        Self {
            username: "root".to_string(),
            password: "lab".to_string(),
            internal_address: "10.11.12.14".to_string(),
            internal_port: 22,
            console_username: "root".to_string(),
            console_password: "root".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TrustMode {
    /// Accept any host key without recording it.
    #[default]
    AcceptAll,
    /// Pin the fingerprint seen on first contact and reject later mismatches.
    TrustOnFirstUse,
}

impl std::str::FromStr for TrustMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "accept-all" => Ok(TrustMode::AcceptAll),
            "tofu" | "trust-on-first-use" => Ok(TrustMode::TrustOnFirstUse),
            _ => Err(format!("Unknown trust mode: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub connect_timeout_secs: u64,
    pub trust: TrustMode,
    /// Fingerprint store used in trust-on-first-use mode.
    pub trust_store: Option<PathBuf>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            trust: TrustMode::AcceptAll,
            trust_store: None,
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn trust_store_path(&self) -> PathBuf {
        self.trust_store.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".netstack")
                .join("known_fingerprints")
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub paging_command: String,
    pub paging_settle_ms: u64,
    pub paging_drain_bytes: usize,
    pub command_pacing_ms: u64,
    pub login_settle_ms: u64,
    pub read_ceiling_bytes: usize,
    /// Idle gap that ends one bounded read.
    pub read_idle_ms: u64,
    /// Optional regex; when set the driver waits for it instead of blind pacing.
    pub prompt_pattern: Option<String>,
    pub prompt_timeout_ms: u64,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            paging_command: "terminal length 0".to_string(),
            paging_settle_ms: 1_000,
            paging_drain_bytes: 1_000,
            command_pacing_ms: 2_000,
            login_settle_ms: 5_000,
            read_ceiling_bytes: 10_000,
            read_idle_ms: 500,
            prompt_pattern: None,
            prompt_timeout_ms: 10_000,
        }
    }
}

impl ConsoleConfig {
    pub fn command_pacing(&self) -> Duration {
        Duration::from_millis(self.command_pacing_ms)
    }

    pub fn paging_settle(&self) -> Duration {
        Duration::from_millis(self.paging_settle_ms)
    }

    pub fn login_settle(&self) -> Duration {
        Duration::from_millis(self.login_settle_ms)
    }

    pub fn read_idle(&self) -> Duration {
        Duration::from_millis(self.read_idle_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_ms: u64,
    /// `None` keeps the legacy unbounded retry.
    pub max_attempts: Option<u32>,
    pub instance_settle_secs: u64,
    /// Pause after each step of the tap setup block.
    pub step_settle_ms: u64,
    pub tap_max_attempts: Option<u32>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2_000,
            max_attempts: None,
            instance_settle_secs: 30,
            step_settle_ms: 2_000,
            tap_max_attempts: None,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn step_settle(&self) -> Duration {
        Duration::from_millis(self.step_settle_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Added to the last octet of the host bridge address to get the router address.
    pub router_address_offset: u8,
    pub bridge_suffix: String,
    pub management_interface: String,
    pub router_interface: String,
    pub router_netmask: String,
    pub guest_device: String,
    pub instance_name: String,
    pub instance_list_command: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            router_address_offset: 9,
            bridge_suffix: "Br1".to_string(),
            management_interface: "eth0".to_string(),
            router_interface: "GigabitEthernet0/RP0/CPU0/0".to_string(),
            router_netmask: "255.255.255.0".to_string(),
            guest_device: "ge0000".to_string(),
            instance_name: "default-sdr--1".to_string(),
            instance_list_command: "virsh -c lxc:/// list | awk '{print $2}'".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TapConfig {
    pub interface: String,
    pub kernel_module: String,
    pub printk_levels: String,
    pub device_dir: String,
    pub device_node: String,
    pub device_major: u32,
    pub device_minor: u32,
    pub network_process: String,
    pub restart_settle_ms: u64,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            interface: "tap123".to_string(),
            kernel_module: "lcndklm".to_string(),
            printk_levels: "1 1 1 1".to_string(),
            device_dir: "/dev/net".to_string(),
            device_node: "/dev/net/tuncisco".to_string(),
            device_major: 10,
            device_minor: 201,
            network_process: "netio".to_string(),
            restart_settle_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub settle_secs: u64,
    pub helper_binary: PathBuf,
    pub helper_remote_path: String,
    pub startup_script: PathBuf,
    pub startup_remote_path: String,
    pub kernel_module: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            settle_secs: 15,
            helper_binary: PathBuf::from("/home/cisco/sunstone/kimctrl"),
            helper_remote_path: "/root/kimctrl".to_string(),
            startup_script: PathBuf::from("start_netbroker.sh"),
            startup_remote_path: "/root/start_netbroker.sh".to_string(),
            kernel_module: "cisco_nb".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub hostname_prefix: String,
    /// Name the local management address is published under in the guest hosts file.
    pub server_alias: String,
    pub package_dir: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            hostname_prefix: "xr-lxc-".to_string(),
            server_alias: "sunstone".to_string(),
            package_dir: "/root/rpms".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub package: PathBuf,
    pub starter_archive: PathBuf,
    pub client_config: PathBuf,
    pub client_config_remote: String,
    pub working_dir: String,
    pub registration_commands: Vec<String>,
    pub launch_command: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            package: PathBuf::from("/tftpboot/chef-12.0.3-1.x86_64.rpm"),
            starter_archive: PathBuf::from("/tftpboot/chef-starter.tar"),
            client_config: PathBuf::from("/tftpboot/client.rb"),
            client_config_remote: "/root/client.rb".to_string(),
            working_dir: "/root/chef-repo".to_string(),
            registration_commands: vec![
                "tar -xvf /root/rpms/chef-starter.tar -C /root/".to_string(),
                "cd chef-repo".to_string(),
                "knife configure client .".to_string(),
                "cp /root/client.rb ./client.rb".to_string(),
                "knife ssl fetch".to_string(),
                "ps -ef | grep chef".to_string(),
            ],
            launch_command: "export SSL_CERT_FILE=/root/chef-repo/.chef/trusted_certs/sunstone.crt && chef-client -d -c /root/chef-repo/client.rb -i 60 -s 20 -L /root/chef-repo/logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub public_key: PathBuf,
    pub remote_key_staging: String,
    pub local_authorized_keys: PathBuf,
    pub guest_public_key: String,
    pub guest_key_copy: PathBuf,
    /// Removed before the run when set.
    pub reset_known_hosts: Option<PathBuf>,
    pub host_address_resolver: PathBuf,
    pub console_setup: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let ssh_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".ssh");
        Self {
            public_key: ssh_dir.join("id_rsa.pub"),
            remote_key_staging: "/root/base_rsa.pub".to_string(),
            local_authorized_keys: ssh_dir.join("authorized_keys"),
            guest_public_key: "/root/.ssh/id_rsa.pub".to_string(),
            guest_key_copy: PathBuf::from("xr_shell.pub"),
            reset_known_hosts: Some(ssh_dir.join("known_hosts")),
            host_address_resolver: PathBuf::from("./get_host_ip.tcl"),
            console_setup: PathBuf::from("./setup_xr_console.tcl"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FactPatterns {
    pub inet_address: String,
    pub hardware_address: String,
    pub interface_mac: String,
    pub interface_handle: String,
}

impl Default for FactPatterns {
    fn default() -> Self {
        Self {
            inet_address: facts::INET_ADDRESS_PATTERN.to_string(),
            hardware_address: facts::HARDWARE_ADDRESS_PATTERN.to_string(),
            interface_mac: facts::INTERFACE_MAC_PATTERN.to_string(),
            interface_handle: facts::INTERFACE_HANDLE_PATTERN.to_string(),
        }
    }
}
