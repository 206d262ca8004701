//! In-memory lab: one fake standing in for both the SSH transport and the
//! local process runner. Remote hosts keep a tiny filesystem and answer the
//! commands the workflow sends with canned output.
#![allow(dead_code)]

use async_trait::async_trait;
use netstack::config::NetstackConfig;
use netstack::process::{display_command, ProcessOutput, ProcessRunner};
use netstack::transport::{Credentials, Endpoint, FileKind, Session, SessionMode, SessionTransport};
use netstack::{ProvisionError, Result, WorkflowInputs};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const HOST_IP: &str = "192.168.122.50";
pub const HOST: &str = "192.168.122.50:22";
pub const GUEST: &str = "127.0.0.1:1234";
pub const GUEST_KEY: &str = "ssh-rsa AAAAGUEST root@xr-lxc";

pub const BRIDGE_IFCONFIG: &str = "lab1Br1   Link encap:Ethernet  HWaddr 52:54:00:aa:bb:cc\n          inet addr:10.0.0.1  Bcast:10.0.0.255  Mask:255.255.255.0\n";
pub const BRIDGE_IFCONFIG_DOWN: &str = "lab1Br1   Link encap:Ethernet\n";
pub const MANAGEMENT_IFCONFIG: &str = "eth0      Link encap:Ethernet  HWaddr 52:54:00:11:22:33\n          inet addr:192.168.1.5  Bcast:192.168.1.255  Mask:255.255.255.0\n";
pub const SHOW_INTERFACE: &str = "GigabitEthernet0/RP0/CPU0/0 is up\n  Hardware is GigabitEthernet, address is 0011.2233.4455 (bia 0011.2233.4455)\n";
pub const SHOW_DATABASE: &str = "View: OWN - Owner, L3P - Local 3rd Party\nInterface GigabitEthernet0/RP0/CPU0/0, ifh 0x2a (up, 1514)\n";

pub fn inputs() -> WorkflowInputs {
    WorkflowInputs {
        host_console_port: 2001,
        router_console_port: 2002,
        net_name: "lab1".to_string(),
        forward_port: 1234,
    }
}

/// Defaults with every local side effect pointed into `dir`.
pub fn lab_config(dir: &Path) -> NetstackConfig {
    let mut config = NetstackConfig::default();
    config.paths.public_key = dir.join("id_rsa.pub");
    config.paths.local_authorized_keys = dir.join("authorized_keys");
    config.paths.guest_key_copy = dir.join("xr_shell.pub");
    config.paths.reset_known_hosts = Some(dir.join("known_hosts"));
    config.polling.max_attempts = Some(20);
    config
}

#[derive(Debug, Default)]
pub struct LabState {
    pub opened: usize,
    pub closed: usize,
    /// (endpoint, command) for single-command sessions.
    pub execs: Vec<(String, String)>,
    /// (endpoint, text) written to interactive shells.
    pub sent: Vec<(String, String)>,
    pub uploads: Vec<(String, String)>,
    pub processes: Vec<String>,
    /// Commands started through `run_detached`.
    pub detached: Vec<String>,
    pub files: HashMap<(String, String), FileKind>,

    pub listing_misses: u32,
    pub listing_calls: u32,
    pub bridge_misses: u32,
    pub bridge_calls: u32,
    pub mac_misses: u32,
    pub mac_queries: u32,
    pub mac_reply: Option<String>,
    pub handle_misses: u32,
    pub handle_queries: u32,

    pub tap_present: bool,
    pub tap_failures: u32,
    pub route_present: bool,
    pub nat_present: bool,
    pub installed: bool,
    /// Any command containing this fails with an execution error.
    pub fail_exec: Option<String>,
    /// `stat` of this path fails with a transfer error instead of answering.
    pub fail_stat: Option<String>,
}

impl LabState {
    pub fn execs_on(&self, endpoint: &str) -> Vec<&str> {
        self.execs
            .iter()
            .filter(|(ep, _)| ep == endpoint)
            .map(|(_, cmd)| cmd.as_str())
            .collect()
    }

    pub fn exec_count(&self, command: &str) -> usize {
        self.execs.iter().filter(|(_, cmd)| cmd == command).count()
    }

    pub fn sent_on(&self, endpoint: &str) -> String {
        self.sent
            .iter()
            .filter(|(ep, _)| ep == endpoint)
            .map(|(_, text)| text.as_str())
            .collect()
    }

    pub fn file(&self, endpoint: &str, path: &str) -> Option<FileKind> {
        self.files
            .get(&(endpoint.to_string(), path.to_string()))
            .copied()
    }

    fn exec(&mut self, endpoint: &str, command: &str) -> Result<String> {
        self.execs.push((endpoint.to_string(), command.to_string()));

        if let Some(pattern) = &self.fail_exec {
            if command.contains(pattern.as_str()) {
                return Err(execution(command, "injected failure"));
            }
        }

        if let Some(path) = command.strip_prefix("mkdir -p ") {
            self.files
                .insert((endpoint.to_string(), path.to_string()), FileKind::Directory);
            return Ok(String::new());
        }
        if let Some(rest) = command.strip_prefix("mknod ") {
            let path = rest.split_whitespace().next().unwrap_or_default();
            let parent = Path::new(path)
                .parent()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default();
            if self.file(endpoint, &parent) != Some(FileKind::Directory) {
                return Err(execution(command, "No such file or directory"));
            }
            self.files
                .insert((endpoint.to_string(), path.to_string()), FileKind::CharDevice);
            return Ok(String::new());
        }
        if let Some(path) = command.strip_prefix("rm -r ") {
            let nested = format!("{}/", path);
            let before = self.files.len();
            self.files
                .retain(|(ep, p), _| !(ep == endpoint && (p == path || p.starts_with(&nested))));
            if self.files.len() == before {
                return Err(execution(command, "No such file or directory"));
            }
            return Ok(String::new());
        }
        if command.starts_with("virsh") {
            self.listing_calls += 1;
            if self.listing_calls <= self.listing_misses {
                return Ok("Name\n\n".to_string());
            }
            return Ok("Name\n\ndefault-sdr--1\n".to_string());
        }
        match command {
            "ifconfig tap123" if self.tap_present => Ok("tap123 Link encap:Ethernet\n".to_string()),
            "ifconfig tap123" => Err(execution(command, "Device not found")),
            "ifconfig tap123 up" if self.tap_failures > 0 => {
                self.tap_failures -= 1;
                Err(execution(command, "No such device"))
            }
            "ifconfig tap123 up" => {
                self.tap_present = true;
                Ok(String::new())
            }
            "ip route del default" if self.route_present => {
                self.route_present = false;
                Ok(String::new())
            }
            "ip route del default" => Err(execution(command, "No such process")),
            _ if command.starts_with("rpm -q ") && !self.installed => {
                Err(execution(command, "package is not installed"))
            }
            _ if command.starts_with("rpm -ivh") => {
                self.installed = true;
                Ok(String::new())
            }
            _ => Ok(String::new()),
        }
    }

    /// Console reply to one interactive write.
    fn reply(&mut self, text: &str) -> String {
        if text.starts_with("sh interfaces") {
            self.mac_queries += 1;
            if self.mac_queries <= self.mac_misses {
                return "GigabitEthernet0/RP0/CPU0/0 is administratively down\n".to_string();
            }
            return self
                .mac_reply
                .clone()
                .unwrap_or_else(|| SHOW_INTERFACE.to_string());
        }
        if text.starts_with("sh im database interface") {
            self.handle_queries += 1;
            if self.handle_queries <= self.handle_misses {
                return "% No such interface\n".to_string();
            }
            return SHOW_DATABASE.to_string();
        }
        if let Some(process) = text.strip_prefix("show proc | i ") {
            let process = process.trim();
            return format!("{:<8} 1167  running\n", process);
        }
        String::new()
    }

    fn process(&mut self, program: &str, args: &[String]) -> ProcessOutput {
        self.processes.push(display_command(program, args));
        let first = args.first().map(String::as_str).unwrap_or_default();
        let ok = |stdout: &str| ProcessOutput {
            status: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        };
        let failed = ProcessOutput {
            status: 1,
            stdout: String::new(),
            stderr: "failed".to_string(),
        };

        if program.ends_with("get_host_ip.tcl") {
            return ok(&format!("{}\n", HOST_IP));
        }
        match (program, first) {
            ("ifconfig", "eth0") => ok(MANAGEMENT_IFCONFIG),
            ("ifconfig", device) if device.ends_with("Br1") => {
                self.bridge_calls += 1;
                if self.bridge_calls <= self.bridge_misses {
                    ok(BRIDGE_IFCONFIG_DOWN)
                } else {
                    ok(BRIDGE_IFCONFIG)
                }
            }
            ("sudo", "iptables") if args.iter().any(|a| a == "-C") => {
                if self.nat_present {
                    ok("")
                } else {
                    failed
                }
            }
            ("sudo", "iptables") => {
                self.nat_present = true;
                ok("")
            }
            ("pkill", _) => failed,
            _ => ok(""),
        }
    }
}

fn execution(command: &str, stderr: &str) -> ProvisionError {
    ProvisionError::Execution {
        command: command.to_string(),
        status: 1,
        stderr: stderr.to_string(),
    }
}

#[derive(Clone, Default)]
pub struct FakeLab {
    state: Arc<Mutex<LabState>>,
}

impl FakeLab {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut LabState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }
}

#[async_trait]
impl SessionTransport for FakeLab {
    async fn open(
        &self,
        endpoint: &Endpoint,
        _credentials: &Credentials,
        mode: SessionMode,
    ) -> Result<Box<dyn Session>> {
        self.with(|s| s.opened += 1);
        Ok(Box::new(FakeSession {
            lab: self.state.clone(),
            endpoint: endpoint.clone(),
            key: endpoint.to_string(),
            mode,
            pending: String::new(),
            closed: false,
        }))
    }
}

#[async_trait]
impl ProcessRunner for FakeLab {
    async fn output(&self, program: &str, args: &[String]) -> Result<ProcessOutput> {
        Ok(self.with(|s| s.process(program, args)))
    }

    async fn run_detached(&self, program: &str, args: &[String]) -> Result<()> {
        self.with(|s| s.detached.push(display_command(program, args)));
        self.run(program, args).await.map(|_| ())
    }
}

pub struct FakeSession {
    lab: Arc<Mutex<LabState>>,
    endpoint: Endpoint,
    key: String,
    mode: SessionMode,
    pending: String,
    closed: bool,
}

impl FakeSession {
    fn lab(&self) -> std::sync::MutexGuard<'_, LabState> {
        self.lab.lock().unwrap()
    }
}

#[async_trait]
impl Session for FakeSession {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn mode(&self) -> SessionMode {
        self.mode
    }

    async fn exec(&mut self, command: &str) -> Result<String> {
        let key = self.key.clone();
        self.lab().exec(&key, command)
    }

    async fn send(&mut self, text: &str) -> Result<()> {
        if self.mode != SessionMode::Interactive {
            return Err(ProvisionError::Session("no shell on this session".to_string()));
        }
        let key = self.key.clone();
        let reply = {
            let mut lab = self.lab();
            lab.sent.push((key, text.to_string()));
            lab.reply(text)
        };
        self.pending.push_str(&reply);
        Ok(())
    }

    async fn recv(&mut self, max_bytes: usize, _idle: Duration) -> Result<String> {
        let take = max_bytes.min(self.pending.len());
        Ok(self.pending.drain(..take).collect())
    }

    async fn stat(&mut self, path: &str) -> Result<Option<FileKind>> {
        let lab = self.lab();
        if lab.fail_stat.as_deref() == Some(path) {
            return Err(ProvisionError::Transfer(format!("stat {}: permission denied", path)));
        }
        Ok(lab.file(&self.key, path))
    }

    async fn put_file(&mut self, _local: &Path, remote: &str) -> Result<()> {
        let key = self.key.clone();
        let mut lab = self.lab();
        lab.uploads.push((key.clone(), remote.to_string()));
        lab.files.insert((key, remote.to_string()), FileKind::Regular);
        Ok(())
    }

    async fn get_file(&mut self, _remote: &str, local: &Path) -> Result<()> {
        std::fs::write(local, format!("{}\n", GUEST_KEY))?;
        Ok(())
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.lab().closed += 1;
        }
    }
}

pub fn temp_path(dir: &tempfile::TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}
