//! Reaching the host and the guest: endpoint discovery, key installs, the
//! instance wait and the local forward.
use crate::bootstrap::context::WorkflowContext;
use crate::bootstrap::workflow::ProvisioningWorkflow;
use crate::error::{ProvisionError, Result};
use crate::facts::parse_ipv4;
use crate::poller::poll_until_ready;
use crate::process::args;
use crate::transport::{self, Credentials, Endpoint, SessionMode};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Loopback address the guest forward listens on.
pub const FORWARD_HOST: &str = "127.0.0.1";

impl ProvisioningWorkflow {
    /// Stage 1: resolve the host address and derive both endpoints.
    pub(crate) async fn resolve_endpoint(&self, ctx: &mut WorkflowContext) -> Result<()> {
        let resolver = self.config.paths.host_address_resolver.display().to_string();
        let stdout = self
            .processes
            .run(&resolver, &args([ctx.inputs.host_console_port.to_string()]))
            .await?;

        let host_ip = parse_ipv4(stdout.trim())
            .map_err(|e| ProvisionError::malformed("host-address", e))?;
        tracing::info!("[ProvisioningWorkflow] Host address is {}", host_ip);

        if let Some(known_hosts) = &self.config.paths.reset_known_hosts {
            reset_known_hosts(known_hosts).await?;
        }

        ctx.host = Some(Endpoint::new(host_ip.to_string(), self.config.host.port));
        ctx.guest = Some(Endpoint::new(FORWARD_HOST, ctx.inputs.forward_port));
        Ok(())
    }

    /// Stage 2.
    pub(crate) async fn establish_host_trust(&self, ctx: &mut WorkflowContext) -> Result<()> {
        self.install_public_key(ctx.host()?, &self.host_credentials())
            .await
    }

    /// Stage 3: wait for the instance to show up in the hypervisor listing.
    pub(crate) async fn wait_instance_up(&self, ctx: &mut WorkflowContext) -> Result<()> {
        let network = &self.config.network;
        let listing = network.instance_list_command.as_str();
        let instance = network.instance_name.as_str();
        let view: &WorkflowContext = ctx;
        let this = self;

        poll_until_ready(
            &format!("instance {}", instance),
            &self.retry_policy(),
            move || async move {
                let output = this.host_exec(view, listing).await?;
                Ok::<_, ProvisionError>(output.split_whitespace().any(|name| name == instance))
            },
        )
        .await?;

        let settle = Duration::from_secs(self.config.polling.instance_settle_secs);
        tracing::info!(
            "[ProvisioningWorkflow] Instance {} is up, settling for {}s",
            instance,
            settle.as_secs()
        );
        self.settle(settle).await;
        Ok(())
    }

    /// Stage 4: console setup, then a fresh local forward to the guest.
    pub(crate) async fn configure_console_access(&self, ctx: &mut WorkflowContext) -> Result<()> {
        let setup = self.config.paths.console_setup.display().to_string();
        self.processes
            .run(&setup, &args([ctx.inputs.router_console_port.to_string()]))
            .await?;

        let port = ctx.inputs.forward_port;
        let stale = self
            .processes
            .output("pkill", &args(["-f".to_string(), stale_forward_pattern(port)]))
            .await?;
        if stale.success() {
            tracing::info!("[ProvisioningWorkflow] Killed stale forward on port {}", port);
        }

        let host = ctx.host()?;
        let guest = &self.config.guest;
        self.processes
            .run_detached(
                "ssh",
                &args([
                    "-f".to_string(),
                    "-N".to_string(),
                    "-L".to_string(),
                    format!("{}:{}:{}", port, guest.internal_address, guest.internal_port),
                    "-o".to_string(),
                    "StrictHostKeyChecking=accept-new".to_string(),
                    "-o".to_string(),
                    "ExitOnForwardFailure=yes".to_string(),
                    "-p".to_string(),
                    host.port.to_string(),
                    "-l".to_string(),
                    self.config.host.username.clone(),
                    host.host.clone(),
                ]),
            )
            .await?;
        tracing::info!(
            "[ProvisioningWorkflow] Forwarding {}:{} to {}:{} via {}",
            FORWARD_HOST,
            port,
            guest.internal_address,
            guest.internal_port,
            host
        );
        Ok(())
    }

    /// Stage 5.
    pub(crate) async fn establish_guest_trust(&self, ctx: &mut WorkflowContext) -> Result<()> {
        self.install_public_key(ctx.guest()?, &self.guest_credentials())
            .await
    }

    /// Stage 10: pull the guest's key and authorize it locally.
    pub(crate) async fn exchange_guest_host_keys(&self, ctx: &mut WorkflowContext) -> Result<()> {
        let paths = &self.config.paths;
        self.download(
            ctx.guest()?,
            &self.guest_credentials(),
            &paths.guest_public_key,
            &paths.guest_key_copy,
        )
        .await?;

        let key = tokio::fs::read_to_string(&paths.guest_key_copy).await?;
        if append_key_if_missing(&paths.local_authorized_keys, &key).await? {
            tracing::info!(
                "[ProvisioningWorkflow] Authorized guest key in {:?}",
                paths.local_authorized_keys
            );
        } else {
            tracing::info!("[ProvisioningWorkflow] Guest key already authorized");
        }
        Ok(())
    }

    /// Upload the local public key and append it to the remote
    /// authorized_keys unless an identical line is already there.
    async fn install_public_key(&self, endpoint: &Endpoint, credentials: &Credentials) -> Result<()> {
        let local = self.config.paths.public_key.as_path();
        let staging = self.config.paths.remote_key_staging.as_str();
        let append = guarded_key_append(staging);

        transport::with_session(
            &*self.transport,
            endpoint,
            credentials,
            SessionMode::SingleCommand,
            |mut session| async move {
                let result = async {
                    session.put_file(local, staging).await?;
                    session.exec(&append).await?;
                    Ok::<(), ProvisionError>(())
                }
                .await;
                (session, result)
            },
        )
        .await?;

        tracing::info!("[ProvisioningWorkflow] Public key installed on {}", endpoint);
        Ok(())
    }
}

fn stale_forward_pattern(port: u16) -> String {
    format!("ssh -f -N -L {}:", port)
}

fn guarded_key_append(staging: &str) -> String {
    format!(
        "mkdir -p ~/.ssh && (grep -qxF -f {staging} ~/.ssh/authorized_keys 2>/dev/null || cat {staging} >> ~/.ssh/authorized_keys)",
        staging = staging
    )
}

async fn reset_known_hosts(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            tracing::info!("[ProvisioningWorkflow] Removed {:?}", path);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Append `key` to a local authorized_keys file unless an identical line is
/// present. Returns whether the file changed.
pub async fn append_key_if_missing(path: &Path, key: &str) -> Result<bool> {
    let key = key.trim();
    if key.is_empty() {
        return Err(ProvisionError::malformed("public-key", "empty key file"));
    }

    let existing = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    if existing.lines().any(|line| line.trim() == key) {
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    let mut entry = String::new();
    if !existing.is_empty() && !existing.ends_with('\n') {
        entry.push('\n');
    }
    entry.push_str(key);
    entry.push('\n');
    file.write_all(entry.as_bytes()).await?;
    file.flush().await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_key_is_appended_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ssh").join("authorized_keys");

        assert!(append_key_if_missing(&path, "ssh-rsa AAAA guest\n").await.unwrap());
        assert!(!append_key_if_missing(&path, "ssh-rsa AAAA guest").await.unwrap());

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "ssh-rsa AAAA guest\n");
    }

    #[tokio::test]
    async fn test_append_keeps_existing_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("authorized_keys");
        std::fs::write(&path, "ssh-rsa BBBB other").unwrap();

        assert!(append_key_if_missing(&path, "ssh-rsa AAAA guest").await.unwrap());
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "ssh-rsa BBBB other\nssh-rsa AAAA guest\n");
    }

    #[tokio::test]
    async fn test_empty_key_is_malformed() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = append_key_if_missing(&dir.path().join("k"), "  \n")
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::MalformedOutput { .. }));
    }

    #[tokio::test]
    async fn test_missing_known_hosts_is_fine() {
        let dir = tempfile::TempDir::new().unwrap();
        reset_known_hosts(&dir.path().join("known_hosts")).await.unwrap();
    }

    #[test]
    fn test_key_append_is_guarded() {
        let command = guarded_key_append("/root/base_rsa.pub");
        assert!(command.contains("grep -qxF -f /root/base_rsa.pub ~/.ssh/authorized_keys"));
        assert!(command.contains("|| cat /root/base_rsa.pub >> ~/.ssh/authorized_keys"));
    }

    #[test]
    fn test_stale_forward_pattern_is_port_specific() {
        assert_eq!(stale_forward_pattern(1234), "ssh -f -N -L 1234:");
    }
}
