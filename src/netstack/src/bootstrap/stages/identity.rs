//! Local NAT and guest identity: default route, hosts entry, hostname.
use crate::bootstrap::context::{network_of, WorkflowContext};
use crate::bootstrap::workflow::ProvisioningWorkflow;
use crate::error::{ProvisionError, Result};
use crate::process::args;
use crate::remote_fs::RemoteKind;
use std::net::Ipv4Addr;

impl ProvisioningWorkflow {
    /// Stage 11.
    pub(crate) async fn finalize_host_identity(&self, ctx: &mut WorkflowContext) -> Result<()> {
        let network = &self.config.network;
        let identity = &self.config.identity;
        let bridge = ctx.bridge()?;
        let router = ctx.router_address()?;

        self.ensure_masquerade(network_of(router)).await?;
        let management = self.management_address().await?;

        self.ensure_remote(
            ctx.guest()?,
            &self.guest_credentials(),
            &identity.package_dir,
            RemoteKind::Directory,
        )
        .await?;

        match self.guest_exec(ctx, "ip route del default").await {
            Ok(_) => {}
            Err(e) if e.is_execution() => {
                tracing::info!("[ProvisioningWorkflow] No default route to remove");
            }
            Err(e) => return Err(e),
        }
        self.guest_exec(
            ctx,
            &format!(
                "ip route add default via {} dev {}",
                bridge.address, network.guest_device
            ),
        )
        .await?;

        self.guest_exec(ctx, &hosts_entry_command(management, &identity.server_alias))
            .await?;

        let hostname = format!("{}{}", identity.hostname_prefix, ctx.inputs.net_name);
        self.guest_exec(ctx, &format!("hostname {}", hostname))
            .await?;
        self.guest_exec(ctx, &format!("echo '{}' > /etc/hostname", hostname))
            .await?;
        tracing::info!(
            "[ProvisioningWorkflow] Guest is {} with {} at {}",
            hostname,
            identity.server_alias,
            management
        );

        ctx.management_address = Some(management);
        ctx.hostname = Some(hostname);
        Ok(())
    }

    /// Masquerade the router network on the local machine unless the rule
    /// already exists.
    async fn ensure_masquerade(&self, network: Ipv4Addr) -> Result<()> {
        let source = format!("{}/24", network);
        let rule = |action: &str| {
            args([
                "iptables", "-t", "nat", action, "POSTROUTING", "-s", source.as_str(), "-j", "MASQUERADE",
            ])
        };

        let present = self.processes.output("sudo", &rule("-C")).await?;
        if present.success() {
            tracing::info!("[ProvisioningWorkflow] NAT rule for {} already present", source);
            return Ok(());
        }
        self.processes.run("sudo", &rule("-A")).await?;
        tracing::info!("[ProvisioningWorkflow] Added NAT rule for {}", source);
        Ok(())
    }

    /// IPv4 address of the local management interface.
    async fn management_address(&self) -> Result<Ipv4Addr> {
        let interface = self.config.network.management_interface.as_str();
        let output = self.processes.run("ifconfig", &args([interface])).await?;
        self.rules.inet_address.extract(&output)?.ok_or_else(|| {
            ProvisionError::malformed(
                self.rules.inet_address.name(),
                format!("no address reported for {}", interface),
            )
        })
    }
}

fn hosts_entry_command(address: Ipv4Addr, alias: &str) -> String {
    let entry = format!("{} {}", address, alias);
    format!(
        "grep -qxF '{entry}' /etc/hosts || echo '{entry}' >> /etc/hosts",
        entry = entry
    )
}
