//! Bridging the guest device onto the host network.
use crate::bootstrap::context::{InterfaceFacts, WorkflowContext};
use crate::bootstrap::workflow::ProvisioningWorkflow;
use crate::config::BridgeConfig;
use crate::error::Result;
use std::path::Path;
use std::time::Duration;

impl ProvisioningWorkflow {
    /// Stage 9.
    pub(crate) async fn bridge_networking(&self, ctx: &mut WorkflowContext) -> Result<()> {
        let bridge_cfg = &self.config.bridge;
        let device = self.config.network.guest_device.as_str();
        let interface = ctx.interface()?;
        let bridge = ctx.bridge()?;
        let router = ctx.router_address()?;
        let host = ctx.host()?;
        let guest = ctx.guest()?;

        self.settle(Duration::from_secs(bridge_cfg.settle_secs)).await;

        self.upload(
            host,
            &self.host_credentials(),
            &[(
                bridge_cfg.helper_binary.as_path(),
                bridge_cfg.helper_remote_path.as_str(),
            )],
        )
        .await?;
        self.host_exec(ctx, &format!("chmod 755 {}", bridge_cfg.helper_remote_path))
            .await?;

        self.upload(
            guest,
            &self.guest_credentials(),
            &[(
                bridge_cfg.startup_script.as_path(),
                bridge_cfg.startup_remote_path.as_str(),
            )],
        )
        .await?;
        self.guest_exec(ctx, &format!("chmod 777 {}", bridge_cfg.startup_remote_path))
            .await?;

        let transcript = self
            .host_shell(ctx, &helper_batch(bridge_cfg, device, interface))
            .await?;
        tracing::debug!("[ProvisioningWorkflow] Pseudo-device transcript:\n{}", transcript);

        self.guest_exec(ctx, &format!("ifconfig {} {} up", device, router))
            .await?;
        self.host_exec(ctx, &format!("modprobe {}", bridge_cfg.kernel_module))
            .await?;
        self.guest_shell(ctx, &[bridge_cfg.startup_remote_path.as_str()])
            .await?;
        self.guest_exec(ctx, &format!("/sbin/arp -s {} {}", bridge.address, bridge.mac))
            .await?;

        tracing::info!(
            "[ProvisioningWorkflow] {} bridged with router address {}",
            device,
            router
        );
        Ok(())
    }
}

/// Host shell batch creating the pseudo network device from the interface facts.
fn helper_batch(bridge: &BridgeConfig, device: &str, interface: InterfaceFacts) -> Vec<String> {
    let helper_name = Path::new(&bridge.helper_remote_path)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| bridge.helper_remote_path.clone());
    vec![
        format!(
            "{} -a {} -m {} -i {}",
            bridge.helper_remote_path, device, interface.mac, interface.handle
        ),
        "\r\r".to_string(),
        format!("ps -ef | grep {}", helper_name),
    ]
}
