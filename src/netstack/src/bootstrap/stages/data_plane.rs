//! Router data-plane addressing and the interface facts scraped from its CLI.
use crate::bootstrap::context::{router_address, BridgeFacts, InterfaceFacts, WorkflowContext};
use crate::bootstrap::workflow::ProvisioningWorkflow;
use crate::error::{ProvisionError, Result};
use crate::poller::poll_until;
use crate::process::args;
use std::net::Ipv4Addr;

impl ProvisioningWorkflow {
    /// Stage 6: derive the router address from the local bridge and push the
    /// interface address and default route through the router console.
    pub(crate) async fn configure_data_plane(&self, ctx: &mut WorkflowContext) -> Result<()> {
        let network = &self.config.network;
        let bridge = self.read_bridge(&ctx.inputs.net_name).await?;
        let router = router_address(bridge.address, network.router_address_offset)?;
        tracing::info!(
            "[ProvisioningWorkflow] Bridge {} ({}), router address {}",
            bridge.address,
            bridge.mac,
            router
        );

        let guest = ctx.guest()?;
        self.router_console(guest, &interface_address_batch(network, router))
            .await?;
        self.router_console(guest, &default_route_batch(network, bridge.address))
            .await?;

        ctx.bridge = Some(bridge);
        ctx.router_address = Some(router);
        Ok(())
    }

    /// Stage 8: poll the router console for the interface MAC and handle.
    pub(crate) async fn extract_interface_facts(&self, ctx: &mut WorkflowContext) -> Result<()> {
        if let Some(facts) = ctx.interface {
            tracing::info!(
                "[ProvisioningWorkflow] Interface facts already known (mac {}, ifh {})",
                facts.mac,
                facts.handle
            );
            return Ok(());
        }

        let interface = self.config.network.router_interface.as_str();
        let guest = ctx.guest()?;
        let policy = self.retry_policy();
        let this = self;

        let show_interface = [format!("sh interfaces {}", interface)];
        let show_interface = &show_interface;
        let mac = poll_until("interface MAC", &policy, move || async move {
            let transcript = this.router_console(guest, show_interface).await?;
            this.rules.interface_mac.extract(&transcript)
        })
        .await?;

        let show_database = [format!("sh im database interface {}", interface)];
        let show_database = &show_database;
        let handle = poll_until("interface handle", &policy, move || async move {
            let transcript = this.router_console(guest, show_database).await?;
            this.rules.interface_handle.extract(&transcript)
        })
        .await?;

        tracing::info!(
            "[ProvisioningWorkflow] {} has mac {} and ifh {}",
            interface,
            mac,
            handle
        );
        ctx.interface = Some(InterfaceFacts { mac, handle });
        Ok(())
    }

    /// Poll local `ifconfig <net><suffix>` until it reports both an address
    /// and a hardware address.
    async fn read_bridge(&self, net_name: &str) -> Result<BridgeFacts> {
        let device = format!("{}{}", net_name, self.config.network.bridge_suffix);
        let device = device.as_str();
        let this = self;

        poll_until(&format!("bridge {}", device), &self.retry_policy(), move || async move {
            let output = this.processes.run("ifconfig", &args([device])).await?;
            let address = this.rules.inet_address.extract(&output)?;
            let mac = this.rules.hardware_address.extract(&output)?;
            Ok::<_, ProvisionError>(address.zip(mac).map(|(address, mac)| BridgeFacts { address, mac }))
        })
        .await
    }
}

fn interface_address_batch(network: &crate::config::NetworkConfig, router: Ipv4Addr) -> Vec<String> {
    vec![
        "conf t".to_string(),
        format!("int {}", network.router_interface),
        format!("ip addr {} {}", router, network.router_netmask),
        "no shut".to_string(),
        "commit".to_string(),
    ]
}

fn default_route_batch(network: &crate::config::NetworkConfig, bridge: Ipv4Addr) -> Vec<String> {
    vec![
        "conf t".to_string(),
        format!(
            "router static address-family ipv4 unicast 0.0.0.0/0 {} {}",
            network.router_interface, bridge
        ),
        "commit".to_string(),
    ]
}
