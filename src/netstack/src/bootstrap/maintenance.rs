//! Operations against an already provisioned instance.
use super::stages::FORWARD_HOST;
use super::workflow::ProvisioningWorkflow;
use crate::error::Result;
use crate::transport::Endpoint;

/// Router console commands that bounce one process and show its state.
pub fn restart_commands(process: &str) -> Vec<String> {
    vec![
        format!("process shutdown {}", process),
        String::new(),
        format!("process start {}", process),
        format!("show proc | i {}", process),
    ]
}

impl ProvisioningWorkflow {
    /// Restart `process` on the router through the guest forward on
    /// `forward_port`. Returns the console transcript.
    pub async fn restart_process(&self, forward_port: u16, process: &str) -> Result<String> {
        let guest = Endpoint::new(FORWARD_HOST, forward_port);
        tracing::info!(
            "[ProvisioningWorkflow] Restarting {} via {}",
            process,
            guest
        );
        self.router_console(&guest, &restart_commands(process)).await
    }
}
