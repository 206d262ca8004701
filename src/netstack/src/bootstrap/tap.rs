//! Tap device setup inside the guest.
//!
//! The block runs as one unit: any step failing moves to `Reset`, which clears
//! the device directory so the next attempt starts from nothing.
use super::context::WorkflowContext;
use super::workflow::ProvisioningWorkflow;
use crate::error::{ProvisionError, Result};
use crate::remote_fs::{EnsureOutcome, RemoteKind};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapState {
    LoadModule,
    EnsureDeviceNodes,
    RestartNetworkProcess,
    BringUp,
    Reset,
    Done,
}

impl TapState {
    /// Next state after the current step succeeded.
    pub fn on_success(self) -> Self {
        match self {
            TapState::LoadModule => TapState::EnsureDeviceNodes,
            TapState::EnsureDeviceNodes => TapState::RestartNetworkProcess,
            TapState::RestartNetworkProcess => TapState::BringUp,
            TapState::BringUp => TapState::Done,
            TapState::Reset => TapState::LoadModule,
            TapState::Done => TapState::Done,
        }
    }

    pub fn on_failure(self) -> Self {
        match self {
            TapState::Done => TapState::Done,
            _ => TapState::Reset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapOutcome {
    /// The probe found the interface; no setup was attempted.
    pub already_present: bool,
    pub attempts: u32,
    pub transitions: Vec<TapState>,
}

/// Failures worth another pass through the block.
fn is_retryable(error: &ProvisionError) -> bool {
    matches!(
        error,
        ProvisionError::Execution { .. }
            | ProvisionError::Connect(_)
            | ProvisionError::Session(_)
            | ProvisionError::Transfer(_)
    )
}

impl ProvisioningWorkflow {
    pub(crate) async fn ensure_tap_device(&self, ctx: &mut WorkflowContext) -> Result<TapOutcome> {
        let tap = &self.config.tap;

        match self.guest_exec(ctx, &format!("ifconfig {}", tap.interface)).await {
            Ok(_) => {
                tracing::info!(
                    "[TapDevice] {} already present, skipping setup",
                    tap.interface
                );
                return Ok(TapOutcome {
                    already_present: true,
                    attempts: 0,
                    transitions: Vec::new(),
                });
            }
            Err(e) if e.is_execution() => {
                tracing::info!("[TapDevice] {} absent, creating it", tap.interface);
            }
            Err(e) => return Err(e),
        }

        let mut attempts: u32 = 0;
        let mut transitions = Vec::new();
        let mut state = TapState::LoadModule;

        loop {
            if self.cancel_token().is_cancelled() {
                return Err(ProvisionError::Cancelled("tap device".to_string()));
            }
            if state == TapState::LoadModule {
                attempts += 1;
            }
            transitions.push(state);

            if state == TapState::Done {
                tracing::info!(
                    "[TapDevice] {} up after {} attempt(s)",
                    tap.interface,
                    attempts
                );
                return Ok(TapOutcome {
                    already_present: false,
                    attempts,
                    transitions,
                });
            }

            match self.tap_step(state, ctx).await {
                Ok(()) => state = state.on_success(),
                Err(e) if is_retryable(&e) => {
                    tracing::warn!("[TapDevice] Step {:?} failed: {}", state, e);
                    if self
                        .config
                        .polling
                        .tap_max_attempts
                        .is_some_and(|max| attempts >= max)
                    {
                        return Err(ProvisionError::PollTimeout {
                            what: "tap device".to_string(),
                            attempts,
                        });
                    }
                    state = state.on_failure();
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn tap_step(&self, state: TapState, ctx: &WorkflowContext) -> Result<()> {
        let tap = &self.config.tap;
        let step_settle = self.config.polling.step_settle();

        match state {
            TapState::LoadModule => {
                self.host_exec(ctx, &format!("modprobe {}", tap.kernel_module))
                    .await?;
                self.settle(step_settle).await;
                self.host_exec(
                    ctx,
                    &format!("echo {} > /proc/sys/kernel/printk", tap.printk_levels),
                )
                .await?;
                self.settle(step_settle).await;
            }
            TapState::EnsureDeviceNodes => {
                let guest = ctx.guest()?;
                let credentials = self.guest_credentials();
                let dir = self
                    .ensure_remote(guest, &credentials, &tap.device_dir, RemoteKind::Directory)
                    .await?;
                if dir == EnsureOutcome::Created {
                    self.settle(step_settle).await;
                }
                let node = self
                    .ensure_remote(
                        guest,
                        &credentials,
                        &tap.device_node,
                        RemoteKind::CharDevice {
                            major: tap.device_major,
                            minor: tap.device_minor,
                        },
                    )
                    .await?;
                if node == EnsureOutcome::Created {
                    self.settle(step_settle).await;
                }
            }
            TapState::RestartNetworkProcess => {
                let command = format!("proc restart {}", tap.network_process);
                self.router_console(ctx.guest()?, &[command]).await?;
                self.settle(Duration::from_millis(tap.restart_settle_ms))
                    .await;
            }
            TapState::BringUp => {
                self.guest_exec(ctx, &format!("ifconfig {} up", tap.interface))
                    .await?;
                self.settle(step_settle).await;
            }
            TapState::Reset => {
                let removed = self
                    .remove_remote(ctx.guest()?, &self.guest_credentials(), &tap.device_dir)
                    .await;
                tracing::info!(
                    "[TapDevice] Reset {} (removed: {})",
                    tap.device_dir,
                    removed
                );
                self.settle(step_settle).await;
            }
            TapState::Done => {}
        }
        Ok(())
    }
}
