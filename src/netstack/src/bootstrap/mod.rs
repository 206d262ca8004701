//! Provisioning workflow: stage order, per-run context, and the stage bodies.
pub mod context;
pub mod maintenance;
pub mod stage;
mod stages;
pub mod tap;
pub mod workflow;

pub use context::{
    network_of, router_address, BridgeFacts, InterfaceFacts, WorkflowContext, WorkflowInputs,
};
pub use maintenance::restart_commands;
pub use stage::Stage;
pub use stages::{append_key_if_missing, FORWARD_HOST};
pub use tap::{TapOutcome, TapState};
pub use workflow::ProvisioningWorkflow;
