//! Per-run state threaded through the stages.
use super::stage::Stage;
use super::tap::TapOutcome;
use crate::error::{ProvisionError, Result};
use crate::facts::{InterfaceHandle, MacAddress};
use crate::transport::Endpoint;
use std::net::Ipv4Addr;

/// Identifiers supplied by the operator for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowInputs {
    pub host_console_port: u16,
    pub router_console_port: u16,
    pub net_name: String,
    pub forward_port: u16,
}

/// Host-side bridge the router's data-plane interface is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeFacts {
    pub address: Ipv4Addr,
    pub mac: MacAddress,
}

/// Facts scraped from the router console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceFacts {
    pub mac: MacAddress,
    pub handle: InterfaceHandle,
}

#[derive(Debug, Clone)]
pub struct WorkflowContext {
    pub inputs: WorkflowInputs,
    pub host: Option<Endpoint>,
    pub guest: Option<Endpoint>,
    pub bridge: Option<BridgeFacts>,
    pub router_address: Option<Ipv4Addr>,
    pub interface: Option<InterfaceFacts>,
    pub tap: Option<TapOutcome>,
    pub management_address: Option<Ipv4Addr>,
    pub hostname: Option<String>,
    pub completed: Vec<Stage>,
}

impl WorkflowContext {
    pub fn new(inputs: WorkflowInputs) -> Self {
        Self {
            inputs,
            host: None,
            guest: None,
            bridge: None,
            router_address: None,
            interface: None,
            tap: None,
            management_address: None,
            hostname: None,
            completed: Vec::new(),
        }
    }

    pub fn host(&self) -> Result<&Endpoint> {
        self.host.as_ref().ok_or_else(|| missing("host endpoint"))
    }

    pub fn guest(&self) -> Result<&Endpoint> {
        self.guest.as_ref().ok_or_else(|| missing("guest endpoint"))
    }

    pub fn bridge(&self) -> Result<BridgeFacts> {
        self.bridge.ok_or_else(|| missing("bridge address"))
    }

    pub fn router_address(&self) -> Result<Ipv4Addr> {
        self.router_address.ok_or_else(|| missing("router address"))
    }

    pub fn interface(&self) -> Result<InterfaceFacts> {
        self.interface.ok_or_else(|| missing("interface facts"))
    }
}

fn missing(what: &str) -> ProvisionError {
    ProvisionError::Config(format!("{} not available; an earlier stage did not run", what))
}

/// Router data-plane address: the bridge address with `offset` added to the
/// last octet.
pub fn router_address(bridge: Ipv4Addr, offset: u8) -> Result<Ipv4Addr> {
    let [a, b, c, d] = bridge.octets();
    let last = d.checked_add(offset).ok_or_else(|| {
        ProvisionError::Config(format!(
            "router address offset {} overflows bridge address {}",
            offset, bridge
        ))
    })?;
    Ok(Ipv4Addr::new(a, b, c, last))
}

/// The /24 network an address belongs to.
pub fn network_of(address: Ipv4Addr) -> Ipv4Addr {
    let [a, b, c, _] = address.octets();
    Ipv4Addr::new(a, b, c, 0)
}
