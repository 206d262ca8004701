use std::fmt;

/// Provisioning stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    ResolveEndpoint,
    EstablishHostTrust,
    WaitInstanceUp,
    ConfigureConsoleAccess,
    EstablishGuestTrust,
    ConfigureDataPlane,
    EnsureTapDevice,
    ExtractInterfaceFacts,
    BridgeNetworking,
    ExchangeGuestHostKeys,
    FinalizeHostIdentity,
    BootstrapAgent,
}

impl Stage {
    pub const ALL: [Stage; 12] = [
        Stage::ResolveEndpoint,
        Stage::EstablishHostTrust,
        Stage::WaitInstanceUp,
        Stage::ConfigureConsoleAccess,
        Stage::EstablishGuestTrust,
        Stage::ConfigureDataPlane,
        Stage::EnsureTapDevice,
        Stage::ExtractInterfaceFacts,
        Stage::BridgeNetworking,
        Stage::ExchangeGuestHostKeys,
        Stage::FinalizeHostIdentity,
        Stage::BootstrapAgent,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::ResolveEndpoint => "resolve-endpoint",
            Stage::EstablishHostTrust => "establish-host-trust",
            Stage::WaitInstanceUp => "wait-instance-up",
            Stage::ConfigureConsoleAccess => "configure-console-access",
            Stage::EstablishGuestTrust => "establish-guest-trust",
            Stage::ConfigureDataPlane => "configure-data-plane",
            Stage::EnsureTapDevice => "ensure-tap-device",
            Stage::ExtractInterfaceFacts => "extract-interface-facts",
            Stage::BridgeNetworking => "bridge-networking",
            Stage::ExchangeGuestHostKeys => "exchange-guest-host-keys",
            Stage::FinalizeHostIdentity => "finalize-host-identity",
            Stage::BootstrapAgent => "bootstrap-agent",
        }
    }

    /// 1-based position in the run.
    pub fn ordinal(&self) -> usize {
        Stage::ALL
            .iter()
            .position(|s| s == self)
            .map(|i| i + 1)
            .unwrap_or(0)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} {}", self.ordinal(), Stage::ALL.len(), self.name())
    }
}
