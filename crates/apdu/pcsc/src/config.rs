//! Configuration options for the PC/SC backend

use cardio_core::{Disposition, Protocols, ShareMode, TerminalsConfig, TransmitConfig};
use pcsc::Scope;

/// Configuration options for [`PcscTerminalFactory`](crate::PcscTerminalFactory)
#[derive(Debug, Clone)]
pub struct PcscConfig {
    /// Scope of the resource manager context
    pub scope: Scope,

    /// Reader tracking and transmission settings
    pub terminals: TerminalsConfig,
}

impl Default for PcscConfig {
    fn default() -> Self {
        Self {
            scope: Scope::System,
            terminals: TerminalsConfig::default(),
        }
    }
}

impl PcscConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the context scope
    pub const fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Set whether the plug-and-play pseudo reader is watched
    pub fn with_use_pnp(mut self, use_pnp: bool) -> Self {
        self.terminals.use_pnp = use_pnp;
        self
    }

    /// Set the transmission settings for connected cards
    pub fn with_transmit(mut self, transmit: TransmitConfig) -> Self {
        self.terminals.transmit = transmit;
        self
    }

    /// Set the reader tracking settings
    pub fn with_terminals(mut self, terminals: TerminalsConfig) -> Self {
        self.terminals = terminals;
        self
    }
}

pub(crate) const fn share_mode(mode: ShareMode) -> pcsc::ShareMode {
    match mode {
        ShareMode::Exclusive => pcsc::ShareMode::Exclusive,
        ShareMode::Shared => pcsc::ShareMode::Shared,
        ShareMode::Direct => pcsc::ShareMode::Direct,
    }
}

pub(crate) fn protocols(protocols: Protocols) -> pcsc::Protocols {
    let mut out = pcsc::Protocols::empty();
    if protocols.contains(Protocols::T0) {
        out |= pcsc::Protocols::T0;
    }
    if protocols.contains(Protocols::T1) {
        out |= pcsc::Protocols::T1;
    }
    out
}

pub(crate) const fn disposition(disposition: Disposition) -> pcsc::Disposition {
    match disposition {
        Disposition::LeaveCard => pcsc::Disposition::LeaveCard,
        Disposition::ResetCard => pcsc::Disposition::ResetCard,
        Disposition::UnpowerCard => pcsc::Disposition::UnpowerCard,
        Disposition::EjectCard => pcsc::Disposition::EjectCard,
    }
}
