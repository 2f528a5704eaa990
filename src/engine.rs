//! The global engine switch and the per transport byte counters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::transport::TransportKind;

/// Whether rules are evaluated at all.
///
/// While disabled, inbound data is still logged and counted.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineState {
    enabled: bool,
}

impl EngineState {
    /// An engine in the given state.
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Check if rules are evaluated.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Set the state.
    /// Returns `true` if this went from enabled to disabled,
    /// in which case pending responses must be dropped.
    pub fn set(&mut self, enabled: bool) -> bool {
        let stopped = self.enabled && !enabled;

        if self.enabled != enabled {
            info!(enabled, "Engine switched");
        }
        self.enabled = enabled;

        stopped
    }
}

/// Bytes moved over one transport since the last reset.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Counter {
    /// Bytes put on wire.
    pub tx: u64,

    /// Bytes received.
    pub rx: u64,
}

/// A [`Counter`] per transport.
#[derive(Debug, Default, Clone)]
pub struct Counters(BTreeMap<TransportKind, Counter>);

impl Counters {
    /// Count bytes received.
    pub fn add_rx(&mut self, transport: TransportKind, bytes: usize) {
        self.0.entry(transport).or_default().rx += bytes as u64;
    }

    /// Count bytes sent.
    pub fn add_tx(&mut self, transport: TransportKind, bytes: usize) {
        self.0.entry(transport).or_default().tx += bytes as u64;
    }

    /// The counts of a transport.
    pub fn get(&self, transport: TransportKind) -> Counter {
        self.0.get(&transport).copied().unwrap_or_default()
    }

    /// Zero the counts of a transport.
    pub fn reset(&mut self, transport: TransportKind) {
        self.0.remove(&transport);
    }
}
