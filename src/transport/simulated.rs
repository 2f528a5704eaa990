//! A simulated transport, standing in for the Bluetooth and HTTP servers
//! (and for the serial port in tests).

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::broadcast;
use tracing::{info, trace};

use super::{Transport, TransportKind};
use crate::error::Error;

/// What happened on a simulated transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The transport was asked to put the given bytes on wire.
    ToWire(Vec<u8>),

    /// The transport started running.
    Started,

    /// The transport stopped running.
    Stopped,
}

impl TransportEvent {
    /// Unwrap the event as something that was sent to wire, else panic.
    pub fn into_to_wire(self) -> Vec<u8> {
        if let Self::ToWire(v) = self {
            v
        } else {
            panic!("Was not `ToWire`: {self:?}")
        }
    }

    /// Attempt to borrow the event as something that was sent to wire.
    pub fn as_to_wire(&self) -> Option<&Vec<u8>> {
        if let Self::ToWire(v) = self {
            Some(v)
        } else {
            None
        }
    }
}

/// A transport which only pretends to put things on wire.
///
/// Clones share state, so a clone can be given to the console while
/// another is kept around to start/stop it and observe writes.
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    kind: TransportKind,
    running: Arc<AtomicBool>,
    events: broadcast::Sender<TransportEvent>,
}

impl SimulatedTransport {
    /// A new, stopped, simulated transport.
    pub fn new(kind: TransportKind) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            kind,
            running: Arc::new(AtomicBool::new(false)),
            events,
        }
    }

    /// A new simulated transport which is already running.
    pub fn running(kind: TransportKind) -> Self {
        let transport = Self::new(kind);
        transport.start();
        transport
    }

    /// Start accepting writes.
    pub fn start(&self) {
        info!(kind = %self.kind, "Simulated transport started");
        self.running.store(true, Ordering::SeqCst);
        let _ = self.events.send(TransportEvent::Started);
    }

    /// Stop accepting writes.
    pub fn stop(&self) {
        info!(kind = %self.kind, "Simulated transport stopped");
        self.running.store(false, Ordering::SeqCst);
        let _ = self.events.send(TransportEvent::Stopped);
    }

    /// Observe what happens on this transport from now on.
    pub fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

impl Transport for SimulatedTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn is_connected(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn send(&self, bytes: &[u8]) -> Result<(), Error> {
        if !self.is_connected() {
            return Err(Error::NotConnected(self.kind));
        }

        match self.events.send(TransportEvent::ToWire(bytes.to_vec())) {
            Ok(listeners) => trace!("Broadcasted ToWire message to {listeners} listener(s)"),
            Err(_) => trace!("Nobody is observing {}", self.kind),
        }

        Ok(())
    }
}
