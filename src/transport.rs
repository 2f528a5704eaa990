use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{encoding, error::Error};

pub(crate) mod serial;
pub(crate) mod simulated;

pub use serial::SerialTransport;
pub use simulated::{SimulatedTransport, TransportEvent};

/// The transports the console can attach to.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// A tty/COM port.
    Serial,

    /// A classic Bluetooth (SPP) server.
    Classic,

    /// A BLE peripheral.
    Ble,

    /// An HTTP server.
    Http,
}

impl TransportKind {
    /// All transports.
    pub const ALL: [TransportKind; 4] = [
        TransportKind::Serial,
        TransportKind::Classic,
        TransportKind::Ble,
        TransportKind::Http,
    ];
}

impl Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Serial => write!(f, "serial"),
            TransportKind::Classic => write!(f, "classic"),
            TransportKind::Ble => write!(f, "ble"),
            TransportKind::Http => write!(f, "http"),
        }
    }
}

/// One unit of data a transport received.
/// For serial this is one (coalesced) read, for the simulated transports one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Raw bytes.
    Bytes(Vec<u8>),

    /// Text.
    Text(String),
}

impl Inbound {
    /// Borrow as bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Inbound::Bytes(b) => b,
            Inbound::Text(t) => t.as_bytes(),
        }
    }

    /// The number of bytes, used for counting.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Check if there is no data.
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// How the data is written into the log.
    pub fn log_content(&self) -> String {
        match self {
            Inbound::Bytes(b) => encoding::rx_content(b),
            Inbound::Text(t) => t.clone(),
        }
    }
}

impl From<&str> for Inbound {
    fn from(text: &str) -> Self {
        Self::Text(text.into())
    }
}

impl From<Vec<u8>> for Inbound {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

/// Something a user asked to put on a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Send text as is.
    Text(String),

    /// Interpret as hex, falling back to text.
    Hex(String),

    /// Send raw bytes.
    Bytes(Vec<u8>),
}

impl Outbound {
    /// The bytes to put on wire, and how they are shown in the log.
    pub(crate) fn encode(&self) -> (Vec<u8>, String) {
        match self {
            Outbound::Text(text) => (text.as_bytes().to_vec(), text.clone()),
            Outbound::Hex(input) => match encoding::parse_hex_input(input) {
                encoding::HexInput::Bytes(bytes) => {
                    let content = encoding::tx_hex_content(&bytes);
                    (bytes, content)
                }
                encoding::HexInput::Text(bytes) => (bytes, input.clone()),
            },
            Outbound::Bytes(bytes) => (bytes.clone(), encoding::tx_hex_content(bytes)),
        }
    }
}

/// A transport is something which can put bytes on wire,
/// and which feeds what it receives into the console.
///
/// Implementations must not block in [`Transport::send`], they should hand the
/// bytes to their own writer.
pub trait Transport: Send + Sync {
    /// Which transport this is.
    fn kind(&self) -> TransportKind;

    /// Check if sending is currently possible.
    /// For servers this means running, for ports this means open.
    fn is_connected(&self) -> bool;

    /// Hand bytes to the transport for writing.
    fn send(&self, bytes: &[u8]) -> Result<(), Error>;
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn hex_outbound_is_logged_as_hex() {
        let (bytes, content) = Outbound::Hex("AA5".into()).encode();

        assert_eq!(bytes, vec![0x0A, 0xA5]);
        assert_eq!(content, "Hex: 0A A5");
    }

    #[test]
    fn hex_outbound_falls_back_to_text() {
        let (bytes, content) = Outbound::Hex("hello".into()).encode();

        assert_eq!(bytes, b"hello");
        assert_eq!(content, "hello");
    }

    #[test]
    fn inbound_len_counts_bytes() {
        assert_eq!(Inbound::from("héllo").len(), 6);
        assert_eq!(Inbound::from(vec![0xAA, 0x55]).log_content(), "AA 55");
    }
}
