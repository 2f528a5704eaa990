#![allow(dead_code)]

use std::{collections::BTreeMap, time::Duration};

use color_eyre::Result;
use smart_response::{
    config::Config,
    console::ConsoleHandle,
    log_store::{LogEntry, LogKind},
    rule::{Action, ActionKind, Condition, ConditionKind, Rule},
    transport::{SimulatedTransport, TransportEvent, TransportKind},
};
use tokio::sync::broadcast;

/// A console with every transport attached as a running simulation.
pub struct Bench {
    pub console: ConsoleHandle,
    transports: BTreeMap<TransportKind, SimulatedTransport>,
}

impl Bench {
    pub async fn new(engine_enabled: bool) -> Result<Self> {
        Self::with_config(Config {
            engine_enabled,
            ..Default::default()
        })
        .await
    }

    pub async fn with_config(config: Config) -> Result<Self> {
        let console = ConsoleHandle::new(&config);
        let mut transports = BTreeMap::new();

        for kind in TransportKind::ALL {
            let transport = SimulatedTransport::running(kind);
            console.connect(transport.clone()).await?;
            transports.insert(kind, transport);
        }

        // Start out with a clean log, connecting adds entries.
        console.clear_logs().await?;

        Ok(Self {
            console,
            transports,
        })
    }

    pub fn transport(&self, kind: TransportKind) -> &SimulatedTransport {
        &self.transports[&kind]
    }

    pub fn wire(&self, kind: TransportKind) -> broadcast::Receiver<TransportEvent> {
        self.transport(kind).events()
    }

    pub async fn entries(&self, kind: LogKind) -> Result<Vec<LogEntry>> {
        Ok(self
            .console
            .logs()
            .await?
            .into_iter()
            .filter(|entry| entry.kind == kind)
            .collect())
    }

    pub async fn contents(&self) -> Result<Vec<(LogKind, String)>> {
        Ok(self
            .console
            .logs()
            .await?
            .into_iter()
            .map(|entry| (entry.kind, entry.content))
            .collect())
    }
}

/// Let (paused) time pass.
pub async fn wait_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Drain everything put on wire so far.
pub fn written(rx: &mut broadcast::Receiver<TransportEvent>) -> Vec<Vec<u8>> {
    let mut written = vec![];

    while let Ok(event) = rx.try_recv() {
        if let Some(bytes) = event.as_to_wire() {
            written.push(bytes.clone());
        }
    }

    written
}

/// `0xAA 0x55` answered with an ACK of `0x06 0x00`.
pub fn handshake_rule(delay: u64) -> Rule {
    Rule::new(
        Condition::new(ConditionKind::Contains, "0xAA 0x55").describe("Handshake request"),
        Action::new(ActionKind::SendHex, "0x06 0x00").describe("ACK"),
    )
    .with_id("handshake")
    .with_delay(delay)
}

pub fn log_rule<S: AsRef<str>>(id: &str, kind: ConditionKind, value: S, message: &str) -> Rule {
    Rule::new(
        Condition::new(kind, value),
        Action::new(ActionKind::Log, message).describe(format!("LOG {message:?}")),
    )
    .with_id(id)
}

#[allow(unused_macros)]
macro_rules! assert_no_entries {
    ($bench:expr, $kind:expr) => {
        let entries = $bench.entries($kind).await?;
        assert!(
            entries.is_empty(),
            "Expected no {} entries, got: {entries:#?}",
            $kind
        );
    };
}
