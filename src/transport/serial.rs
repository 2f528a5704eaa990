use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use futures::{channel::mpsc, SinkExt, StreamExt};
use tokio::task::AbortHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tokio_util::codec::{BytesCodec, FramedRead, FramedWrite};
use tracing::{debug, error, info, info_span, trace, Instrument};

use super::{Inbound, Transport, TransportKind};
use crate::{
    config::{FlowControl, Parity, SerialSettings, StopBits},
    console::{ConsoleHandle, Inform},
    error::Error,
};

fn data_bits(bits: u8) -> tokio_serial::DataBits {
    match bits {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        _ => tokio_serial::DataBits::Eight,
    }
}

fn try_create_serial_port(settings: &SerialSettings) -> Result<SerialStream, Error> {
    let parity = match settings.parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Odd => tokio_serial::Parity::Odd,
        Parity::Even => tokio_serial::Parity::Even,
    };

    let stop_bits = match settings.stop_bits {
        StopBits::One => tokio_serial::StopBits::One,
        StopBits::Two => tokio_serial::StopBits::Two,
    };

    let flow_control = match settings.flow_control {
        FlowControl::None => tokio_serial::FlowControl::None,
        FlowControl::Software => tokio_serial::FlowControl::Software,
        FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
    };

    tokio_serial::new(&settings.path, settings.baud)
        .data_bits(data_bits(settings.data_bits))
        .parity(parity)
        .stop_bits(stop_bits)
        .flow_control(flow_control)
        .open_native_async()
        .map_err(|e| {
            Error::TransportIssue(format!(
                "Could not open port at {}, problem: {e:#?}",
                settings.path
            ))
        })
}

/// A serial port attached to the console.
///
/// Reads which arrive closer together than the framing delay are
/// delivered to the console as one inbound unit.
#[derive(Debug)]
pub struct SerialTransport {
    path: String,
    open: Arc<AtomicBool>,
    to_wire: mpsc::UnboundedSender<Vec<u8>>,
    task: AbortHandle,
}

impl SerialTransport {
    /// Open the port and start feeding what it reads into the console.
    ///
    /// The transport is not attached to the console by this,
    /// see [`ConsoleHandle::connect`].
    pub fn open(
        settings: &SerialSettings,
        framing_delay: Duration,
        console: ConsoleHandle,
    ) -> Result<Self, Error> {
        let stream = try_create_serial_port(settings)?;

        info!(path = %settings.path, baud = settings.baud, "Serial port opened");

        let (to_wire, mut should_put_on_wire) = mpsc::unbounded::<Vec<u8>>();
        let open = Arc::new(AtomicBool::new(true));
        let open_task = open.clone();

        let (reader, writer) = tokio::io::split(stream);
        let mut from_wire = FramedRead::new(reader, BytesCodec::new());
        let mut sink = FramedWrite::new(writer, BytesCodec::new());

        let tty_span = info_span!("tty", path = %settings.path);

        let task = tokio::spawn(
            async move {
                let mut unit = BytesMut::new();

                let reason = loop {
                    tokio::select! {
                        read = from_wire.next() => match read {
                            Some(Ok(bytes)) => {
                                trace!("Read {} byte(s) from port", bytes.len());
                                unit.extend_from_slice(&bytes);
                            }
                            Some(Err(e)) => break format!("Read error: {e}"),
                            None => break "Port closed".to_owned(),
                        },
                        Some(message) = should_put_on_wire.next() => {
                            if let Err(e) = sink.send(Bytes::from(message)).await {
                                break format!("Write error: {e}");
                            }
                        },
                        _ = tokio::time::sleep(framing_delay), if !unit.is_empty() => {
                            let inbound = Inbound::Bytes(unit.split().to_vec());

                            if let Err(e) = console.receive(TransportKind::Serial, inbound).await {
                                debug!(%e, "Console did not take inbound data");
                            }
                        }
                    }
                };

                error!(%reason, "Serial port stopped");
                open_task.store(false, Ordering::SeqCst);
                console.inform(Inform::TransportLost {
                    kind: TransportKind::Serial,
                    reason,
                });
            }
            .instrument(tty_span),
        )
        .abort_handle();

        Ok(Self {
            path: settings.path.clone(),
            open,
            to_wire,
            task,
        })
    }

    /// The port's path.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Transport for SerialTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn is_connected(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send(&self, bytes: &[u8]) -> Result<(), Error> {
        if !self.is_connected() {
            return Err(Error::NotConnected(TransportKind::Serial));
        }

        self.to_wire
            .unbounded_send(bytes.to_vec())
            .map_err(|_| Error::TransportIssue(format!("The writer of {} is gone", self.path)))
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        debug!(path = %self.path, "Closing serial port");
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn opening_missing_port_fails() {
        let console = ConsoleHandle::new(&Config::default());

        let result = SerialTransport::open(
            &SerialSettings::new("/dev/this-port-does-not-exist"),
            Duration::from_millis(10),
            console,
        );

        assert!(matches!(result, Err(Error::TransportIssue(_))));
    }
}
