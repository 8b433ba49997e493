//! Line oriented transports connecting a node to the radio.
//!
//! A transport moves single lines of printable text. Outbound lines are queued on a [`Transport`]
//! handle and processed one at a time by a driver task, which reports back once the line was
//! handed to the radio. Received lines are pushed on the inbound channel of the [`Link`].

use core::fmt;
use std::io;

use tokio::sync::{mpsc, oneshot};

pub mod at;
pub mod memory;

/// Amount of lines which can be queued in either direction before senders have to wait.
const LINE_QUEUE_SIZE: usize = 128;

/// An outbound line together with the channel to report the result on.
pub(crate) struct OutboundLine {
    pub line: String,
    pub done: oneshot::Sender<Result<(), TransportError>>,
}

/// Handle used to send lines on a transport.
#[derive(Clone)]
pub struct Transport {
    outbound: mpsc::Sender<OutboundLine>,
}

impl Transport {
    /// Create a new `Transport` handle, and the queue a driver reads outbound lines from.
    pub(crate) fn new() -> (Self, mpsc::Receiver<OutboundLine>) {
        let (outbound, outbound_rx) = mpsc::channel(LINE_QUEUE_SIZE);
        (Self { outbound }, outbound_rx)
    }

    /// Send a single line. This returns once the driver has transmitted the line, or failed to do
    /// so.
    pub async fn send(&self, line: String) -> Result<(), TransportError> {
        let (done, result) = oneshot::channel();
        self.outbound
            .send(OutboundLine { line, done })
            .await
            .map_err(|_| TransportError::Closed)?;
        result.await.map_err(|_| TransportError::Closed)?
    }

    /// Returns true if the driver of this transport has exited.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// Both directions of a transport.
pub struct Link {
    /// Handle to send lines.
    pub transport: Transport,
    /// Lines received from the radio.
    pub inbound: mpsc::Receiver<String>,
}

impl Link {
    /// Create a `Link` and the driver side of both queues.
    pub(crate) fn new() -> (Self, mpsc::Receiver<OutboundLine>, mpsc::Sender<String>) {
        let (transport, outbound_rx) = Transport::new();
        let (inbound_tx, inbound) = mpsc::channel(LINE_QUEUE_SIZE);
        (
            Self {
                transport,
                inbound,
            },
            outbound_rx,
            inbound_tx,
        )
    }
}

/// Failure to transmit a line.
#[derive(Debug)]
pub enum TransportError {
    /// The transport driver is gone.
    Closed,
    /// The radio did not answer a command with the expected response in time.
    NoResponse { expected: &'static str },
    /// The radio answered a command with an error.
    Rejected(String),
    /// Reading from or writing to the underlying device failed.
    Io(io::Error),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Closed => f.write_str("transport is closed"),
            TransportError::NoResponse { expected } => {
                write!(f, "radio did not respond with {expected} in time")
            }
            TransportError::Rejected(response) => write!(f, "radio rejected command: {response}"),
            TransportError::Io(e) => write!(f, "radio I/O error: {e}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(value: io::Error) -> Self {
        TransportError::Io(value)
    }
}
