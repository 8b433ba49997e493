//! The network layer: addressing of outbound packets, the local sequence number and filtering of
//! inbound packets.

use core::fmt;
use std::sync::{Arc, Mutex};

use log::{debug, trace, warn};
use tokio::sync::broadcast;

use crate::{
    address::Address,
    packet::{Packet, PacketType},
    sequence_number::SeqNo,
    transport::{Transport, TransportError},
};

/// Amount of events buffered for slow subscribers before they start missing events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Something which happened in the network, delivered to all subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    /// A message for this node arrived.
    MessageReceived {
        /// The last hop the message came from.
        from: Address,
        sequence_number: SeqNo,
        payload: String,
    },
    /// A route was installed or invalidated.
    RouteTableChanged,
    /// A packet for this node, or a broadcast, was accepted.
    PacketReceived { kind: PacketType, source: Address },
    /// An inbound line was discarded.
    PacketDropped { reason: DropReason },
}

/// Why an inbound line was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The line could not be decoded.
    Invalid,
    /// The packet is addressed to another node.
    NotForUs,
}

/// Error returned when a message could not be delivered to its destination.
#[derive(Debug)]
pub enum SendError {
    /// Messages can't be sent to the broadcast address.
    InvalidDestination,
    /// The payload contains a line break or is too long for a single radio frame.
    InvalidPayload,
    /// No route to the destination could be found in time.
    NoRoute,
    /// The first hop did not acknowledge the message.
    AckTimeout,
    /// The transport failed.
    Transport(TransportError),
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::InvalidDestination => f.write_str("can't send a message to broadcast"),
            SendError::InvalidPayload => {
                f.write_str("message contains a line break or does not fit in a radio frame")
            }
            SendError::NoRoute => f.write_str("no route to destination"),
            SendError::AckTimeout => f.write_str("next hop did not acknowledge the message"),
            SendError::Transport(e) => write!(f, "transport failure: {e}"),
        }
    }
}

impl std::error::Error for SendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SendError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for SendError {
    fn from(value: TransportError) -> Self {
        SendError::Transport(value)
    }
}

/// Network layer of a node. Cloning gives a new handle to the same state.
#[derive(Clone)]
pub struct Network {
    address: Address,
    sequence_number: Arc<Mutex<SeqNo>>,
    transport: Transport,
    events: broadcast::Sender<NetworkEvent>,
}

impl Network {
    pub fn new(address: Address, transport: Transport) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            address,
            sequence_number: Arc::new(Mutex::new(SeqNo::new())),
            transport,
            events,
        }
    }

    /// Address of the local node.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Current local sequence number.
    pub fn sequence_number(&self) -> SeqNo {
        *self.sequence_number.lock().unwrap()
    }

    /// Take the current local sequence number for an originated packet, and advance it.
    pub fn next_sequence_number(&self) -> SeqNo {
        let mut seqno = self.sequence_number.lock().unwrap();
        let current = *seqno;
        *seqno += 1;
        current
    }

    /// Encode and transmit `packet`. The source is set to the local node.
    pub async fn send_packet(&self, mut packet: Packet) -> Result<(), TransportError> {
        packet.header_mut().source = self.address;
        trace!(
            "Sending {} to {}",
            packet.packet_type(),
            packet.header().next_hop
        );
        self.transport.send(packet.encode()).await
    }

    /// Decode an inbound line, and check if it is meant for this node.
    pub fn accept(&self, line: &str) -> Option<Packet> {
        let packet = match Packet::decode(line) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Dropping inbound line since it is not a valid packet: {e}");
                self.emit(NetworkEvent::PacketDropped {
                    reason: DropReason::Invalid,
                });
                return None;
            }
        };

        let header = *packet.header();
        if header.next_hop != self.address && !header.next_hop.is_broadcast() {
            debug!(
                "Dropping {} from {} since it is not for us but for {}",
                packet.packet_type(),
                header.source,
                header.next_hop
            );
            self.emit(NetworkEvent::PacketDropped {
                reason: DropReason::NotForUs,
            });
            return None;
        }

        trace!("Accepted {} from {}", packet.packet_type(), header.source);
        self.emit(NetworkEvent::PacketReceived {
            kind: packet.packet_type(),
            source: header.source,
        });

        Some(packet)
    }

    /// Subscribe to [`NetworkEvent`]s. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events.subscribe()
    }

    /// Publish an event to all subscribers.
    pub(crate) fn emit(&self, event: NetworkEvent) {
        // Not having any subscribers is fine.
        let _ = self.events.send(event);
    }
}
