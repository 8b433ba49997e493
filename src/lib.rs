//! Multihop routing for LoRa radio modules.
//!
//! Nodes form an ad hoc network over a shared radio channel. Routes are discovered on demand with
//! route requests and replies, and every hop is acknowledged. The [`Node`] ties the layers
//! together: it owns the [`Network`](network::Network) layer and the [`Router`](router::Router),
//! and processes lines received from a [`Link`].

use log::info;
use tokio::sync::broadcast;

use crate::{
    address::Address,
    config::NodeConfig,
    network::{NetworkEvent, SendError},
    packet::{Header, Message, Packet},
    reverse_table::ReverseRouteEntry,
    router::Router,
    routing_table::RouteEntry,
    sequence_number::SeqNo,
    task::AbortHandle,
    transport::Link,
};

pub mod address;
mod bits;
pub mod config;
pub mod network;
pub mod packet;
mod pending_ack;
pub mod reverse_table;
pub mod router;
pub mod routing_table;
pub mod sequence_number;
pub mod simulation;
pub mod task;
pub mod transport;

/// A node in the mesh network.
pub struct Node {
    router: Router,
    max_payload_length: usize,
    _receiver: AbortHandle,
}

impl Node {
    /// Create a new `Node` using `link` to reach the radio. Inbound lines are processed in a
    /// background task, which stops when the `Node` is dropped.
    pub fn new(config: &NodeConfig, link: Link) -> Self {
        let network = network::Network::new(config.address, link.transport);
        let router = Router::new(network, config.routing);
        let receiver = tokio::spawn(router.clone().receive_packets(link.inbound));

        info!("Node {} started", config.address);

        Self {
            router,
            max_payload_length: config.radio.max_payload_length(),
            _receiver: receiver.abort_handle().into(),
        }
    }

    /// Address of this node.
    pub fn address(&self) -> Address {
        self.router.network().address()
    }

    /// Current local sequence number.
    pub fn sequence_number(&self) -> SeqNo {
        self.router.network().sequence_number()
    }

    /// Send `text` to `destination`, discovering a route first if needed. This succeeds once the
    /// first hop acknowledged the message; delivery beyond that is not confirmed.
    pub async fn send_message(&self, text: &str, destination: Address) -> Result<(), SendError> {
        if destination.is_broadcast() {
            return Err(SendError::InvalidDestination);
        }
        if text.contains(['\r', '\n']) || text.len() > self.max_payload_length {
            return Err(SendError::InvalidPayload);
        }

        let network = self.router.network();
        if destination == network.address() {
            network.emit(NetworkEvent::MessageReceived {
                from: destination,
                sequence_number: network.sequence_number(),
                payload: text.to_string(),
            });
            return Ok(());
        }

        let route = self
            .router
            .get_route_for(destination)
            .await
            .ok_or(SendError::NoRoute)?;

        let msg = Message {
            header: Header::new(route.next_hop(), network.address()),
            destination,
            hop_count: 0,
            sequence_number: network.next_sequence_number(),
            payload: text.to_string(),
        };

        self.router.send_along(&route, msg, None).await
    }

    /// Find a route to `destination`, see [`Router::get_route_for`].
    pub async fn get_route_for(&self, destination: Address) -> Option<RouteEntry> {
        self.router.get_route_for(destination).await
    }

    /// Process `packet` as if it was received from the radio.
    pub async fn inject(&self, packet: Packet) {
        self.router.handle_packet(packet).await
    }

    /// Subscribe to [`NetworkEvent`]s of this node.
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.router.network().subscribe()
    }

    /// All entries of the routing table, including invalidated ones.
    pub fn routes(&self) -> Vec<RouteEntry> {
        self.router.routes()
    }

    /// All entries of the reverse routing table.
    pub fn reverse_routes(&self) -> Vec<ReverseRouteEntry> {
        self.router.reverse_routes()
    }
}
