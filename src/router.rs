//! The routing engine.
//!
//! Routes are discovered on demand. A node looking for a destination broadcasts a route request,
//! which floods the network while every node remembers where it came from. The destination, or a
//! node which already knows a route to it, answers with a route reply which travels back along
//! those reverse routes, installing forward routes on the way. Broken routes are announced to the
//! upstream nodes using them with route errors.
//!
//! Apart from broadcasts and route errors, packets are sent hop by hop with an acknowledgement:
//! the receiver of a packet immediately answers the sender with an ACK, and the sender retries a
//! few times if none arrives.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
    time::Duration,
};

use log::{debug, info, trace, warn};
use rand::Rng;
use tokio::{
    sync::{broadcast, mpsc},
    time::{interval_at, sleep, Instant, MissedTickBehavior},
};

use crate::{
    address::Address,
    config::RoutingConfig,
    network::{Network, NetworkEvent, SendError},
    packet::{
        Ack, Header, Message, Packet, RouteError, RouteReply, RouteRequest,
        UnreachableDestination,
    },
    pending_ack::PendingAcks,
    reverse_table::{ReverseRouteEntry, ReverseRoutingTable},
    routing_table::{RouteEntry, RoutingTable},
    sequence_number::SeqNo,
    transport::TransportError,
};

/// Amount of route notifications buffered for pending discoveries.
const NEW_ROUTE_CHANNEL_CAPACITY: usize = 64;

struct RouterState {
    routing_table: RoutingTable,
    reverse_table: ReverseRoutingTable,
    /// Latest sequence number heard from direct senders of messages.
    known_sequence_numbers: HashMap<Address, SeqNo>,
    next_rreq_id: u8,
}

impl RouterState {
    /// The most recent sequence number we know for `destination`, or 0 if we know none.
    fn last_known_sequence_number(&self, destination: Address) -> SeqNo {
        let heard = self.known_sequence_numbers.get(&destination).copied();
        let routed = self.routing_table.last_sequence_number(destination);
        match (heard, routed) {
            (Some(heard), Some(routed)) if routed.is_newer(&heard) => routed,
            (Some(heard), _) => heard,
            (None, routed) => routed.unwrap_or_default(),
        }
    }
}

#[derive(Clone)]
pub struct Router {
    network: Network,
    config: RoutingConfig,
    state: Arc<Mutex<RouterState>>,
    acks: PendingAcks,
    /// Every newly installed route is published here, for pending discoveries.
    new_routes: broadcast::Sender<RouteEntry>,
}

impl Router {
    pub fn new(network: Network, config: RoutingConfig) -> Self {
        let (new_routes, _) = broadcast::channel(NEW_ROUTE_CHANNEL_CAPACITY);
        let state = RouterState {
            routing_table: RoutingTable::new(network.address()),
            reverse_table: ReverseRoutingTable::new(config.route_wait_time()),
            known_sequence_numbers: HashMap::new(),
            next_rreq_id: 0,
        };

        Self {
            network,
            config,
            state: Arc::new(Mutex::new(state)),
            acks: PendingAcks::new(),
            new_routes,
        }
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    /// All entries of the routing table, including invalidated ones.
    pub fn routes(&self) -> Vec<RouteEntry> {
        self.state
            .lock()
            .unwrap()
            .routing_table
            .iter()
            .cloned()
            .collect()
    }

    /// All entries of the reverse routing table.
    pub fn reverse_routes(&self) -> Vec<ReverseRouteEntry> {
        self.state
            .lock()
            .unwrap()
            .reverse_table
            .iter()
            .cloned()
            .collect()
    }

    fn valid_route(&self, destination: Address) -> Option<RouteEntry> {
        self.state
            .lock()
            .unwrap()
            .routing_table
            .valid_route(destination)
            .cloned()
    }

    /// Find a valid route to `destination`, starting a route discovery if none is known. Returns
    /// [`None`] if no route reply arrives within the configured route wait time.
    ///
    /// Concurrent calls for the same destination each run their own discovery.
    pub async fn get_route_for(&self, destination: Address) -> Option<RouteEntry> {
        // Subscribe before checking, so a route installed in between is not missed.
        let mut new_routes = self.new_routes.subscribe();
        if let Some(route) = self.valid_route(destination) {
            return Some(route);
        }

        let rreq = self.new_route_request(destination);
        info!(
            "Looking for a route to {destination} with route request {}",
            rreq.rreq_id
        );

        let deadline = sleep(self.config.route_wait_time());
        tokio::pin!(deadline);
        let retry_interval = self.config.rreq_retry_interval();
        let mut retry = interval_at(Instant::now() + retry_interval, retry_interval);
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if let Err(e) = self.network.send_packet(rreq.clone().into()).await {
            warn!("Failed to broadcast route request for {destination}: {e}");
            if matches!(e, TransportError::Closed) {
                return None;
            }
        }

        loop {
            // The last retry tick coincides with the deadline, which must win.
            tokio::select! {
                biased;

                _ = &mut deadline => {
                    info!("No route to {destination} found");
                    return None;
                }
                _ = retry.tick() => {
                    debug!("Rebroadcasting route request {} for {destination}", rreq.rreq_id);
                    if let Err(e) = self.network.send_packet(rreq.clone().into()).await {
                        warn!("Failed to broadcast route request for {destination}: {e}");
                    }
                }
                route = new_routes.recv() => match route {
                    Ok(route) if route.destination() == destination => return Some(route),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if let Some(route) = self.valid_route(destination) {
                            return Some(route);
                        }
                    }
                    // We hold a sender ourselves.
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        }
    }

    fn new_route_request(&self, destination: Address) -> RouteRequest {
        let own_address = self.network.address();
        let (rreq_id, destination_sequence_number) = {
            let mut state = self.state.lock().unwrap();
            let rreq_id = state.next_rreq_id;
            state.next_rreq_id = rreq_id.wrapping_add(1);
            (rreq_id, state.last_known_sequence_number(destination))
        };
        let sequence_number = self.network.next_sequence_number();

        RouteRequest {
            header: Header::new(Address::BROADCAST, own_address),
            destination,
            hop_count: 0,
            sequence_number,
            rreq_id,
            destination_sequence_number,
            originator_address: own_address,
            originator_sequence: sequence_number,
            ttl: self.config.rreq_ttl,
        }
    }

    /// Send `packet` to its next hop, and wait for an ACK. The packet is transmitted at most
    /// `retries` times. Returns true if the next hop acknowledged the packet.
    pub async fn send_with_ack(&self, packet: Packet, retries: usize) -> bool {
        self.deliver(packet, retries).await.is_ok()
    }

    async fn deliver(&self, packet: Packet, retries: usize) -> Result<(), SendError> {
        let peer = packet.header().next_hop;
        let kind = packet.packet_type();

        for attempt in 1..=retries {
            let mut waiter = self.acks.register(peer);
            match self.network.send_packet(packet.clone()).await {
                Ok(()) => {}
                Err(TransportError::Closed) => return Err(TransportError::Closed.into()),
                Err(e) => {
                    warn!("Failed to transmit {kind} to {peer} (attempt {attempt}/{retries}): {e}");
                    continue;
                }
            }

            if waiter.wait(self.config.ack_timeout()).await {
                trace!("{kind} acknowledged by {peer}");
                return Ok(());
            }
            debug!("No ACK from {peer} for {kind} (attempt {attempt}/{retries})");
        }

        warn!("Giving up on {kind} to {peer} after {retries} attempts");
        Err(SendError::AckTimeout)
    }

    /// Send a message along `route`. If the next hop never acknowledges it, the route is treated
    /// as broken.
    pub(crate) async fn send_along(
        &self,
        route: &RouteEntry,
        mut msg: Message,
        upstream: Option<Address>,
    ) -> Result<(), SendError> {
        msg.header = Header::new(route.next_hop(), self.network.address());
        let result = self.deliver(msg.into(), self.config.ack_retries).await;
        if matches!(result, Err(SendError::AckTimeout)) {
            self.route_broken(route, upstream).await;
        }
        result
    }

    /// Invalidate `route` after its next hop stopped responding, and tell everyone who might be
    /// using it: the precursors of the route, and the node we were relaying for, if any.
    async fn route_broken(&self, route: &RouteEntry, upstream: Option<Address>) {
        let own_address = self.network.address();
        let invalidated = self
            .state
            .lock()
            .unwrap()
            .routing_table
            .invalidate_via(route.next_hop(), &[route.destination()]);

        if invalidated.is_empty() {
            return;
        }
        info!("Route to {} is broken", route.destination());
        self.network.emit(NetworkEvent::RouteTableChanged);

        let mut targets = route.precursors().to_vec();
        if let Some(upstream) = upstream {
            if !targets.contains(&upstream) {
                targets.push(upstream);
            }
        }

        for target in targets.into_iter().filter(|t| *t != own_address) {
            self.send_route_error(
                target,
                vec![UnreachableDestination {
                    destination: route.destination(),
                    sequence_number: route.sequence_number(),
                }],
            )
            .await;
        }
    }

    /// Process inbound packets from the transport until it closes.
    pub(crate) async fn receive_packets(self, mut inbound: mpsc::Receiver<String>) {
        while let Some(line) = inbound.recv().await {
            let Some(packet) = self.network.accept(&line) else {
                continue;
            };

            // ACKs complete pending sends, so they are never queued behind other handlers.
            if let Packet::Ack(ack) = packet {
                self.handle_ack(ack);
                continue;
            }

            let router = self.clone();
            tokio::spawn(async move { router.handle_packet(packet).await });
        }

        warn!("Transport closed, inbound packet processing halted");
    }

    /// Process a single packet addressed to this node.
    pub async fn handle_packet(&self, packet: Packet) {
        match packet {
            Packet::RouteRequest(rreq) => self.handle_route_request(rreq).await,
            Packet::RouteReply(rrep) => self.handle_route_reply(rrep).await,
            Packet::RouteError(rerr) => self.handle_route_error(rerr).await,
            Packet::Message(msg) => self.handle_message(msg).await,
            Packet::Ack(ack) => self.handle_ack(ack),
        }
    }

    /// Answer `rreq` if we know a route to its destination, otherwise rebroadcast it while its TTL
    /// lasts. A reverse entry is recorded in both cases, not only when rebroadcasting, so a
    /// second copy of a request we already answered is dropped as a duplicate instead of being
    /// answered again.
    async fn handle_route_request(&self, mut rreq: RouteRequest) {
        let own_address = self.network.address();
        rreq.hop_count = rreq.hop_count.saturating_add(1);
        rreq.ttl = rreq.ttl.saturating_sub(1);

        if rreq.originator_address == own_address {
            trace!(
                "Dropping own route request {} rebroadcast by {}",
                rreq.rreq_id,
                rreq.header.source
            );
            return;
        }

        let precursor = rreq.header.source;
        let route = {
            let mut state = self.state.lock().unwrap();
            if state
                .reverse_table
                .contains(rreq.originator_address, rreq.rreq_id)
            {
                trace!(
                    "Dropping route request {} from {} since it was already processed",
                    rreq.rreq_id,
                    rreq.originator_address
                );
                return;
            }
            state.reverse_table.insert(ReverseRouteEntry::new(
                rreq.destination,
                rreq.originator_address,
                rreq.rreq_id,
                precursor,
                rreq.hop_count,
            ));
            state
                .routing_table
                .valid_route(rreq.destination)
                .cloned()
        };

        if let Some(route) = route {
            debug!(
                "Answering route request {} from {} for {}",
                rreq.rreq_id, rreq.originator_address, rreq.destination
            );
            self.send_route_reply(&rreq, route).await;
            return;
        }

        if rreq.ttl == 0 {
            debug!(
                "Dropping route request {} from {} since its TTL expired",
                rreq.rreq_id, rreq.originator_address
            );
            return;
        }

        let delay = self.forward_delay();
        if !delay.is_zero() {
            sleep(delay).await;
        }

        debug!(
            "Rebroadcasting route request {} from {} for {}",
            rreq.rreq_id, rreq.originator_address, rreq.destination
        );
        rreq.header = Header::new(Address::BROADCAST, own_address);
        if let Err(e) = self.network.send_packet(rreq.into()).await {
            warn!("Failed to rebroadcast route request: {e}");
        }
    }

    /// Random delay before rebroadcasting a route request, so neighbours which received the same
    /// request don't all transmit at once.
    fn forward_delay(&self) -> Duration {
        let max = self.config.forward_jitter();
        if max.is_zero() {
            return Duration::ZERO;
        }
        rand::thread_rng().gen_range(Duration::ZERO..=max)
    }

    /// Answer `rreq` with `route`, which leads to the requested destination.
    async fn send_route_reply(&self, rreq: &RouteRequest, route: RouteEntry) {
        let own_address = self.network.address();
        let requester = rreq.header.source;

        let sequence_number = if route.destination() == own_address {
            self.network.next_sequence_number()
        } else {
            // The requester starts using this route through us, so it must hear about breakage.
            if !route.precursors().contains(&requester) {
                self.state
                    .lock()
                    .unwrap()
                    .routing_table
                    .install(route.clone().with_precursor(requester));
                self.network.emit(NetworkEvent::RouteTableChanged);
            }
            route.sequence_number()
        };

        let rrep = RouteReply {
            header: Header::new(requester, own_address),
            destination: rreq.originator_address,
            hop_count: route.metric(),
            sequence_number,
            rreq_id: rreq.rreq_id,
            destination_sequence_number: rreq.originator_sequence,
            originator_address: rreq.destination,
            ttl: rreq.hop_count.saturating_add(1),
        };

        if !self
            .send_with_ack(rrep.into(), self.config.ack_retries)
            .await
        {
            warn!(
                "Route reply for {} was not acknowledged by {requester}",
                rreq.originator_address
            );
        }
    }

    async fn handle_route_reply(&self, mut rrep: RouteReply) {
        let own_address = self.network.address();
        let from = rrep.header.source;
        rrep.hop_count = rrep.hop_count.saturating_add(1);
        rrep.ttl = rrep.ttl.saturating_sub(1);

        self.send_ack(from).await;

        let (installed, reverse) = {
            let mut state = self.state.lock().unwrap();
            let reverse = state
                .reverse_table
                .best(rrep.destination, rrep.rreq_id)
                .cloned();

            let better = rrep.originator_address != own_address
                && match state.routing_table.valid_route(rrep.originator_address) {
                    None => true,
                    Some(existing) => {
                        rrep.sequence_number.is_newer(&existing.sequence_number())
                            || (rrep.sequence_number == existing.sequence_number()
                                && existing.metric() > rrep.hop_count)
                    }
                };

            let installed = better.then(|| {
                let route = RouteEntry::new(
                    rrep.originator_address,
                    from,
                    reverse.iter().map(|r| r.precursor()).collect(),
                    rrep.hop_count,
                    rrep.sequence_number,
                );
                state.routing_table.install(route.clone());
                route
            });

            (installed, reverse)
        };

        match installed {
            Some(route) => {
                info!("Installed route to {route}");
                self.network.emit(NetworkEvent::RouteTableChanged);
                // Nobody waiting for the route is fine.
                let _ = self.new_routes.send(route);
            }
            None => debug!(
                "Ignoring route reply for {} from {from} since the known route is as good",
                rrep.originator_address
            ),
        }

        if rrep.destination == own_address {
            return;
        }
        let Some(reverse) = reverse else {
            debug!(
                "Can't relay route reply to {} since there is no reverse route",
                rrep.destination
            );
            return;
        };
        if rrep.ttl == 0 {
            debug!(
                "Dropping route reply to {} since its TTL expired",
                rrep.destination
            );
            return;
        }

        let advertised = rrep.originator_address;
        trace!(
            "Relaying route reply for {advertised} to {} via {}",
            rrep.destination,
            reverse.precursor()
        );
        rrep.header = Header::new(reverse.precursor(), own_address);
        if !self
            .send_with_ack(rrep.into(), self.config.ack_retries)
            .await
        {
            warn!(
                "Relayed route reply for {advertised} was not acknowledged by {}",
                reverse.precursor()
            );
        }
    }

    async fn handle_route_error(&self, rerr: RouteError) {
        let from = rerr.header.source;
        let destinations: Vec<Address> = rerr.destinations.iter().map(|d| d.destination).collect();

        let invalidated = self
            .state
            .lock()
            .unwrap()
            .routing_table
            .invalidate_via(from, &destinations);

        if invalidated.is_empty() {
            trace!("Route error from {from} does not affect any of our routes");
            return;
        }
        for route in &invalidated {
            info!("Route to {} via {from} is broken", route.destination());
        }
        self.network.emit(NetworkEvent::RouteTableChanged);

        let own_address = self.network.address();
        let mut by_precursor: BTreeMap<Address, Vec<UnreachableDestination>> = BTreeMap::new();
        for route in &invalidated {
            for precursor in route.precursors().iter().filter(|p| **p != own_address) {
                by_precursor
                    .entry(*precursor)
                    .or_default()
                    .push(UnreachableDestination {
                        destination: route.destination(),
                        sequence_number: route.sequence_number(),
                    });
            }
        }

        for (precursor, destinations) in by_precursor {
            self.send_route_error(precursor, destinations).await;
        }
    }

    async fn send_route_error(&self, to: Address, destinations: Vec<UnreachableDestination>) {
        debug!(
            "Sending route error for {} destinations to {to}",
            destinations.len()
        );
        let rerr = RouteError {
            header: Header::new(to, self.network.address()),
            destinations,
        };
        if let Err(e) = self.network.send_packet(rerr.into()).await {
            warn!("Failed to send route error to {to}: {e}");
        }
    }

    async fn handle_message(&self, mut msg: Message) {
        let own_address = self.network.address();
        let from = msg.header.source;

        self.send_ack(from).await;
        self.state
            .lock()
            .unwrap()
            .known_sequence_numbers
            .insert(from, msg.sequence_number);

        if msg.destination == own_address {
            info!("Received message from {from}");
            self.network.emit(NetworkEvent::MessageReceived {
                from,
                sequence_number: msg.sequence_number,
                payload: msg.payload,
            });
            return;
        }

        let Some(route) = self.valid_route(msg.destination) else {
            debug!(
                "Can't forward message from {from} to {} since there is no route",
                msg.destination
            );
            let sequence_number = self
                .state
                .lock()
                .unwrap()
                .last_known_sequence_number(msg.destination);
            self.send_route_error(
                from,
                vec![UnreachableDestination {
                    destination: msg.destination,
                    sequence_number,
                }],
            )
            .await;
            return;
        };

        trace!(
            "Forwarding message from {from} for {} to {}",
            msg.destination,
            route.next_hop()
        );
        msg.hop_count = msg.hop_count.saturating_add(1);
        // The sequence number always belongs to the node which transmits the hop.
        msg.sequence_number = self.network.sequence_number();
        if let Err(e) = self.send_along(&route, msg, Some(from)).await {
            warn!("Failed to forward message for {}: {e}", route.destination());
        }
    }

    fn handle_ack(&self, ack: Ack) {
        if ack.header.next_hop != self.network.address() {
            trace!("Ignoring ACK from {} for another node", ack.header.source);
            return;
        }

        if self.acks.acknowledge(ack.header.source) == 0 {
            trace!("Received ACK from {} nobody waits for", ack.header.source);
        }
    }

    async fn send_ack(&self, to: Address) {
        let ack = Ack {
            header: Header::new(to, self.network.address()),
        };
        if let Err(e) = self.network.send_packet(ack.into()).await {
            warn!("Failed to send ACK to {to}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::{
        address::Address,
        config::RoutingConfig,
        network::Network,
        packet::{
            Ack, Header, Message, Packet, RouteError, RouteReply, RouteRequest,
            UnreachableDestination,
        },
        routing_table::RouteEntry,
        sequence_number::SeqNo,
        transport::{memory::Medium, Link},
    };

    use super::Router;

    fn config() -> RoutingConfig {
        RoutingConfig {
            forward_jitter_ms: 0,
            ..RoutingConfig::default()
        }
    }

    fn router_on(medium: &Medium, address: u8) -> Router {
        let link = medium.attach(Address::new(address));
        let router = Router::new(
            Network::new(Address::new(address), link.transport),
            config(),
        );
        tokio::spawn(router.clone().receive_packets(link.inbound));
        router
    }

    fn medium(links: &[(u8, u8)]) -> Medium {
        Medium::with_links(
            links
                .iter()
                .map(|(a, b)| (Address::new(*a), Address::new(*b))),
        )
    }

    async fn next_packet(link: &mut Link) -> Packet {
        let line = link
            .inbound
            .recv()
            .await
            .expect("Medium delivers a line; qed");
        Packet::decode(&line).expect("Router sends valid packets; qed")
    }

    fn drain(link: &mut Link) -> Vec<Packet> {
        let mut packets = Vec::new();
        while let Ok(line) = link.inbound.try_recv() {
            packets.push(Packet::decode(&line).expect("Router sends valid packets; qed"));
        }
        packets
    }

    async fn inject(link: &Link, packet: impl Into<Packet>) {
        link.transport
            .send(packet.into().encode())
            .await
            .expect("Medium is running; qed");
    }

    fn message(next_hop: u8, source: u8, destination: u8) -> Message {
        Message {
            header: Header::new(Address::new(next_hop), Address::new(source)),
            destination: Address::new(destination),
            hop_count: 0,
            sequence_number: SeqNo::from(4),
            payload: "ping".into(),
        }
    }

    fn route_request(source: u8, originator: u8, destination: u8, rreq_id: u8) -> RouteRequest {
        RouteRequest {
            header: Header::new(Address::BROADCAST, Address::new(source)),
            destination: Address::new(destination),
            hop_count: 0,
            sequence_number: SeqNo::from(7),
            rreq_id,
            destination_sequence_number: SeqNo::new(),
            originator_address: Address::new(originator),
            originator_sequence: SeqNo::from(7),
            ttl: 5,
        }
    }

    /// A reply from `source` to `requester`, advertising a route to `advertised`.
    fn route_reply(next_hop: u8, source: u8, requester: u8, advertised: u8) -> RouteReply {
        RouteReply {
            header: Header::new(Address::new(next_hop), Address::new(source)),
            destination: Address::new(requester),
            hop_count: 0,
            sequence_number: SeqNo::from(10),
            rreq_id: 1,
            destination_sequence_number: SeqNo::new(),
            originator_address: Address::new(advertised),
            ttl: 5,
        }
    }

    fn valid_routes(router: &Router, destination: u8) -> Vec<RouteEntry> {
        router
            .routes()
            .into_iter()
            .filter(|r| r.is_valid() && r.destination() == Address::new(destination))
            .collect()
    }

    /// The single valid route to `destination`.
    fn only_route(router: &Router, destination: u8) -> RouteEntry {
        let mut routes = valid_routes(router, destination);
        assert_eq!(routes.len(), 1, "exactly 1 valid route to {destination}");
        routes.remove(0)
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_discovery_rebroadcasts_until_deadline() {
        let medium = medium(&[(1, 2)]);
        let router = router_on(&medium, 1);
        let mut silent = medium.attach(Address::new(2));

        let start = tokio::time::Instant::now();
        assert!(router.get_route_for(Address::new(2)).await.is_none());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(60) && elapsed < Duration::from_secs(61));

        // Sent at 0, 20 and 40 seconds, nothing once the time is up.
        assert_eq!(medium.transmissions(Address::new(1)), 3);
        let requests = drain(&mut silent);
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|p| matches!(
            p,
            Packet::RouteRequest(rreq) if rreq.rreq_id == 0 && rreq.destination == Address::new(2)
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn fresher_or_shorter_replies_replace_routes() {
        let medium = medium(&[(1, 2), (1, 3)]);
        let router = router_on(&medium, 1);

        let reply = |source: u8, hop_count: u8, sequence_number: u8| RouteReply {
            hop_count,
            sequence_number: SeqNo::from(sequence_number),
            ..route_reply(1, source, 1, 4)
        };

        router.handle_packet(reply(2, 2, 10).into()).await;
        let route = only_route(&router, 4);
        assert_eq!((route.next_hop(), route.metric()), (Address::new(2), 3));

        // Newer sequence number wins, even with a worse metric.
        router.handle_packet(reply(3, 5, 11).into()).await;
        let route = only_route(&router, 4);
        assert_eq!((route.next_hop(), route.metric()), (Address::new(3), 6));
        assert!(router.routes().iter().any(|r| r.destination() == Address::new(4)
            && r.next_hop() == Address::new(2)
            && !r.is_valid()));

        // Same sequence number, lower metric wins.
        router.handle_packet(reply(2, 1, 11).into()).await;
        let route = only_route(&router, 4);
        assert_eq!((route.next_hop(), route.metric()), (Address::new(2), 2));

        // Same sequence number with an equal or higher metric, or an older one, changes nothing.
        router.handle_packet(reply(3, 1, 11).into()).await;
        router.handle_packet(reply(3, 4, 11).into()).await;
        router.handle_packet(reply(3, 0, 10).into()).await;
        let route = only_route(&router, 4);
        assert_eq!((route.next_hop(), route.metric()), (Address::new(2), 2));
        assert_eq!(route.sequence_number(), SeqNo::from(11));
        assert_eq!(
            router
                .routes()
                .iter()
                .filter(|r| r.destination() == Address::new(4))
                .count(),
            3
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reply_freshness_wraps_around() {
        let medium = medium(&[(1, 2), (1, 3)]);
        let router = router_on(&medium, 1);

        let reply = |source: u8, hop_count: u8, sequence_number: u8| RouteReply {
            hop_count,
            sequence_number: SeqNo::from(sequence_number),
            ..route_reply(1, source, 1, 4)
        };

        router.handle_packet(reply(2, 3, 255).into()).await;
        // 0 follows 255.
        router.handle_packet(reply(3, 3, 0).into()).await;
        let route = only_route(&router, 4);
        assert_eq!(route.next_hop(), Address::new(3));
        assert_eq!(route.sequence_number(), SeqNo::from(0));

        // 254 is older than 0, no matter how short.
        router.handle_packet(reply(2, 0, 254).into()).await;
        let route = only_route(&router, 4);
        assert_eq!(route.next_hop(), Address::new(3));
        assert_eq!(route.sequence_number(), SeqNo::from(0));
    }

    #[tokio::test(start_paused = true)]
    async fn route_request_with_expired_ttl_is_not_rebroadcast() {
        let medium = medium(&[(1, 2), (2, 3)]);
        let router = router_on(&medium, 2);
        let mut one = medium.attach(Address::new(1));
        let mut three = medium.attach(Address::new(3));

        let rreq = RouteRequest {
            ttl: 1,
            ..route_request(1, 1, 9, 3)
        };
        inject(&one, rreq).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(drain(&mut three).is_empty());
        assert!(drain(&mut one).is_empty());
        // The request is still remembered.
        assert_eq!(router.reverse_routes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn route_reply_with_expired_ttl_is_not_relayed() {
        let medium = medium(&[(1, 2), (2, 3)]);
        let router = router_on(&medium, 2);
        let mut one = medium.attach(Address::new(1));
        let three = medium.attach(Address::new(3));

        inject(&one, route_request(1, 1, 4, 5)).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        drain(&mut one);

        let rrep = RouteReply {
            rreq_id: 5,
            ttl: 1,
            ..route_reply(2, 3, 1, 4)
        };
        inject(&three, rrep.clone()).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        // The route is installed, but the reply goes no further.
        assert_eq!(only_route(&router, 4).next_hop(), Address::new(3));
        assert!(!drain(&mut one)
            .iter()
            .any(|p| matches!(p, Packet::RouteReply(_))));

        // With TTL left, the same reply is relayed towards the requester.
        inject(&three, RouteReply { ttl: 2, ..rrep }).await;
        let relayed = loop {
            if let Packet::RouteReply(relayed) = next_packet(&mut one).await {
                break relayed;
            }
        };
        assert_eq!(relayed.header.next_hop, Address::new(1));
        assert_eq!(relayed.ttl, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn relay_answers_from_its_routing_table() {
        let medium = medium(&[(2, 3), (2, 5)]);
        let router = router_on(&medium, 2);
        let three = medium.attach(Address::new(3));
        let mut five = medium.attach(Address::new(5));

        // Learn a 3 hop route to 4 through 3.
        let rrep = RouteReply {
            hop_count: 2,
            ..route_reply(2, 3, 2, 4)
        };
        inject(&three, rrep).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(only_route(&router, 4).precursors().is_empty());
        drain(&mut five);

        inject(&five, route_request(5, 5, 4, 1)).await;
        let Packet::RouteReply(reply) = next_packet(&mut five).await else {
            panic!("Expected a route reply");
        };
        inject(
            &five,
            Ack {
                header: Header::new(Address::new(2), Address::new(5)),
            },
        )
        .await;

        assert_eq!(reply.header.next_hop, Address::new(5));
        assert_eq!(reply.destination, Address::new(5));
        assert_eq!(reply.originator_address, Address::new(4));
        assert_eq!(reply.hop_count, 3);
        // The sequence number of the route, not our own.
        assert_eq!(reply.sequence_number, SeqNo::from(10));
        assert_eq!(router.network().sequence_number(), SeqNo::new());

        let route = only_route(&router, 4);
        assert_eq!(route.precursors(), &[Address::new(5)]);
        assert_eq!(route.metric(), 3);

        // 5 now depends on the route, so it hears when it breaks.
        inject(
            &three,
            RouteError {
                header: Header::new(Address::new(2), Address::new(3)),
                destinations: vec![UnreachableDestination {
                    destination: Address::new(4),
                    sequence_number: SeqNo::from(10),
                }],
            },
        )
        .await;
        let Packet::RouteError(rerr) = next_packet(&mut five).await else {
            panic!("Expected a route error");
        };
        assert_eq!(rerr.header.next_hop, Address::new(5));
        assert_eq!(rerr.destinations[0].destination, Address::new(4));
        assert!(valid_routes(&router, 4).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn send_with_ack_gives_up_after_retries() {
        let medium = medium(&[(1, 2)]);
        let router = router_on(&medium, 1);
        // A station which never acknowledges anything.
        let mut peer = medium.attach(Address::new(2));

        assert!(!router.send_with_ack(message(2, 1, 2).into(), 3).await);
        assert_eq!(medium.transmissions(Address::new(1)), 3);
        assert_eq!(drain(&mut peer).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn send_with_ack_stops_on_ack() {
        let medium = medium(&[(1, 2)]);
        let router = router_on(&medium, 1);
        let mut peer = medium.attach(Address::new(2));

        let responder = tokio::spawn(async move {
            let packet = next_packet(&mut peer).await;
            assert!(matches!(packet, Packet::Message(_)));
            inject(
                &peer,
                Ack {
                    header: Header::new(Address::new(1), Address::new(2)),
                },
            )
            .await;
            peer
        });

        assert!(router.send_with_ack(message(2, 1, 2).into(), 3).await);
        assert_eq!(medium.transmissions(Address::new(1)), 1);
        responder.await.expect("Responder does not panic; qed");
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_route_request_is_processed_once() {
        let medium = medium(&[(1, 2), (2, 3)]);
        let router = router_on(&medium, 2);
        let one = medium.attach(Address::new(1));
        let mut three = medium.attach(Address::new(3));

        inject(&one, route_request(1, 1, 9, 5)).await;
        inject(&one, route_request(1, 1, 9, 5)).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let rebroadcasts = drain(&mut three);
        assert_eq!(rebroadcasts.len(), 1);
        let Packet::RouteRequest(rreq) = &rebroadcasts[0] else {
            panic!("Expected a route request, got {:?}", rebroadcasts[0]);
        };
        assert_eq!(rreq.header.next_hop, Address::BROADCAST);
        assert_eq!(rreq.header.source, Address::new(2));
        assert_eq!(rreq.hop_count, 1);
        assert_eq!(rreq.ttl, 4);
        assert_eq!(rreq.originator_address, Address::new(1));

        let reverse = router.reverse_routes();
        assert_eq!(reverse.len(), 1);
        assert_eq!(reverse[0].precursor(), Address::new(1));
        assert_eq!(reverse[0].metric(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn own_route_request_is_ignored() {
        let medium = medium(&[(1, 2)]);
        let router = router_on(&medium, 2);
        let mut one = medium.attach(Address::new(1));

        inject(&one, route_request(1, 2, 9, 0)).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(drain(&mut one).is_empty());
        assert!(router.reverse_routes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn destination_answers_route_request() {
        let medium = medium(&[(3, 4)]);
        let router = router_on(&medium, 4);
        let mut three = medium.attach(Address::new(3));

        let mut rreq = route_request(3, 1, 4, 1);
        rreq.hop_count = 2;
        inject(&three, rreq).await;

        let Packet::RouteReply(rrep) = next_packet(&mut three).await else {
            panic!("Expected a route reply");
        };
        inject(
            &three,
            Ack {
                header: Header::new(Address::new(4), Address::new(3)),
            },
        )
        .await;

        assert_eq!(rrep.header.next_hop, Address::new(3));
        assert_eq!(rrep.header.source, Address::new(4));
        assert_eq!(rrep.destination, Address::new(1));
        assert_eq!(rrep.originator_address, Address::new(4));
        assert_eq!(rrep.hop_count, 0);
        assert_eq!(rrep.rreq_id, 1);
        assert_eq!(rrep.destination_sequence_number, SeqNo::from(7));
        assert_eq!(rrep.sequence_number, SeqNo::from(0));
        assert_eq!(rrep.ttl, 4);
        // Own sequence number advanced for the reply.
        assert_eq!(router.network().sequence_number(), SeqNo::from(1));
    }

    #[tokio::test(start_paused = true)]
    async fn answered_route_request_is_not_answered_twice() {
        let medium = medium(&[(3, 4)]);
        let router = router_on(&medium, 4);
        let mut three = medium.attach(Address::new(3));

        inject(&three, route_request(3, 1, 4, 2)).await;
        assert!(matches!(
            next_packet(&mut three).await,
            Packet::RouteReply(_)
        ));
        inject(
            &three,
            Ack {
                header: Header::new(Address::new(4), Address::new(3)),
            },
        )
        .await;

        inject(&three, route_request(3, 1, 4, 2)).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(drain(&mut three).is_empty());
        assert_eq!(router.reverse_routes().len(), 1);
        assert_eq!(router.network().sequence_number(), SeqNo::from(1));
    }

    #[tokio::test(start_paused = true)]
    async fn message_without_route_is_answered_with_route_error() {
        let medium = medium(&[(1, 2)]);
        let _router = router_on(&medium, 2);
        let mut one = medium.attach(Address::new(1));

        inject(&one, message(2, 1, 9)).await;

        let Packet::Ack(ack) = next_packet(&mut one).await else {
            panic!("Expected an ACK first");
        };
        assert_eq!(ack.header.next_hop, Address::new(1));

        let Packet::RouteError(rerr) = next_packet(&mut one).await else {
            panic!("Expected a route error");
        };
        assert_eq!(rerr.header.next_hop, Address::new(1));
        assert_eq!(rerr.destinations.len(), 1);
        assert_eq!(rerr.destinations[0].destination, Address::new(9));
        assert_eq!(rerr.destinations[0].sequence_number, SeqNo::new());
    }

    #[tokio::test(start_paused = true)]
    async fn ack_for_other_node_is_ignored() {
        let medium = medium(&[(1, 2)]);
        let router = router_on(&medium, 1);
        let peer = medium.attach(Address::new(2));

        let send = tokio::spawn({
            let router = router.clone();
            async move { router.send_with_ack(message(2, 1, 2).into(), 1).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        inject(
            &peer,
            Ack {
                header: Header::new(Address::new(3), Address::new(2)),
            },
        )
        .await;

        assert!(!send.await.expect("Send task does not panic; qed"));
    }
}
