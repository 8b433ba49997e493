//! Reverse routes learned from route requests, pointing back toward the originator of a
//! discovery.

use std::time::Duration;

use tokio::time::Instant;

use crate::address::Address;

/// Records that a route request from `source` for `destination` was received from `precursor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseRouteEntry {
    destination: Address,
    source: Address,
    rreq_id: u8,
    precursor: Address,
    metric: u8,
    seen: Instant,
}

impl ReverseRouteEntry {
    pub fn new(
        destination: Address,
        source: Address,
        rreq_id: u8,
        precursor: Address,
        metric: u8,
    ) -> Self {
        Self {
            destination,
            source,
            rreq_id,
            precursor,
            metric,
            seen: Instant::now(),
        }
    }

    /// The node the request asked a route for.
    pub const fn destination(&self) -> Address {
        self.destination
    }

    /// The node which originated the request.
    pub const fn source(&self) -> Address {
        self.source
    }

    pub const fn rreq_id(&self) -> u8 {
        self.rreq_id
    }

    /// The neighbour the request was received from, which is the next hop back to `source`.
    pub const fn precursor(&self) -> Address {
        self.precursor
    }

    /// Amount of hops to `source`.
    pub const fn metric(&self) -> u8 {
        self.metric
    }

    /// Time at which the request was received.
    pub const fn seen(&self) -> Instant {
        self.seen
    }
}

/// Table of [`ReverseRouteEntry`]. Entries are kept for inspection, but only entries younger
/// than the configured lifetime take part in lookups, so request ids can be reused after they
/// wrap around.
#[derive(Debug, Clone)]
pub struct ReverseRoutingTable {
    lifetime: Duration,
    entries: Vec<ReverseRouteEntry>,
}

impl ReverseRoutingTable {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            lifetime,
            entries: Vec::new(),
        }
    }

    pub fn insert(&mut self, entry: ReverseRouteEntry) {
        self.entries.push(entry);
    }

    /// Returns true if a request with this `rreq_id` from `source` was already seen.
    pub fn contains(&self, source: Address, rreq_id: u8) -> bool {
        self.live(source, rreq_id).next().is_some()
    }

    /// The entry with the lowest metric for the request with this `rreq_id` from `source`.
    pub fn best(&self, source: Address, rreq_id: u8) -> Option<&ReverseRouteEntry> {
        self.live(source, rreq_id).min_by_key(|entry| entry.metric)
    }

    /// Iterate over all entries, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ReverseRouteEntry> {
        self.entries.iter()
    }

    fn live(&self, source: Address, rreq_id: u8) -> impl Iterator<Item = &ReverseRouteEntry> {
        let lifetime = self.lifetime;
        self.entries.iter().filter(move |entry| {
            entry.source == source
                && entry.rreq_id == rreq_id
                && entry.seen.elapsed() <= lifetime
        })
    }
}
