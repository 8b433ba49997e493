//! The forward routing table.
//!
//! Entries are never changed in place and never removed. When a route is replaced, the old entry
//! is marked invalid and the new entry is appended, which keeps the history available for
//! inspection.

use core::fmt;

use crate::{address::Address, sequence_number::SeqNo};

/// A route to a destination through a neighbouring node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    destination: Address,
    next_hop: Address,
    precursors: Vec<Address>,
    metric: u8,
    sequence_number: SeqNo,
    valid: bool,
}

impl RouteEntry {
    /// Create a new, valid `RouteEntry`.
    pub fn new(
        destination: Address,
        next_hop: Address,
        precursors: Vec<Address>,
        metric: u8,
        sequence_number: SeqNo,
    ) -> Self {
        Self {
            destination,
            next_hop,
            precursors,
            metric,
            sequence_number,
            valid: true,
        }
    }

    /// The node this route leads to.
    pub const fn destination(&self) -> Address {
        self.destination
    }

    /// The neighbour packets for the destination are sent to.
    pub const fn next_hop(&self) -> Address {
        self.next_hop
    }

    /// Upstream neighbours which route through us to the destination, and must be told when this
    /// route breaks.
    pub fn precursors(&self) -> &[Address] {
        &self.precursors
    }

    /// Amount of hops to the destination.
    pub const fn metric(&self) -> u8 {
        self.metric
    }

    pub const fn sequence_number(&self) -> SeqNo {
        self.sequence_number
    }

    pub const fn is_valid(&self) -> bool {
        self.valid
    }

    /// A copy of this entry with `precursor` added to the precursors.
    pub fn with_precursor(mut self, precursor: Address) -> Self {
        if !self.precursors.contains(&precursor) {
            self.precursors.push(precursor);
        }
        self
    }
}

impl fmt::Display for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} via {} (metric {}, seqno {}{})",
            self.destination,
            self.next_hop,
            self.metric,
            self.sequence_number,
            if self.valid { "" } else { ", invalid" }
        )
    }
}

#[derive(Debug, Clone)]
pub struct RoutingTable {
    own_address: Address,
    entries: Vec<RouteEntry>,
}

impl RoutingTable {
    /// Create a new `RoutingTable`, seeded with the route to the local node itself.
    pub fn new(own_address: Address) -> Self {
        Self {
            own_address,
            entries: vec![RouteEntry::new(
                own_address,
                own_address,
                Vec::new(),
                0,
                SeqNo::new(),
            )],
        }
    }

    /// Get the valid route to `destination`, if there is one.
    pub fn valid_route(&self, destination: Address) -> Option<&RouteEntry> {
        self.entries
            .iter()
            .find(|entry| entry.valid && entry.destination == destination)
    }

    /// Sequence number of the most recently installed entry for `destination`, valid or not.
    pub fn last_sequence_number(&self, destination: Address) -> Option<SeqNo> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.destination == destination)
            .map(|entry| entry.sequence_number)
    }

    /// Install `entry` as the route to its destination. The existing valid route, if any, is
    /// invalidated first, so there is at most 1 valid route per destination.
    pub fn install(&mut self, entry: RouteEntry) {
        for existing in self
            .entries
            .iter_mut()
            .filter(|e| e.valid && e.destination == entry.destination)
        {
            existing.valid = false;
        }
        self.entries.push(entry);
    }

    /// Invalidate all valid routes through `next_hop` to any of `destinations`, returning copies
    /// of the invalidated entries.
    pub fn invalidate_via(&mut self, next_hop: Address, destinations: &[Address]) -> Vec<RouteEntry> {
        let own_address = self.own_address;
        self.entries
            .iter_mut()
            .filter(|e| {
                e.valid
                    && e.next_hop == next_hop
                    && e.destination != own_address
                    && destinations.contains(&e.destination)
            })
            .map(|e| {
                e.valid = false;
                e.clone()
            })
            .collect()
    }

    /// Iterate over all entries, including invalidated ones, in installation order.
    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use crate::{address::Address, sequence_number::SeqNo};

    use super::{RouteEntry, RoutingTable};

    #[test]
    fn seeded_with_self_route() {
        let table = RoutingTable::new(Address::new(3));
        let route = table
            .valid_route(Address::new(3))
            .expect("Self route is always present; qed");
        assert_eq!(route.next_hop(), Address::new(3));
        assert_eq!(route.metric(), 0);
    }

    #[test]
    fn install_replaces_without_mutation() {
        let mut table = RoutingTable::new(Address::new(1));
        table.install(RouteEntry::new(
            Address::new(4),
            Address::new(2),
            vec![],
            3,
            SeqNo::from(1),
        ));
        table.install(RouteEntry::new(
            Address::new(4),
            Address::new(5),
            vec![Address::new(6)],
            2,
            SeqNo::from(2),
        ));

        let routes: Vec<_> = table
            .iter()
            .filter(|e| e.destination() == Address::new(4))
            .collect();
        assert_eq!(routes.len(), 2);
        assert!(!routes[0].is_valid());
        assert_eq!(routes[0].next_hop(), Address::new(2));
        assert!(routes[1].is_valid());
        assert_eq!(
            table.valid_route(Address::new(4)).map(|r| r.next_hop()),
            Some(Address::new(5))
        );
        assert_eq!(
            table.iter().filter(|e| e.is_valid()).count(),
            2,
            "self route and 1 route to 4"
        );
    }

    #[test]
    fn invalidate_via_next_hop() {
        let mut table = RoutingTable::new(Address::new(1));
        table.install(RouteEntry::new(
            Address::new(4),
            Address::new(2),
            vec![],
            3,
            SeqNo::from(8),
        ));
        table.install(RouteEntry::new(
            Address::new(5),
            Address::new(2),
            vec![],
            1,
            SeqNo::from(1),
        ));

        // Wrong next hop.
        assert!(table
            .invalidate_via(Address::new(3), &[Address::new(4)])
            .is_empty());

        let invalidated = table.invalidate_via(Address::new(2), &[Address::new(4)]);
        assert_eq!(invalidated.len(), 1);
        assert_eq!(invalidated[0].destination(), Address::new(4));
        assert!(table.valid_route(Address::new(4)).is_none());
        assert!(table.valid_route(Address::new(5)).is_some());
        assert_eq!(
            table.last_sequence_number(Address::new(4)),
            Some(SeqNo::from(8))
        );
    }

    #[test]
    fn self_route_survives_invalidation() {
        let mut table = RoutingTable::new(Address::new(1));
        assert!(table
            .invalidate_via(Address::new(1), &[Address::new(1)])
            .is_empty());
        assert!(table.valid_route(Address::new(1)).is_some());
    }
}
