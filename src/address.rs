//! Node addresses on the radio network.

use core::fmt;
use std::{num::ParseIntError, str::FromStr};

use serde::Deserialize;

/// An 8 bit node address. The value `255` is reserved as the broadcast address and is never
/// assigned to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
pub struct Address(u8);

impl Address {
    /// The broadcast address. Every node accepts packets with this next hop.
    pub const BROADCAST: Address = Address(255);

    /// Create a new `Address`.
    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    /// Returns true if this is the [broadcast address](Address::BROADCAST).
    pub const fn is_broadcast(&self) -> bool {
        self.0 == Self::BROADCAST.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_broadcast() {
            f.write_str("broadcast")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<u8> for Address {
    fn from(value: u8) -> Self {
        Address(value)
    }
}

impl From<Address> for u8 {
    fn from(value: Address) -> Self {
        value.0
    }
}

impl FromStr for Address {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u8>().map(Address)
    }
}
