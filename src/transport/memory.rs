//! An in-process radio medium, connecting transports of nodes running in the same process.
//!
//! Like a real radio, every transmitted line is received by all stations in range, regardless of
//! the packet's next hop. Which stations are in range of each other is described by a set of
//! bidirectional links, which can be changed at runtime to simulate nodes moving out of range.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use log::{debug, trace};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::address::Address;

use super::{Link, OutboundLine};

#[derive(Default)]
struct Stations {
    links: HashSet<(Address, Address)>,
    inbound: HashMap<Address, mpsc::Sender<String>>,
    transmissions: HashMap<Address, usize>,
}

impl Stations {
    fn in_range(&self, a: Address, b: Address) -> bool {
        self.links.contains(&ordered(a, b))
    }
}

/// A shared radio medium.
#[derive(Clone, Default)]
pub struct Medium {
    stations: Arc<Mutex<Stations>>,
    latency: Duration,
}

impl Medium {
    /// Create a new `Medium` without any links.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new `Medium` with the given links.
    pub fn with_links(links: impl IntoIterator<Item = (Address, Address)>) -> Self {
        let medium = Self::new();
        for (a, b) in links {
            medium.connect(a, b);
        }
        medium
    }

    /// Delay every transmission by `latency` before it is received.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Put `a` and `b` in range of each other.
    pub fn connect(&self, a: Address, b: Address) {
        self.stations.lock().unwrap().links.insert(ordered(a, b));
    }

    /// Put `a` and `b` out of range of each other.
    pub fn disconnect(&self, a: Address, b: Address) {
        self.stations.lock().unwrap().links.remove(&ordered(a, b));
    }

    /// Amount of lines transmitted by the station at `address`.
    pub fn transmissions(&self, address: Address) -> usize {
        self.stations
            .lock()
            .unwrap()
            .transmissions
            .get(&address)
            .copied()
            .unwrap_or(0)
    }

    /// Attach a station at `address`, returning its [`Link`]. Attaching the same address again
    /// replaces the previous station's receiver.
    pub fn attach(&self, address: Address) -> Link {
        let (link, outbound, inbound) = Link::new();
        self.stations
            .lock()
            .unwrap()
            .inbound
            .insert(address, inbound);

        tokio::spawn(self.clone().transmit(address, outbound));

        link
    }

    async fn transmit(self, address: Address, mut outbound: mpsc::Receiver<OutboundLine>) {
        while let Some(request) = outbound.recv().await {
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }

            {
                let mut stations = self.stations.lock().unwrap();
                *stations.transmissions.entry(address).or_default() += 1;

                for (receiver, inbound) in &stations.inbound {
                    if *receiver == address || !stations.in_range(address, *receiver) {
                        continue;
                    }
                    match inbound.try_send(request.line.clone()) {
                        Ok(()) => trace!("Delivered line from {address} to {receiver}"),
                        Err(TrySendError::Full(_)) => {
                            debug!("Receive queue of {receiver} is full, line from {address} lost")
                        }
                        Err(TrySendError::Closed(_)) => {}
                    }
                }
            }

            let _ = request.done.send(Ok(()));
        }

        debug!("Station {address} detached from medium");
    }
}

fn ordered(a: Address, b: Address) -> (Address, Address) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use crate::address::Address;

    use super::Medium;

    #[tokio::test]
    async fn delivers_to_stations_in_range() {
        let medium = Medium::with_links([
            (Address::new(1), Address::new(2)),
            (Address::new(2), Address::new(3)),
        ]);
        let one = medium.attach(Address::new(1));
        let mut two = medium.attach(Address::new(2));
        let mut three = medium.attach(Address::new(3));

        one.transport
            .send("from one".into())
            .await
            .expect("Medium is running; qed");

        assert_eq!(two.inbound.recv().await.as_deref(), Some("from one"));
        assert!(three.inbound.try_recv().is_err());
        assert_eq!(medium.transmissions(Address::new(1)), 1);
        assert_eq!(medium.transmissions(Address::new(2)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn latency_delays_delivery() {
        let medium = Medium::with_links([(Address::new(1), Address::new(2))])
            .with_latency(Duration::from_millis(300));
        let one = medium.attach(Address::new(1));
        let mut two = medium.attach(Address::new(2));

        let start = Instant::now();
        one.transport
            .send("slow".into())
            .await
            .expect("Medium is running; qed");
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert_eq!(two.inbound.recv().await.as_deref(), Some("slow"));
    }

    #[tokio::test]
    async fn disconnected_stations_hear_nothing() {
        let medium = Medium::with_links([(Address::new(2), Address::new(1))]);
        let one = medium.attach(Address::new(1));
        let mut two = medium.attach(Address::new(2));

        medium.disconnect(Address::new(1), Address::new(2));
        one.transport
            .send("lost".into())
            .await
            .expect("Medium is running; qed");
        assert!(two.inbound.try_recv().is_err());

        medium.connect(Address::new(1), Address::new(2));
        one.transport
            .send("heard".into())
            .await
            .expect("Medium is running; qed");
        assert_eq!(two.inbound.recv().await.as_deref(), Some("heard"));
    }
}
