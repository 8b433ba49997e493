//! Registry of senders waiting for a hop by hop acknowledgement.
//!
//! Waiters are keyed by the address of the peer which must acknowledge. A waiter is registered
//! before the packet is sent, so an ACK which arrives quickly can't be missed, and removes itself
//! from the registry when dropped, whether it was acknowledged or not.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use log::trace;
use tokio::sync::oneshot;

use crate::address::Address;

#[derive(Default)]
struct Waiters {
    next_token: u64,
    by_peer: HashMap<Address, Vec<(u64, oneshot::Sender<()>)>>,
}

/// Shared registry of [`AckWaiter`]s.
#[derive(Clone, Default)]
pub struct PendingAcks {
    inner: Arc<Mutex<Waiters>>,
}

impl PendingAcks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in the next ACK sent by `peer`.
    pub fn register(&self, peer: Address) -> AckWaiter {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.inner.lock().unwrap();
        let token = waiters.next_token;
        waiters.next_token += 1;
        waiters.by_peer.entry(peer).or_default().push((token, tx));

        AckWaiter {
            peer,
            token,
            rx,
            registry: self.inner.clone(),
        }
    }

    /// Notify all waiters for `peer`. Returns the amount of waiters which were notified.
    pub fn acknowledge(&self, peer: Address) -> usize {
        let waiters = self
            .inner
            .lock()
            .unwrap()
            .by_peer
            .remove(&peer)
            .unwrap_or_default();

        let mut notified = 0;
        for (_, tx) in waiters {
            if tx.send(()).is_ok() {
                notified += 1;
            }
        }
        trace!("ACK from {peer} notified {notified} waiters");

        notified
    }

    /// Amount of waiters currently registered for `peer`.
    #[cfg(test)]
    pub fn pending(&self, peer: Address) -> usize {
        self.inner
            .lock()
            .unwrap()
            .by_peer
            .get(&peer)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

/// A pending wait for an ACK from a single peer.
pub struct AckWaiter {
    peer: Address,
    token: u64,
    rx: oneshot::Receiver<()>,
    registry: Arc<Mutex<Waiters>>,
}

impl AckWaiter {
    /// Wait at most `timeout` for the ACK. Returns true if it arrived in time.
    pub async fn wait(&mut self, timeout: Duration) -> bool {
        matches!(tokio::time::timeout(timeout, &mut self.rx).await, Ok(Ok(())))
    }
}

impl Drop for AckWaiter {
    fn drop(&mut self) {
        let mut waiters = self.registry.lock().unwrap();
        if let Some(list) = waiters.by_peer.get_mut(&self.peer) {
            list.retain(|(token, _)| *token != self.token);
            if list.is_empty() {
                waiters.by_peer.remove(&self.peer);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::address::Address;

    use super::PendingAcks;

    #[tokio::test(start_paused = true)]
    async fn ack_wakes_waiter() {
        let acks = PendingAcks::new();
        let mut waiter = acks.register(Address::new(2));
        assert_eq!(acks.pending(Address::new(2)), 1);

        assert_eq!(acks.acknowledge(Address::new(3)), 0);
        assert_eq!(acks.acknowledge(Address::new(2)), 1);
        assert!(waiter.wait(Duration::from_secs(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_times_out() {
        let acks = PendingAcks::new();
        let mut waiter = acks.register(Address::new(2));
        assert!(!waiter.wait(Duration::from_secs(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_waiter_unregisters() {
        let acks = PendingAcks::new();
        let first = acks.register(Address::new(2));
        let _second = acks.register(Address::new(2));
        assert_eq!(acks.pending(Address::new(2)), 2);

        drop(first);
        assert_eq!(acks.pending(Address::new(2)), 1);
    }
}
