//! Channel-backed broadcast bus used by the engine and its tests.

use std::sync::{Mutex, MutexGuard, PoisonError, mpsc};

use crate::bus::{EventBus, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InMemoryBusError {
    /// A publisher panicked while holding the subscriber list.
    Poisoned,
    /// The bus was closed; the message was not delivered to anyone.
    Closed,
}

#[derive(Debug)]
struct Fanout<M> {
    senders: Vec<mpsc::Sender<M>>,
    open: bool,
    delivered: u64,
}

/// In-process broadcast of envelopes to every live subscription.
///
/// A closed bus refuses messages with [`InMemoryBusError::Closed`], which is
/// how a downstream outage surfaces to the publisher. Subscriptions taken
/// while closed still receive everything published after [`reopen`].
///
/// [`reopen`]: InMemoryEventBus::reopen
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    fanout: Mutex<Fanout<M>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop accepting messages until [`InMemoryEventBus::reopen`].
    pub fn close(&self) {
        self.lock().open = false;
    }

    pub fn reopen(&self) {
        self.lock().open = true;
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// Subscriptions that were alive at the last publish.
    pub fn subscriber_count(&self) -> usize {
        self.lock().senders.len()
    }

    /// Per-subscriber deliveries since the bus was created.
    pub fn delivered(&self) -> u64 {
        self.lock().delivered
    }

    // Subscribing and inspecting never fail; a poisoned list is still usable.
    fn lock(&self) -> MutexGuard<'_, Fanout<M>> {
        self.fanout.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            fanout: Mutex::new(Fanout {
                senders: Vec::new(),
                open: true,
                delivered: 0,
            }),
        }
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut fanout = self.fanout.lock().map_err(|_| InMemoryBusError::Poisoned)?;
        if !fanout.open {
            return Err(InMemoryBusError::Closed);
        }

        fanout.senders.retain(|tx| tx.send(message.clone()).is_ok());
        fanout.delivered += fanout.senders.len() as u64;
        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();
        self.lock().senders.push(tx);
        Subscription::new(rx)
    }
}
