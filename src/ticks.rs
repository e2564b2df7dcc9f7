//! Tick notifications and the channel that carries them.
//!
//! The worker thread never touches caller state directly: each timer
//! firing is stamped and pushed onto an async channel, and whatever
//! execution context the caller owns drains it at its leisure.

use async_channel::{Receiver, Sender};
use chrono::{DateTime, Local};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One timer firing, as seen by the consumer.
#[derive(Debug, Clone)]
pub struct Tick {
    /// Wall-clock timestamp taken on the worker thread at firing time.
    pub at: DateTime<Local>,
    /// Monotonically increasing firing counter, starting at 0.
    pub seq: u64,
}

/// Producer half handed to the controller; cheap to clone.
#[derive(Clone)]
pub struct TickSender {
    tx: Sender<Tick>,
    seq: Arc<AtomicU64>,
}

impl TickSender {
    /// Stamps and publishes one tick. Failures (consumer gone) are
    /// silently dropped; the worker must never block or error on a
    /// departed consumer.
    pub fn send(&self, at: DateTime<Local>) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.try_send(Tick { at, seq });
    }
}

/// Unbounded single-consumer channel pairing the worker with the
/// caller's display loop.
pub struct TickBus {
    tx: Sender<Tick>,
    rx: Receiver<Tick>,
    seq: Arc<AtomicU64>,
}

impl TickBus {
    pub fn new() -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self {
            tx,
            rx,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns a producer handle for the controller's timer action. All
    /// senders from one bus share the same sequence counter.
    pub fn sender(&self) -> TickSender {
        TickSender {
            tx: self.tx.clone(),
            seq: Arc::clone(&self.seq),
        }
    }

    /// Returns a receiver for the consumer's drain loop.
    pub fn subscribe(&self) -> Receiver<Tick> {
        self.rx.clone()
    }

    /// Closes the channel so blocked consumers unblock with an error.
    pub fn close(&self) {
        self.rx.close();
    }
}

impl Default for TickBus {
    fn default() -> Self {
        Self::new()
    }
}
