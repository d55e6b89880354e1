//! Probe channel - the in-process stand-in for the network.

use crate::probe::Probe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// Unbounded FIFO of probes awaiting delivery.
///
/// Any context may push; a single consumer (the dispatcher, or a caller
/// stepping the simulation by hand) pops. Delivery order equals enqueue order.
///
/// `pending` counts probes that were pushed but whose delivery has not yet
/// completed, so a probe being handled still counts. It drops to zero only
/// when nothing is queued and no handler is running: quiescence.
#[derive(Debug)]
pub struct ProbeChannel {
    /// Producer side
    tx: mpsc::UnboundedSender<Probe>,

    /// Consumer side (behind tokio mutex for async)
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Probe>>,

    pending: AtomicUsize,
    enqueued: AtomicU64,
}

impl ProbeChannel {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            pending: AtomicUsize::new(0),
            enqueued: AtomicU64::new(0),
        }
    }

    /// Appends a probe to the tail of the queue.
    pub fn push(&self, probe: Probe) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        // The receiver lives as long as `self`, so the send cannot fail.
        let _ = self.tx.send(probe);
    }

    /// Pops the head probe without waiting.
    ///
    /// Returns `None` if the queue is empty or the dispatcher currently owns
    /// the consumer side.
    pub fn try_pop(&self) -> Option<Probe> {
        let mut rx = self.rx.try_lock().ok()?;
        rx.try_recv().ok()
    }

    /// Exclusive access to the consumer side, for the dispatcher task.
    pub(crate) async fn consumer(&self) -> tokio::sync::MutexGuard<'_, mpsc::UnboundedReceiver<Probe>> {
        self.rx.lock().await
    }

    /// Marks one popped probe as fully delivered.
    pub fn complete(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }

    /// Drops everything still queued through an already-held consumer.
    pub(crate) fn discard_queued(&self, rx: &mut mpsc::UnboundedReceiver<Probe>) -> usize {
        let mut discarded = 0;
        while rx.try_recv().is_ok() {
            self.complete();
            discarded += 1;
        }
        discarded
    }

    /// Probes pushed but not yet fully delivered.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Total probes ever pushed.
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn is_quiescent(&self) -> bool {
        self.pending() == 0
    }
}

impl Default for ProbeChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParticipantId;

    fn probe(origin: usize, sender: usize, receiver: usize) -> Probe {
        Probe::new(ParticipantId(origin), ParticipantId(sender), ParticipantId(receiver))
    }

    #[test]
    fn test_channel_fifo_order() {
        let channel = ProbeChannel::new();
        channel.push(probe(0, 0, 1));
        channel.push(probe(1, 1, 2));
        channel.push(probe(2, 2, 0));

        assert_eq!(channel.try_pop(), Some(probe(0, 0, 1)));
        assert_eq!(channel.try_pop(), Some(probe(1, 1, 2)));
        assert_eq!(channel.try_pop(), Some(probe(2, 2, 0)));
        assert_eq!(channel.try_pop(), None);
    }

    #[test]
    fn test_channel_pending_until_complete() {
        let channel = ProbeChannel::new();
        assert!(channel.is_quiescent());

        channel.push(probe(0, 0, 1));
        assert_eq!(channel.pending(), 1);

        // Popped but not yet handled: still pending
        channel.try_pop().unwrap();
        assert_eq!(channel.pending(), 1);

        channel.complete();
        assert!(channel.is_quiescent());
        assert_eq!(channel.enqueued(), 1);
    }

    #[tokio::test]
    async fn test_channel_discard_queued() {
        let channel = ProbeChannel::new();
        channel.push(probe(0, 0, 1));
        channel.push(probe(0, 1, 2));

        let mut rx = channel.consumer().await;
        assert_eq!(channel.discard_queued(&mut rx), 2);
        drop(rx);

        assert!(channel.is_quiescent());
        assert_eq!(channel.try_pop(), None);
    }
}
