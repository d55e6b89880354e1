//! Dispatcher - the long-lived task that delivers probes.

use crate::error::DispatchError;
use crate::simulation::Simulation;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Counters reported by a dispatcher when it exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Probes handed to their receiver
    pub delivered: u64,

    /// Probes still queued when the stop signal arrived
    pub discarded: usize,
}

/// Handle to a running dispatcher task.
///
/// The task owns the channel's consumer side for its whole life, delivers
/// probes one at a time in enqueue order, and sleeps on the channel when it
/// is empty. Raising the stop signal ends the loop; whatever is still queued
/// at that point is discarded.
pub struct Dispatcher {
    stop: watch::Sender<bool>,
    handle: JoinHandle<DispatchStats>,
}

impl Dispatcher {
    /// Spawns the dispatcher on the current tokio runtime.
    pub fn spawn(simulation: Arc<Simulation>) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(dispatch_loop(simulation, stop_rx));
        Self { stop, handle }
    }

    /// Raises the stop signal without waiting.
    pub fn stop(&self) {
        // Fails only if the task already exited.
        let _ = self.stop.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stops the dispatcher and waits at most `bound` for it to exit.
    pub async fn shutdown(mut self, bound: Duration) -> Result<DispatchStats, DispatchError> {
        self.stop();
        match tokio::time::timeout(bound, &mut self.handle).await {
            Ok(Ok(stats)) => Ok(stats),
            Ok(Err(e)) => Err(DispatchError::Join(e.to_string())),
            Err(_) => {
                warn!("Dispatcher still running after {:?}; aborting", bound);
                self.handle.abort();
                Err(DispatchError::Timeout(bound.as_millis() as u64))
            }
        }
    }
}

async fn dispatch_loop(simulation: Arc<Simulation>, mut stop: watch::Receiver<bool>) -> DispatchStats {
    let channel = simulation.channel();
    let mut rx = channel.consumer().await;
    let mut stats = DispatchStats::default();

    debug!("Dispatcher started");

    loop {
        tokio::select! {
            biased;

            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }

            next = rx.recv() => match next {
                Some(probe) => {
                    simulation.deliver(probe);
                    stats.delivered += 1;
                }
                None => break,
            },
        }
    }

    stats.discarded = channel.discard_queued(&mut rx);
    debug!(
        "Dispatcher stopped: {} delivered, {} discarded",
        stats.delivered, stats.discarded
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ParticipantDescriptor, ProtocolConfig};
    use crate::types::ParticipantId;

    fn ring() -> Arc<Simulation> {
        Arc::new(
            Simulation::new(
                &[
                    ParticipantDescriptor::blocked(0, 0, &[1]),
                    ParticipantDescriptor::blocked(1, 0, &[2]),
                    ParticipantDescriptor::blocked(2, 1, &[0]),
                ],
                ProtocolConfig::default(),
            )
            .unwrap(),
        )
    }

    async fn wait_until_quiescent(sim: &Simulation) {
        let mut progress = sim.subscribe_progress();
        while !sim.channel().is_quiescent() {
            progress.changed().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_dispatcher_delivers_until_quiescent() {
        let sim = ring();
        let dispatcher = Dispatcher::spawn(Arc::clone(&sim));

        sim.send_probe(ParticipantId(0), ParticipantId(0), ParticipantId(1));
        tokio::time::timeout(Duration::from_secs(5), wait_until_quiescent(&sim))
            .await
            .unwrap();

        assert_eq!(sim.first_deadlocked(), Some(ParticipantId(0)));

        let stats = dispatcher.shutdown(Duration::from_secs(2)).await.unwrap();
        assert_eq!(stats.delivered, sim.deliveries());
        assert_eq!(stats.discarded, 0);
    }

    #[tokio::test]
    async fn test_dispatcher_wakes_on_late_enqueue() {
        let sim = ring();
        let dispatcher = Dispatcher::spawn(Arc::clone(&sim));

        // Let the dispatcher park on an empty channel first
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!dispatcher.is_finished());

        sim.send_probe(ParticipantId(1), ParticipantId(1), ParticipantId(2));
        tokio::time::timeout(Duration::from_secs(5), wait_until_quiescent(&sim))
            .await
            .unwrap();

        assert!(sim.deliveries() > 0);
        dispatcher.shutdown(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatcher_stop_discards_queue() {
        let sim = ring();
        sim.send_probe(ParticipantId(0), ParticipantId(0), ParticipantId(1));
        sim.send_probe(ParticipantId(1), ParticipantId(1), ParticipantId(2));

        // Current-thread runtime: the task first runs after the stop signal
        let dispatcher = Dispatcher::spawn(Arc::clone(&sim));
        dispatcher.stop();

        let stats = dispatcher.shutdown(Duration::from_secs(2)).await.unwrap();

        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.discarded, 2);
        assert_eq!(sim.deliveries(), 0);
        assert!(sim.channel().is_quiescent());
    }

    #[tokio::test]
    async fn test_shutdown_times_out_when_task_is_stuck() {
        let sim = ring();
        sim.send_probe(ParticipantId(0), ParticipantId(0), ParticipantId(1));

        // The task parks on the consumer lock and never sees the stop signal
        let _held = sim.channel().consumer().await;
        let dispatcher = Dispatcher::spawn(Arc::clone(&sim));

        let result = dispatcher.shutdown(Duration::from_millis(50)).await;

        assert!(matches!(result, Err(DispatchError::Timeout(50))));
        assert_eq!(sim.deliveries(), 0);
        assert_eq!(sim.channel().pending(), 1);
    }
}
