//! Coordinator - builds a run, seeds the search and waits for a verdict.
//!
//! # Usage
//!
//! ```ignore
//! use cmh_core::{Coordinator, ParticipantDescriptor, SimulationConfig};
//!
//! let config = SimulationConfig::new(vec![
//!     ParticipantDescriptor::blocked(0, 0, &[1]),
//!     ParticipantDescriptor::blocked(1, 1, &[0]),
//! ]);
//!
//! let report = Coordinator::new(config)?.run().await?;
//! println!("{}", report.outcome);
//! ```

use crate::config::{ProbeSeeding, SimulationConfig};
use crate::dispatcher::Dispatcher;
use crate::error::{ConfigError, DispatchError};
use crate::simulation::Simulation;
use crate::snapshot::SystemSnapshot;
use crate::types::ParticipantId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// How a detection run ended.
///
/// Only `DeadlockConfirmed` is a verdict. The other two mean "no deadlock
/// observed within the bound", which does not prove there is none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// A participant received its own probe back
    DeadlockConfirmed { origin: ParticipantId },

    /// The channel drained with nobody deadlocked
    Quiescent,

    /// The bound elapsed with probes still in flight
    TimedOut,
}

impl Outcome {
    pub fn is_deadlock(&self) -> bool {
        matches!(self, Outcome::DeadlockConfirmed { .. })
    }

    /// The confirmed origin, if any.
    pub fn origin(&self) -> Option<ParticipantId> {
        match self {
            Outcome::DeadlockConfirmed { origin } => Some(*origin),
            _ => None,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::DeadlockConfirmed { origin } => write!(f, "deadlock confirmed, origin = {}", origin),
            Outcome::Quiescent => write!(f, "no deadlock observed within the bound (channel drained)"),
            Outcome::TimedOut => write!(f, "no deadlock observed within the bound (bound elapsed)"),
        }
    }
}

/// Result of one coordinated run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionReport {
    pub outcome: Outcome,

    /// Initial probes actually created
    pub seeded: usize,

    /// Probes delivered before the run ended
    pub deliveries: u64,

    /// Probes dropped by the stop signal
    pub discarded: usize,

    pub elapsed_ms: u64,

    /// Final per-participant state
    pub snapshot: SystemSnapshot,
}

/// Drives one detection run over a freshly built simulation.
pub struct Coordinator {
    simulation: Arc<Simulation>,
    config: SimulationConfig,
}

impl Coordinator {
    /// Validates the configuration and builds the registry.
    pub fn new(config: SimulationConfig) -> Result<Self, ConfigError> {
        let simulation = Simulation::shared(&config)?;
        Ok(Self { simulation, config })
    }

    pub fn simulation(&self) -> &Arc<Simulation> {
        &self.simulation
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Sends the initial probes. Returns how many were created.
    ///
    /// By default every participant probes every participant it waits on,
    /// with itself as origin.
    pub fn seed_probes(&self) -> usize {
        let sim = &self.simulation;
        match &self.config.seeding {
            ProbeSeeding::Explicit(seeds) => seeds
                .iter()
                .filter_map(|s| sim.send_probe(s.origin, s.sender, s.receiver))
                .count(),
            ProbeSeeding::AllWaitEdges => {
                let mut edges: Vec<(ParticipantId, ParticipantId)> = Vec::new();
                for id in sim.registry().ids() {
                    if let Some(p) = sim.registry().lock(id) {
                        edges.extend(p.waiting_on().map(|n| (id, n)));
                    }
                }

                edges
                    .into_iter()
                    .filter_map(|(p, n)| sim.send_probe(p, p, n))
                    .count()
            }
        }
    }

    /// Waits until a deadlock is declared, the channel drains, or `bound`
    /// elapses. Needs a running dispatcher to make progress.
    pub async fn await_outcome(&self, bound: Duration) -> Outcome {
        let deadline = Instant::now() + bound;
        let mut progress = self.simulation.subscribe_progress();

        loop {
            if let Some(origin) = self.simulation.first_deadlocked() {
                return Outcome::DeadlockConfirmed { origin };
            }
            if self.simulation.channel().is_quiescent() {
                return Outcome::Quiescent;
            }
            match tokio::time::timeout_at(deadline, progress.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => return Outcome::TimedOut,
            }
        }
    }

    /// Runs the full protocol on a dispatcher task.
    pub async fn run(&self) -> Result<DetectionReport, DispatchError> {
        let started = Instant::now();
        let dispatcher = Dispatcher::spawn(Arc::clone(&self.simulation));

        let seeded = self.seed_probes();
        info!(
            "Seeded {} probe(s) across {} participants",
            seeded,
            self.simulation.registry().len()
        );

        let outcome = self.await_outcome(self.config.detection_bound()).await;
        let stats = dispatcher.shutdown(self.config.shutdown_bound()).await?;
        info!("Run finished: {}", outcome);

        Ok(DetectionReport {
            outcome,
            seeded,
            deliveries: stats.delivered,
            discarded: stats.discarded,
            elapsed_ms: started.elapsed().as_millis() as u64,
            snapshot: self.simulation.snapshot(),
        })
    }

    /// Runs the protocol in the caller's context, one delivery at a time,
    /// stopping at the first deadlock, at quiescence, or after
    /// `max_deliveries`. Fully deterministic.
    pub fn run_deterministic(&self, max_deliveries: usize) -> DetectionReport {
        let started = std::time::Instant::now();
        let seeded = self.seed_probes();

        let mut delivered = 0usize;
        let outcome = loop {
            if let Some(origin) = self.simulation.first_deadlocked() {
                break Outcome::DeadlockConfirmed { origin };
            }
            if delivered >= max_deliveries {
                break Outcome::TimedOut;
            }
            if self.simulation.step().is_none() {
                if self.simulation.channel().is_quiescent() {
                    break Outcome::Quiescent;
                }
                warn!(
                    "{} probes pending but the queue is held elsewhere",
                    self.simulation.channel().pending()
                );
                break Outcome::TimedOut;
            }
            delivered += 1;
        };
        info!("Deterministic run finished after {} deliveries: {}", delivered, outcome);

        DetectionReport {
            outcome,
            seeded,
            deliveries: delivered as u64,
            discarded: 0,
            elapsed_ms: started.elapsed().as_millis() as u64,
            snapshot: self.simulation.snapshot(),
        }
    }
}
