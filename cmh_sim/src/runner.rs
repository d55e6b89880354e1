//! Scenario runner - executes detection scenarios and checks the verdicts.

use crate::error::SimError;
use crate::oracle::Oracle;
use crate::scenarios::{Expectation, ScenarioId};

use cmh_core::{
    Coordinator, DetectionReport, DuplicateGuard, Outcome, ProbeSeeding, ProtocolConfig,
    ProtocolEvent, SimulationConfig, SitePolicy, SystemSnapshot,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Protocol settings in force
    pub protocol: ProtocolConfig,

    /// Whether the run passed all assertions
    pub passed: bool,

    pub outcome: Outcome,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Cycle the oracle found in the final wait-for graph
    pub oracle_cycle: Option<Vec<usize>>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,

    pub snapshot: SystemSnapshot,

    pub events: Vec<ProtocolEvent>,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioMetrics {
    /// Initial probes created
    pub seeded: usize,

    /// Probes delivered
    pub deliveries: u64,

    /// Probes dropped at shutdown
    pub discarded: usize,

    /// Sum of every participant's sent counter
    pub probes_sent: u64,

    /// Sum of every participant's received counter
    pub probes_received: u64,

    pub dependencies_confirmed: usize,

    /// Participants that declared deadlock
    pub deadlocked: usize,

    pub elapsed_ms: u64,
}

impl ScenarioMetrics {
    fn collect(report: &DetectionReport, events: &[ProtocolEvent]) -> Self {
        Self {
            seeded: report.seeded,
            deliveries: report.deliveries,
            discarded: report.discarded,
            probes_sent: report.snapshot.total_sent(),
            probes_received: report.snapshot.total_received(),
            dependencies_confirmed: events
                .iter()
                .filter(|e| matches!(e, ProtocolEvent::DependencyConfirmed { .. }))
                .count(),
            deadlocked: report.snapshot.deadlocked().len(),
            elapsed_ms: report.elapsed_ms,
        }
    }
}

/// Runs detection scenarios.
pub struct ScenarioRunner {
    /// Seed for the random scenario
    seed: u64,

    /// Participants in the scalable scenarios
    size: usize,

    /// Detection bound handed to the coordinator
    bound: Duration,

    site_policy: Option<SitePolicy>,

    duplicate_guard: Option<DuplicateGuard>,

    /// Deliver in the caller's context instead of on a dispatcher task
    max_deliveries: Option<usize>,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, size: usize) -> Self {
        Self {
            seed,
            size,
            bound: Duration::from_secs(10),
            site_policy: None,
            duplicate_guard: None,
            max_deliveries: None,
        }
    }

    /// Sets the detection bound.
    pub fn with_bound(mut self, bound: Duration) -> Self {
        self.bound = bound;
        self
    }

    /// Overrides the scenario's site policy.
    pub fn with_site_policy(mut self, policy: SitePolicy) -> Self {
        self.site_policy = Some(policy);
        self
    }

    /// Overrides the scenario's duplicate guard.
    pub fn with_duplicate_guard(mut self, guard: DuplicateGuard) -> Self {
        self.duplicate_guard = Some(guard);
        self
    }

    /// Runs step by step with no dispatcher task, capped at `max_deliveries`.
    pub fn deterministic(mut self, max_deliveries: usize) -> Self {
        self.max_deliveries = Some(max_deliveries);
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Runs a scenario and returns the result.
    pub async fn run(&self, scenario: ScenarioId) -> Result<ScenarioResult, SimError> {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        debug!("  {}", scenario.description());

        let config = scenario.build(self.seed, self.size);
        let native = self.apply_overrides(config.protocol) == scenario.protocol();
        if !native {
            warn!("Protocol overridden; only soundness is checked for {}", scenario.name());
        }

        self.run_config(scenario.name(), config, scenario.expectation(), native)
            .await
    }

    /// Runs an arbitrary configuration, judged against the oracle.
    pub async fn run_custom(&self, label: &str, config: SimulationConfig) -> Result<ScenarioResult, SimError> {
        info!("Starting custom run: {} ({} participants)", label, config.participants.len());
        self.run_config(label, config, Expectation::AgreeWithOracle, true)
            .await
    }

    fn apply_overrides(&self, mut protocol: ProtocolConfig) -> ProtocolConfig {
        if let Some(policy) = self.site_policy {
            protocol.site_policy = policy;
        }
        if let Some(guard) = self.duplicate_guard {
            protocol.duplicate_guard = guard;
        }
        protocol
    }

    async fn run_config(
        &self,
        label: &str,
        config: SimulationConfig,
        expectation: Expectation,
        enforce_expectation: bool,
    ) -> Result<ScenarioResult, SimError> {
        let protocol = self.apply_overrides(config.protocol);
        let config = config
            .with_protocol(protocol)
            .with_detection_bound(self.bound);
        let all_edges_seeded = config.seeding == ProbeSeeding::AllWaitEdges;

        let coordinator = Coordinator::new(config)?;
        let report = match self.max_deliveries {
            Some(max) => coordinator.run_deterministic(max),
            None => coordinator.run().await?,
        };
        let events = coordinator.simulation().events();

        let oracle = Oracle::from_snapshot(&report.snapshot);
        let oracle_cycle = oracle.find_cycle();

        let mut failure_reason = check_soundness(&oracle, &report.snapshot);
        if failure_reason.is_none() && enforce_expectation {
            let liveness_applies = all_edges_seeded && protocol == ProtocolConfig::default();
            failure_reason = check_expectation(
                expectation,
                &report.outcome,
                oracle_cycle.as_deref(),
                liveness_applies,
            );
        }

        debug!(
            "  {} delivered, {} confirmed dependencies, oracle cycle: {:?}",
            report.deliveries,
            events
                .iter()
                .filter(|e| matches!(e, ProtocolEvent::DependencyConfirmed { .. }))
                .count(),
            oracle_cycle
        );

        Ok(ScenarioResult {
            scenario: label.to_string(),
            seed: self.seed,
            protocol,
            passed: failure_reason.is_none(),
            outcome: report.outcome,
            failure_reason,
            oracle_cycle,
            metrics: ScenarioMetrics::collect(&report, &events),
            snapshot: report.snapshot,
            events,
        })
    }
}

/// Every declared deadlock must sit on a real cycle.
fn check_soundness(oracle: &Oracle, snapshot: &SystemSnapshot) -> Option<String> {
    snapshot
        .deadlocked()
        .into_iter()
        .find(|id| !oracle.lies_on_cycle(id.index()))
        .map(|id| format!("false positive: {} declared deadlock but lies on no cycle", id))
}

fn check_expectation(
    expectation: Expectation,
    outcome: &Outcome,
    oracle_cycle: Option<&[usize]>,
    liveness_applies: bool,
) -> Option<String> {
    match expectation {
        Expectation::Deadlock if !outcome.is_deadlock() => {
            Some(format!("expected a confirmed deadlock, got: {}", outcome))
        }
        Expectation::NoDeadlock if outcome.is_deadlock() => {
            Some(format!("expected no deadlock, got: {}", outcome))
        }
        Expectation::AgreeWithOracle if liveness_applies => match oracle_cycle {
            Some(cycle) if !outcome.is_deadlock() => Some(format!(
                "oracle found cycle {:?} but the run ended with: {}",
                cycle, outcome
            )),
            None if outcome.is_deadlock() => {
                Some(format!("oracle found no cycle but the run ended with: {}", outcome))
            }
            _ => None,
        },
        _ => None,
    }
}
