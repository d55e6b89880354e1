//! JSON exporter for finished runs.
//!
//! Writes the verdict, the final system state and the full protocol event
//! journal so a run can be replayed or inspected offline.

use crate::error::SimError;
use crate::runner::{ScenarioMetrics, ScenarioResult};
use cmh_core::{Outcome, ProtocolConfig, ProtocolEvent, SystemSnapshot};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Complete record of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    pub protocol: ProtocolConfig,

    pub outcome: Outcome,

    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Cycle found by the oracle, in wait order
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oracle_cycle: Option<Vec<usize>>,

    pub metrics: ScenarioMetrics,

    /// State at the end of the run
    pub snapshot: SystemSnapshot,

    /// Every protocol event, in the order it happened
    pub events: Vec<ProtocolEvent>,
}

impl RunExport {
    pub fn from_result(result: &ScenarioResult) -> Self {
        Self {
            scenario: result.scenario.clone(),
            seed: result.seed,
            protocol: result.protocol,
            outcome: result.outcome,
            passed: result.passed,
            failure_reason: result.failure_reason.clone(),
            oracle_cycle: result.oracle_cycle.clone(),
            metrics: result.metrics.clone(),
            snapshot: result.snapshot.clone(),
            events: result.events.clone(),
        }
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), SimError> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
