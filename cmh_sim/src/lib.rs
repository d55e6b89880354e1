//! CMH Simulation Harness
//!
//! Runs the probe protocol from `cmh_core` over named scenarios and over
//! seeded random wait-for graphs, and checks every verdict against an
//! oracle that sees the whole graph.
//!
//! - **Soundness**: any participant that declares deadlock must lie on a
//!   cycle of the final wait-for graph.
//! - **Completeness**: with the default protocol and every wait edge seeded,
//!   a cycle in the graph must end in a confirmed deadlock.
//!
//! # Usage
//!
//! ```ignore
//! use cmh_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let runner = ScenarioRunner::new(42, 8);
//! let result = runner.run(ScenarioId::Random).await?;
//! assert!(result.passed);
//! ```

mod error;
mod exporter;
mod loader;
mod oracle;
mod runner;
pub mod scenarios;

pub use error::SimError;
pub use exporter::RunExport;
pub use loader::{load_config, parse_config};
pub use oracle::Oracle;
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
