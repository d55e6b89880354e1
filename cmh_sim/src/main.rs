//! CMH Deadlock Detection Simulator CLI
//!
//! Run probe-based deadlock detection over named scenarios, a JSON
//! configuration, or participants given on the command line.

use clap::Parser;
use cmh_core::{DuplicateGuard, SimulationConfig, SitePolicy};
use cmh_sim::scenarios::ScenarioId;
use cmh_sim::{load_config, RunExport, ScenarioResult, ScenarioRunner, SimError};
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// CMH deadlock detection simulator
#[derive(Parser, Debug)]
#[command(name = "cmh-sim")]
#[command(about = "Simulate Chandy-Misra-Haas probe-based deadlock detection", long_about = None)]
struct Args {
    /// Master seed for the random scenario (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Number of consecutive seeds to run
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Scenario to run (cycle_single_site, cycle_cross_site, no_cycle,
    /// seeded_pairs, distributed_ring, diamond_dag, self_wait, random, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Participants in the ring and random scenarios
    #[arg(short = 'n', long, default_value = "8")]
    participants: usize,

    /// Detection bound in milliseconds
    #[arg(short, long, default_value = "10000")]
    bound_ms: u64,

    /// Site policy override (any_site, cross_site_only)
    #[arg(long)]
    site_policy: Option<SitePolicy>,

    /// Duplicate guard override (permissive, first_per_sender)
    #[arg(long)]
    guard: Option<DuplicateGuard>,

    /// Deliver in-line with at most this many deliveries, no dispatcher task
    #[arg(long)]
    deterministic: Option<usize>,

    /// Run the JSON configuration at this path instead of a scenario
    #[arg(short, long, conflicts_with = "participant")]
    config: Option<String>,

    /// Participant as SITE:STATE:WAITLIST, e.g. "0:blocked:1,2"; repeat in id order
    #[arg(short, long)]
    participant: Vec<String>,

    /// Print the final system state
    #[arg(long)]
    dump_state: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export the run (state and event journal) to a JSON file
    #[arg(long)]
    export: Option<String>,
}

enum Plan {
    Scenarios(Vec<ScenarioId>),
    Custom(String, SimulationConfig),
}

fn plan(args: &Args) -> Result<Plan, SimError> {
    if let Some(path) = &args.config {
        return Ok(Plan::Custom(path.clone(), load_config(path)?));
    }
    if !args.participant.is_empty() {
        let config = SimulationConfig::from_descriptors(&args.participant)?;
        return Ok(Plan::Custom("command_line".to_string(), config));
    }

    if args.scenario == "all" {
        return Ok(Plan::Scenarios(ScenarioId::all()));
    }
    let scenario = args.scenario.parse().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        eprintln!(
            "Available scenarios: {}, all",
            ScenarioId::all().iter().map(|s| s.name()).collect::<Vec<_>>().join(", ")
        );
        std::process::exit(1);
    });
    Ok(Plan::Scenarios(vec![scenario]))
}

async fn run_all(args: &Args, plan: &Plan, base_seed: u64) -> Result<Vec<ScenarioResult>, SimError> {
    let mut results = Vec::new();

    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);

        let mut runner = ScenarioRunner::new(seed, args.participants)
            .with_bound(Duration::from_millis(args.bound_ms));
        if let Some(policy) = args.site_policy {
            runner = runner.with_site_policy(policy);
        }
        if let Some(guard) = args.guard {
            runner = runner.with_duplicate_guard(guard);
        }
        if let Some(max) = args.deterministic {
            runner = runner.deterministic(max);
        }

        match plan {
            Plan::Scenarios(scenarios) => {
                for scenario in scenarios {
                    results.push(runner.run(*scenario).await?);
                }
            }
            Plan::Custom(label, config) => {
                results.push(runner.run_custom(label, config.clone()).await?);
            }
        }
    }

    Ok(results)
}

fn report(args: &Args, results: &[ScenarioResult]) {
    let failed_count = results.iter().filter(|r| !r.passed).count();
    let total = results.len();

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed_count,
            "failed": failed_count,
            "results": results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario,
                    "seed": r.seed,
                    "passed": r.passed,
                    "outcome": r.outcome,
                    "oracle_cycle": r.oracle_cycle,
                    "metrics": r.metrics,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Failed to render summary: {}", e),
        }
        return;
    }

    for r in results {
        if r.passed {
            info!("✓ {} (seed={}) PASSED: {}", r.scenario, r.seed, r.outcome);
        } else {
            error!(
                "✗ {} (seed={}) FAILED: {}",
                r.scenario,
                r.seed,
                r.failure_reason.as_deref().unwrap_or("unknown")
            );
        }
        info!(
            "  {} seeded, {} delivered, {} sent, {} received, {} deadlocked",
            r.metrics.seeded,
            r.metrics.deliveries,
            r.metrics.probes_sent,
            r.metrics.probes_received,
            r.metrics.deadlocked
        );
        if args.dump_state {
            println!("{}", r.snapshot);
        }
    }

    info!("");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if failed_count == 0 {
        info!("✅ All {} run(s) passed!", total);
    } else {
        error!("❌ {}/{} run(s) failed!", failed_count, total);
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    if !args.json {
        info!("CMH Deadlock Detection Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    let result = async {
        let plan = plan(&args)?;
        let results = run_all(&args, &plan, base_seed).await?;

        if let Some(path) = &args.export {
            if results.len() != 1 {
                return Err(SimError::ExportNeedsSingleRun(results.len()));
            }
            RunExport::from_result(&results[0]).write_to_file(path)?;
            info!("Exported run to {}", path);
        }
        Ok::<_, SimError>(results)
    }
    .await;

    match result {
        Ok(results) => {
            report(&args, &results);
            if results.iter().any(|r| !r.passed) {
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    }
}
