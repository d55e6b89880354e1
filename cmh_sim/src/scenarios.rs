//! Named detection scenarios.

use cmh_core::{ParticipantDescriptor, ProbeSeed, ProtocolConfig, SimulationConfig, SitePolicy};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// CMH-A: 0 -> 1 -> 2 -> 0, all on one site
    CycleSingleSite,

    /// CMH-B: the same cycle with P2 on a second site
    CycleCrossSite,

    /// CMH-C: 0 -> 1 -> 2, no closing edge
    NoCycle,

    /// CMH-D: 0 -> 1 <-> 2 over two sites, seeded from P0 and P1
    SeededPairs,

    /// CMH-E: ring with every participant on its own site, cross-site filter on
    DistributedRing,

    /// CMH-F: acyclic diamond with every edge seeded
    DiamondDag,

    /// CMH-G: a participant waiting on itself
    SelfWait,

    /// CMH-H: seeded random wait-for graph, judged by the oracle
    Random,
}

/// What a scenario must produce when run with its own protocol settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    /// Some participant on a cycle must confirm a deadlock
    Deadlock,

    /// Nobody may confirm a deadlock
    NoDeadlock,

    /// A deadlock is confirmed iff the oracle finds a cycle
    AgreeWithOracle,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::CycleSingleSite,
            ScenarioId::CycleCrossSite,
            ScenarioId::NoCycle,
            ScenarioId::SeededPairs,
            ScenarioId::DistributedRing,
            ScenarioId::DiamondDag,
            ScenarioId::SelfWait,
            ScenarioId::Random,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::CycleSingleSite => "cycle_single_site",
            ScenarioId::CycleCrossSite => "cycle_cross_site",
            ScenarioId::NoCycle => "no_cycle",
            ScenarioId::SeededPairs => "seeded_pairs",
            ScenarioId::DistributedRing => "distributed_ring",
            ScenarioId::DiamondDag => "diamond_dag",
            ScenarioId::SelfWait => "self_wait",
            ScenarioId::Random => "random",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::CycleSingleSite => "3-cycle on one site, probes seeded from P0 and P1",
            ScenarioId::CycleCrossSite => "3-cycle spanning two sites, probes seeded from P0 and P1",
            ScenarioId::NoCycle => "3-chain with no closing edge",
            ScenarioId::SeededPairs => "P0 waits on a P1/P2 cycle across two sites",
            ScenarioId::DistributedRing => "N-ring, one participant per site, cross-site edges only",
            ScenarioId::DiamondDag => "acyclic diamond, every wait edge seeded",
            ScenarioId::SelfWait => "P0 waits on itself, P1 waits on P0",
            ScenarioId::Random => "random wait-for graph from the seed, cross-checked by DFS",
        }
    }

    /// The verdict this scenario must reach.
    pub fn expectation(&self) -> Expectation {
        match self {
            ScenarioId::CycleSingleSite
            | ScenarioId::CycleCrossSite
            | ScenarioId::SeededPairs
            | ScenarioId::DistributedRing
            | ScenarioId::SelfWait => Expectation::Deadlock,
            ScenarioId::NoCycle | ScenarioId::DiamondDag => Expectation::NoDeadlock,
            ScenarioId::Random => Expectation::AgreeWithOracle,
        }
    }

    /// Builds the scenario's configuration.
    ///
    /// `size` scales the ring and random scenarios; `seed` only affects the
    /// random one.
    pub fn build(&self, seed: u64, size: usize) -> SimulationConfig {
        match self {
            ScenarioId::CycleSingleSite => triangle([0, 0, 0])
                .with_seeds(vec![ProbeSeed::new(0, 0, 1), ProbeSeed::new(1, 1, 2)]),
            ScenarioId::CycleCrossSite => triangle([0, 0, 1])
                .with_seeds(vec![ProbeSeed::new(0, 0, 1), ProbeSeed::new(1, 1, 2)]),
            ScenarioId::NoCycle => SimulationConfig::new(vec![
                ParticipantDescriptor::blocked(0, 0, &[1]),
                ParticipantDescriptor::blocked(1, 0, &[2]),
                ParticipantDescriptor::active(2, 0),
            ])
            .with_seeds(vec![ProbeSeed::new(0, 0, 1), ProbeSeed::new(1, 1, 2)]),
            ScenarioId::SeededPairs => SimulationConfig::new(vec![
                ParticipantDescriptor::blocked(0, 0, &[1]),
                ParticipantDescriptor::blocked(1, 0, &[2]),
                ParticipantDescriptor::blocked(2, 1, &[1]),
            ])
            .with_seeds(vec![
                ProbeSeed::new(0, 0, 1),
                ProbeSeed::new(0, 0, 2),
                ProbeSeed::new(1, 1, 0),
                ProbeSeed::new(1, 1, 2),
            ]),
            ScenarioId::DistributedRing => {
                let n = size.max(2);
                let participants = (0..n)
                    .map(|i| ParticipantDescriptor::blocked(i, i as u32, &[(i + 1) % n]))
                    .collect();
                SimulationConfig::new(participants).with_site_policy(SitePolicy::CrossSiteOnly)
            }
            ScenarioId::DiamondDag => SimulationConfig::new(vec![
                ParticipantDescriptor::blocked(0, 0, &[1, 2]),
                ParticipantDescriptor::blocked(1, 0, &[3]),
                ParticipantDescriptor::blocked(2, 1, &[3]),
                ParticipantDescriptor::blocked(3, 1, &[4]),
                ParticipantDescriptor::active(4, 2),
            ]),
            ScenarioId::SelfWait => SimulationConfig::new(vec![
                ParticipantDescriptor::blocked(0, 0, &[0]),
                ParticipantDescriptor::blocked(1, 1, &[0]),
            ]),
            ScenarioId::Random => random_graph(seed, size),
        }
    }

    /// Protocol settings the scenario is designed for.
    pub fn protocol(&self) -> ProtocolConfig {
        self.build(0, 3).protocol
    }
}

fn triangle(sites: [u32; 3]) -> SimulationConfig {
    SimulationConfig::new(vec![
        ParticipantDescriptor::blocked(0, sites[0], &[1]),
        ParticipantDescriptor::blocked(1, sites[1], &[2]),
        ParticipantDescriptor::blocked(2, sites[2], &[0]),
    ])
}

/// Random wait-for graph: about 1.5 out-edges per participant, a third as
/// many sites as participants, blocked iff waiting on someone.
pub fn random_graph(seed: u64, size: usize) -> SimulationConfig {
    let n = size.max(2);
    let sites = (n / 3).max(1) as u32;
    let edge_probability = (1.5 / n as f64).min(1.0);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let participants = (0..n)
        .map(|i| {
            let site = rng.gen_range(0..sites);
            let waits: Vec<usize> = (0..n)
                .filter(|&j| j != i && rng.gen_bool(edge_probability))
                .collect();
            if waits.is_empty() {
                ParticipantDescriptor::active(i, site)
            } else {
                ParticipantDescriptor::blocked(i, site, &waits)
            }
        })
        .collect();

    SimulationConfig::new(participants)
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cycle_single_site" | "a" | "cmh-a" => Ok(ScenarioId::CycleSingleSite),
            "cycle_cross_site" | "b" | "cmh-b" => Ok(ScenarioId::CycleCrossSite),
            "no_cycle" | "c" | "cmh-c" => Ok(ScenarioId::NoCycle),
            "seeded_pairs" | "cmh-d" => Ok(ScenarioId::SeededPairs),
            "distributed_ring" | "ring" | "cmh-e" => Ok(ScenarioId::DistributedRing),
            "diamond_dag" | "diamond" | "cmh-f" => Ok(ScenarioId::DiamondDag),
            "self_wait" | "cmh-g" => Ok(ScenarioId::SelfWait),
            "random" | "cmh-h" => Ok(ScenarioId::Random),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
