//! Simulation configuration: participant descriptors, protocol policy and
//! the textual setup format.
//!
//! A configuration is a plain value (`Clone + Default + serde`) so it can be
//! built in code, parsed from CLI descriptors, or loaded from JSON.
//!
//! # Textual descriptors
//!
//! ```text
//! SITE:STATE:WAITLIST        e.g.  0:blocked:1,2   1:active:   2:b:0
//! ```
//!
//! The participant id is the descriptor's position. A malformed wait-list is
//! reported and treated as empty; malformed site or state fields reject the
//! descriptor.

use crate::error::{ConfigError, InputParseError};
use crate::types::{ParticipantId, SiteId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Static description of one participant at the start of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantDescriptor {
    /// Participant id (must equal its position in the descriptor list)
    pub id: ParticipantId,

    /// Owning site
    pub site: SiteId,

    /// Whether the participant starts out waiting
    #[serde(default)]
    pub initial_blocked: bool,

    /// Participants this one initially waits on
    #[serde(default)]
    pub initial_waiting_on: Vec<ParticipantId>,
}

impl ParticipantDescriptor {
    /// Creates a blocked participant waiting on `waits`.
    pub fn blocked(id: usize, site: u32, waits: &[usize]) -> Self {
        Self {
            id: ParticipantId(id),
            site: SiteId(site),
            initial_blocked: true,
            initial_waiting_on: waits.iter().copied().map(ParticipantId).collect(),
        }
    }

    /// Creates an active (runnable) participant with no wait edges.
    pub fn active(id: usize, site: u32) -> Self {
        Self {
            id: ParticipantId(id),
            site: SiteId(site),
            initial_blocked: false,
            initial_waiting_on: Vec::new(),
        }
    }

    /// Parses a `SITE:STATE:WAITLIST` descriptor for participant `id`.
    ///
    /// A malformed wait-list is logged and replaced by an empty list.
    pub fn parse(id: usize, text: &str) -> Result<Self, ConfigError> {
        let mut fields = text.splitn(3, ':');

        let site_field = fields.next().unwrap_or_default().trim();
        let site = site_field
            .parse::<u32>()
            .map_err(|_| ConfigError::invalid_descriptor(text, format!("site {:?} is not a number", site_field)))?;

        let state_field = fields.next().unwrap_or("active").trim();
        let initial_blocked = match state_field.to_lowercase().as_str() {
            "blocked" | "b" | "true" => true,
            "active" | "a" | "false" | "" => false,
            other => {
                return Err(ConfigError::invalid_descriptor(
                    text,
                    format!("state {:?} is not blocked/active", other),
                ))
            }
        };

        let initial_waiting_on = parse_wait_list_lenient(fields.next().unwrap_or_default());

        Ok(Self {
            id: ParticipantId(id),
            site: SiteId(site),
            initial_blocked,
            initial_waiting_on,
        })
    }
}

/// Parses a comma and/or space separated list of participant ids.
pub fn parse_wait_list(input: &str) -> Result<Vec<ParticipantId>, InputParseError> {
    input
        .replace(',', " ")
        .split_whitespace()
        .map(|token| {
            token.parse::<usize>().map(ParticipantId).map_err(|_| InputParseError {
                input: input.to_string(),
                token: token.to_string(),
            })
        })
        .collect()
}

/// Like [`parse_wait_list`], but reports a malformed list and returns it empty.
pub fn parse_wait_list_lenient(input: &str) -> Vec<ParticipantId> {
    parse_wait_list(input).unwrap_or_else(|e| {
        warn!("{}; treating the wait-list as empty", e);
        Vec::new()
    })
}

/// Whether probes may travel along edges inside a single site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SitePolicy {
    /// Any wait edge may carry a probe
    #[default]
    AnySite,

    /// Only edges whose endpoints live on different sites carry probes,
    /// both for initial sends and for propagation
    CrossSiteOnly,
}

impl SitePolicy {
    /// Returns true if an edge between these sites may carry a probe.
    pub fn permits(&self, from: SiteId, to: SiteId) -> bool {
        match self {
            SitePolicy::AnySite => true,
            SitePolicy::CrossSiteOnly => from != to,
        }
    }
}

impl std::str::FromStr for SitePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "any" | "any_site" | "anysite" => Ok(SitePolicy::AnySite),
            "cross" | "cross_site" | "cross_site_only" | "crosssiteonly" => Ok(SitePolicy::CrossSiteOnly),
            _ => Err(format!("Unknown site policy: {}", s)),
        }
    }
}

/// Reply guard evaluated before a received probe may confirm a dependency.
///
/// The guard asks "has a probe from this sender been recorded?". Where it is
/// evaluated relative to logging the current probe decides what it filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateGuard {
    /// Log the probe, then check: the probe just logged always satisfies
    /// the check, so the guard never rejects anything
    #[default]
    Permissive,

    /// Check, then log: only the first probe ever received from a given
    /// sender may confirm a dependency
    FirstPerSender,
}

impl std::str::FromStr for DuplicateGuard {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "permissive" | "log_then_check" => Ok(DuplicateGuard::Permissive),
            "first" | "first_per_sender" | "check_then_log" => Ok(DuplicateGuard::FirstPerSender),
            _ => Err(format!("Unknown duplicate guard: {}", s)),
        }
    }
}

/// Policy knobs for the probe protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub site_policy: SitePolicy,
    pub duplicate_guard: DuplicateGuard,
}

/// One initial probe, sent with `send_probe(origin, sender, receiver)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSeed {
    pub origin: ParticipantId,
    pub sender: ParticipantId,
    pub receiver: ParticipantId,
}

impl ProbeSeed {
    pub fn new(origin: usize, sender: usize, receiver: usize) -> Self {
        Self {
            origin: ParticipantId(origin),
            sender: ParticipantId(sender),
            receiver: ParticipantId(receiver),
        }
    }
}

/// How the coordinator starts the search.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeSeeding {
    /// Every participant probes every participant it waits on, as origin
    #[default]
    AllWaitEdges,

    /// Exactly the listed probes, in order
    Explicit(Vec<ProbeSeed>),
}

/// Configuration for a simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Participant table, in id order
    pub participants: Vec<ParticipantDescriptor>,

    /// Protocol policy
    pub protocol: ProtocolConfig,

    /// Initial probes
    pub seeding: ProbeSeeding,

    /// How long the coordinator waits for a confirmation
    pub detection_bound_ms: u64,

    /// How long the coordinator waits for the dispatcher to exit
    pub shutdown_bound_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            participants: Vec::new(),
            protocol: ProtocolConfig::default(),
            seeding: ProbeSeeding::AllWaitEdges,
            detection_bound_ms: 10_000,
            shutdown_bound_ms: 2_000,
        }
    }
}

impl SimulationConfig {
    /// Creates a configuration for the given participants.
    pub fn new(participants: Vec<ParticipantDescriptor>) -> Self {
        Self {
            participants,
            ..Default::default()
        }
    }

    /// Sets the protocol policy.
    pub fn with_protocol(mut self, protocol: ProtocolConfig) -> Self {
        self.protocol = protocol;
        self
    }

    /// Sets the site policy.
    pub fn with_site_policy(mut self, policy: SitePolicy) -> Self {
        self.protocol.site_policy = policy;
        self
    }

    /// Sets the duplicate guard.
    pub fn with_duplicate_guard(mut self, guard: DuplicateGuard) -> Self {
        self.protocol.duplicate_guard = guard;
        self
    }

    /// Seeds exactly the given probes instead of every wait edge.
    pub fn with_seeds(mut self, seeds: Vec<ProbeSeed>) -> Self {
        self.seeding = ProbeSeeding::Explicit(seeds);
        self
    }

    /// Sets the detection bound.
    pub fn with_detection_bound(mut self, bound: Duration) -> Self {
        self.detection_bound_ms = bound.as_millis() as u64;
        self
    }

    /// Parses positional `SITE:STATE:WAITLIST` descriptors.
    pub fn from_descriptors<S: AsRef<str>>(lines: &[S]) -> Result<Self, ConfigError> {
        let participants = lines
            .iter()
            .enumerate()
            .map(|(id, line)| ParticipantDescriptor::parse(id, line.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(participants))
    }

    pub fn detection_bound(&self) -> Duration {
        Duration::from_millis(self.detection_bound_ms)
    }

    pub fn shutdown_bound(&self) -> Duration {
        Duration::from_millis(self.shutdown_bound_ms)
    }
}
