//! CMH Core - Chandy-Misra-Haas probe-based distributed deadlock detection
//!
//! Processes spread across sites wait on each other for resources. To find
//! out whether it is part of a wait-for cycle, a process sends *probes*
//! along its wait edges; every blocked process that learns of a new search
//! forwards it along the edges it is locally responsible for. A process that
//! receives its own probe back has proven a cycle and declares deadlock.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Simulation                          │
//! │  ┌───────────────────────┐      ┌─────────────────────────┐  │
//! │  │ Registry              │      │ ProbeChannel (FIFO)     │  │
//! │  │  Participant P0..Pn   │◄─────┤  pending probes         │  │
//! │  └───────────┬───────────┘      └────────────▲────────────┘  │
//! │              │ receive_probe / propagate     │ push          │
//! │              └───────────────────────────────┘               │
//! └──────────────────────────────▲───────────────────────────────┘
//!                                │ deliver one at a time
//!                         ┌──────┴──────┐      ┌─────────────┐
//!                         │ Dispatcher  │◄─────┤ Coordinator │
//!                         │ (tokio task)│ stop │ seed + wait │
//!                         └─────────────┘      └─────────────┘
//! ```

mod channel;
mod config;
mod coordinator;
mod dispatcher;
mod error;
mod events;
mod participant;
mod probe;
mod registry;
mod simulation;
mod snapshot;
mod types;

pub use channel::ProbeChannel;
pub use config::{
    parse_wait_list, parse_wait_list_lenient, DuplicateGuard, ParticipantDescriptor, ProbeSeed,
    ProbeSeeding, ProtocolConfig, SimulationConfig, SitePolicy,
};
pub use coordinator::{Coordinator, DetectionReport, Outcome};
pub use dispatcher::{DispatchStats, Dispatcher};
pub use error::{ConfigError, DispatchError, InputParseError};
pub use events::{EventJournal, ProtocolEvent};
pub use participant::{Admission, Participant, ParticipantSnapshot, ParticipantStatus};
pub use probe::Probe;
pub use registry::Registry;
pub use simulation::Simulation;
pub use snapshot::SystemSnapshot;
pub use types::{ParticipantId, SiteId};
