//! Structured protocol events.
//!
//! Every observable step of a run is emitted as a `tracing` event and
//! appended to the simulation's [`EventJournal`], which tests and the
//! exporter read back.

use crate::probe::Probe;
use crate::types::ParticipantId;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// One observable step of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProtocolEvent {
    /// A probe was created and enqueued
    ProbeSent { probe: Probe },

    /// A probe was delivered to its receiver
    ProbeReceived { probe: Probe },

    /// `participant` recorded a new dependency on `origin`
    DependencyConfirmed {
        participant: ParticipantId,
        origin: ParticipantId,
    },

    /// `participant` received its own probe back
    DeadlockDeclared { participant: ParticipantId },
}

impl ProtocolEvent {
    fn trace(&self) {
        match self {
            ProtocolEvent::ProbeSent { probe } => debug!("Sent {}", probe),
            ProtocolEvent::ProbeReceived { probe } => debug!("Received {}", probe),
            ProtocolEvent::DependencyConfirmed { participant, origin } => {
                debug!("{} now depends on origin {}", participant, origin)
            }
            ProtocolEvent::DeadlockDeclared { participant } => {
                info!("DEADLOCK DETECTED: {} is in a deadlock state", participant)
            }
        }
    }
}

/// Append-only record of protocol events, in emission order.
#[derive(Debug, Default)]
pub struct EventJournal {
    events: Mutex<Vec<ProtocolEvent>>,
}

impl EventJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Traces and appends an event.
    pub fn record(&self, event: ProtocolEvent) {
        event.trace();
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// Copies out every event recorded so far.
    pub fn events(&self) -> Vec<ProtocolEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_journal_keeps_order() {
        let journal = EventJournal::new();
        let probe = Probe::new(ParticipantId(0), ParticipantId(0), ParticipantId(1));

        journal.record(ProtocolEvent::ProbeSent { probe });
        journal.record(ProtocolEvent::ProbeReceived { probe });

        assert_eq!(
            journal.events(),
            vec![ProtocolEvent::ProbeSent { probe }, ProtocolEvent::ProbeReceived { probe }]
        );
    }

    #[test]
    fn test_event_json_shape() {
        let event = ProtocolEvent::DeadlockDeclared {
            participant: ParticipantId(2),
        };
        let json = serde_json::to_value(event).unwrap();

        assert_eq!(json["event"], "deadlock_declared");
        assert_eq!(json["participant"], 2);
    }
}
