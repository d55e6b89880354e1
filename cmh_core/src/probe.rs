//! The probe message exchanged during a deadlock search.

use crate::types::ParticipantId;
use serde::{Deserialize, Serialize};

/// A deadlock-search message travelling along one wait-for edge.
///
/// `origin` is the participant that started the search, `sender -> receiver`
/// is the edge the probe is currently crossing. Probes are plain values:
/// two probes with the same three fields are the same probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Probe {
    /// Participant whose deadlock search this probe belongs to
    pub origin: ParticipantId,

    /// Participant that holds the wait edge being probed
    pub sender: ParticipantId,

    /// Participant the sender is waiting on
    pub receiver: ParticipantId,
}

impl Probe {
    pub fn new(origin: ParticipantId, sender: ParticipantId, receiver: ParticipantId) -> Self {
        Self {
            origin,
            sender,
            receiver,
        }
    }

    /// Returns true if this probe has arrived back at its origin.
    pub fn is_homecoming(&self) -> bool {
        self.origin == self.receiver
    }
}

impl std::fmt::Display for Probe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Probe(origin={}, sender={}, receiver={})",
            self.origin, self.sender, self.receiver
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_value_equality() {
        let a = Probe::new(ParticipantId(0), ParticipantId(1), ParticipantId(2));
        let b = Probe::new(ParticipantId(0), ParticipantId(1), ParticipantId(2));
        let c = Probe::new(ParticipantId(1), ParticipantId(1), ParticipantId(2));

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_probe_homecoming() {
        assert!(Probe::new(ParticipantId(0), ParticipantId(2), ParticipantId(0)).is_homecoming());
        assert!(!Probe::new(ParticipantId(0), ParticipantId(0), ParticipantId(1)).is_homecoming());
    }

    #[test]
    fn test_probe_display() {
        let probe = Probe::new(ParticipantId(0), ParticipantId(1), ParticipantId(2));
        assert_eq!(probe.to_string(), "Probe(origin=P0, sender=P1, receiver=P2)");
    }
}
