//! On-demand view of the whole system.

use crate::participant::{ParticipantSnapshot, ParticipantStatus};
use crate::types::ParticipantId;
use serde::{Deserialize, Serialize};

/// Every participant's state plus channel counters, taken one participant
/// at a time (not a cross-participant atomic cut).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub participants: Vec<ParticipantSnapshot>,

    /// Probes enqueued but not yet fully delivered
    pub pending_probes: usize,

    /// Probes delivered so far
    pub deliveries: u64,
}

impl SystemSnapshot {
    /// Wait-for graph as an adjacency list indexed by participant id.
    pub fn wait_edges(&self) -> Vec<Vec<usize>> {
        self.participants
            .iter()
            .map(|p| p.waiting_on.iter().map(|id| id.index()).collect())
            .collect()
    }

    /// Participants in the DEADLOCKED state, in id order.
    pub fn deadlocked(&self) -> Vec<ParticipantId> {
        self.participants
            .iter()
            .filter(|p| p.status == ParticipantStatus::Deadlocked)
            .map(|p| p.id)
            .collect()
    }

    pub fn participant(&self, id: ParticipantId) -> Option<&ParticipantSnapshot> {
        self.participants.get(id.index())
    }

    pub fn total_sent(&self) -> u64 {
        self.participants.iter().map(|p| p.sent_count).sum()
    }

    pub fn total_received(&self) -> u64 {
        self.participants.iter().map(|p| p.received_count).sum()
    }
}

impl std::fmt::Display for SystemSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== SYSTEM STATE ===")?;
        for participant in &self.participants {
            writeln!(f, "{}", participant)?;
        }
        writeln!(f, "Pending probes: {}, delivered: {}", self.pending_probes, self.deliveries)?;
        write!(f, "====================")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SiteId;

    fn entry(id: usize, status: ParticipantStatus, waits: &[usize]) -> ParticipantSnapshot {
        ParticipantSnapshot {
            id: ParticipantId(id),
            site: SiteId(0),
            status,
            waiting_on: waits.iter().copied().map(ParticipantId).collect(),
            dependent_ids: Vec::new(),
            sent_count: 1,
            received_count: 2,
        }
    }

    #[test]
    fn test_snapshot_wait_edges_and_deadlocked() {
        let snapshot = SystemSnapshot {
            participants: vec![
                entry(0, ParticipantStatus::Deadlocked, &[1]),
                entry(1, ParticipantStatus::Blocked, &[0, 2]),
                entry(2, ParticipantStatus::Active, &[]),
            ],
            pending_probes: 0,
            deliveries: 6,
        };

        assert_eq!(snapshot.wait_edges(), vec![vec![1], vec![0, 2], vec![]]);
        assert_eq!(snapshot.deadlocked(), vec![ParticipantId(0)]);
        assert_eq!(snapshot.total_sent(), 3);
        assert_eq!(snapshot.total_received(), 6);

        let text = snapshot.to_string();
        assert!(text.starts_with("=== SYSTEM STATE ==="));
        assert!(text.contains("Process P0 (Site S0): DEADLOCKED"));
    }
}
