//! Registry - the fixed participant table of a simulation run.

use crate::config::ParticipantDescriptor;
use crate::error::ConfigError;
use crate::participant::{Participant, ParticipantSnapshot};
use crate::types::{ParticipantId, SiteId};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// The table of all participants, indexed by id.
///
/// Sized once at construction. Each participant sits behind its own lock;
/// sites never change during a run and are kept in a separate lock-free
/// table so the propagation scan can filter edges without extra locking.
///
/// Lock discipline: only the delivering context (a `receive_probe` call)
/// holds more than one participant lock at a time, always the receiver's
/// first.
#[derive(Debug)]
pub struct Registry {
    participants: Vec<Mutex<Participant>>,
    sites: Vec<SiteId>,
}

impl Registry {
    /// Builds the registry, rejecting descriptors that reference unknown ids.
    pub fn from_descriptors(descriptors: &[ParticipantDescriptor]) -> Result<Self, ConfigError> {
        if descriptors.is_empty() {
            return Err(ConfigError::EmptyRegistry);
        }

        let size = descriptors.len();
        for (position, descriptor) in descriptors.iter().enumerate() {
            if descriptor.id.index() != position {
                return Err(ConfigError::NonContiguousId {
                    position,
                    id: descriptor.id,
                });
            }
            if let Some(target) = descriptor.initial_waiting_on.iter().find(|t| t.index() >= size) {
                return Err(ConfigError::UnknownParticipant {
                    descriptor: descriptor.id,
                    target: *target,
                });
            }
        }

        Ok(Self {
            participants: descriptors
                .iter()
                .map(|d| Mutex::new(Participant::from_descriptor(d, size)))
                .collect(),
            sites: descriptors.iter().map(|d| d.site).collect(),
        })
    }

    /// Number of participants.
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        id.index() < self.participants.len()
    }

    /// All ids in registry order.
    pub fn ids(&self) -> impl Iterator<Item = ParticipantId> {
        (0..self.participants.len()).map(ParticipantId)
    }

    /// Site of a participant.
    pub fn site_of(&self, id: ParticipantId) -> Option<SiteId> {
        self.sites.get(id.index()).copied()
    }

    /// Locks a participant for reading or mutation.
    pub fn lock(&self, id: ParticipantId) -> Option<MutexGuard<'_, Participant>> {
        self.participants
            .get(id.index())
            .map(|p| p.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Snapshots every participant, one lock at a time.
    pub fn snapshot(&self) -> Vec<ParticipantSnapshot> {
        self.ids()
            .filter_map(|id| self.lock(id).map(|p| p.snapshot()))
            .collect()
    }
}
