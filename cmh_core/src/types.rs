//! Identifier types shared by every part of the protocol.

use serde::{Deserialize, Serialize};

/// Unique identifier for a participant (process) in a simulation run.
///
/// The id doubles as the participant's index into the registry and into
/// every other participant's `dependent` vector, so ids are dense and are
/// never reused within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub usize);

impl ParticipantId {
    /// Returns the registry index for this id.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl From<usize> for ParticipantId {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Identifier of the site (host) that owns a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(pub u32);

impl From<u32> for SiteId {
    fn from(site: u32) -> Self {
        Self(site)
    }
}

impl std::fmt::Display for SiteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "S{}", self.0)
    }
}
