//! Error types for configuring and running a detection simulation.

use crate::types::ParticipantId;
use thiserror::Error;

/// A participant configuration that cannot be turned into a registry.
///
/// Raised before a run starts; the run is rejected as a whole.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A wait-list entry names a participant outside the registry
    #[error("Participant {descriptor} waits on unknown participant {target}")]
    UnknownParticipant {
        descriptor: ParticipantId,
        target: ParticipantId,
    },

    /// Descriptor ids must match their position (dense, ordered indexing)
    #[error("Descriptor at position {position} has id {id}; ids must be dense and in order")]
    NonContiguousId { position: usize, id: ParticipantId },

    /// A runtime wait edge names a waiter outside the registry
    #[error("Unknown participant {waiter} cannot wait")]
    UnknownWaiter { waiter: ParticipantId },

    /// No participants were configured
    #[error("Registry is empty")]
    EmptyRegistry,

    /// A textual descriptor field other than the wait-list is malformed
    #[error("Invalid participant descriptor {input:?}: {reason}")]
    InvalidDescriptor { input: String, reason: String },
}

impl ConfigError {
    /// Creates an invalid descriptor error.
    pub fn invalid_descriptor(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

/// A textual wait-list that could not be parsed.
///
/// Interactive setup reports this and continues with an empty wait-list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid wait-list {input:?}: {token:?} is not a participant id")]
pub struct InputParseError {
    /// The full wait-list text
    pub input: String,

    /// The offending token
    pub token: String,
}

/// Failures while stopping the dispatcher task.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The dispatcher did not exit within the bounded join
    #[error("Dispatcher did not exit within {0}ms")]
    Timeout(u64),

    /// The dispatcher task panicked or was cancelled
    #[error("Dispatcher task failed: {0}")]
    Join(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_messages() {
        let err = ConfigError::UnknownParticipant {
            descriptor: ParticipantId(1),
            target: ParticipantId(9),
        };
        assert_eq!(err.to_string(), "Participant P1 waits on unknown participant P9");

        let err = ConfigError::UnknownWaiter {
            waiter: ParticipantId(4),
        };
        assert_eq!(err.to_string(), "Unknown participant P4 cannot wait");

        let err = ConfigError::invalid_descriptor("x:blocked:1", "site is not a number");
        assert!(err.to_string().contains("site is not a number"));
    }

    #[test]
    fn test_input_parse_error_message() {
        let err = InputParseError {
            input: "1, x".to_string(),
            token: "x".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid wait-list \"1, x\": \"x\" is not a participant id");
    }
}
