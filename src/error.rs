//! Engine error types

use thiserror::Error;

use crate::types::{EventId, EventStatus};

/// Classified generation backend failure
///
/// Only this coarse classification is consumed; the backend's own error
/// detail is folded into `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("backend rate limited the request")]
    RateLimited,

    #[error("backend call timed out")]
    Timeout,

    #[error("backend rejected the credentials")]
    Unauthorized,

    #[error("backend failure: {0}")]
    Unknown(String),
}

/// Errors that can occur in the orchestration engine
#[derive(Debug, Error)]
pub enum ConclaveError {
    /// Bad input, surfaced immediately, never persisted as a failed event
    #[error("Validation error: {0}")]
    Validation(String),

    /// Programming error: a status transition that violates monotonicity
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: EventStatus, to: EventStatus },

    /// Event not found
    #[error("Event not found: {0}")]
    EventNotFound(EventId),

    /// Backend failure
    #[error("Backend failure: {0}")]
    Backend(#[from] BackendError),

    /// Fatal planning-phase failure
    #[error("Planning failure: {0}")]
    Planning(String),

    /// Every spawned agent failed
    #[error("All spawned agents failed")]
    AllAgentsFailed,

    /// No interrupt responder is installed
    #[error("No interrupt responder installed")]
    NoResponder,

    /// Name collision in the skill registry
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Storage-layer failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Delivery acknowledgment for an event with no ready result
    #[error("Delivery error: {0}")]
    Delivery(String),
}

impl From<std::io::Error> for ConclaveError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ConclaveError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
