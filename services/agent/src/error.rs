//! Agent error types

use network::TransportError;
use thiserror::Error;
use types::{AgentKey, FailureCause, ValidationError};

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Sending or listening through the cluster client failed
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("invalid agent configuration: {0}")]
    Validation(#[from] ValidationError),

    /// The agent no longer accepts requests
    #[error("agent {agent} is closed")]
    Closed { agent: AgentKey },
}

/// Describe a user actor error for a FAILED event
///
/// Validation errors keep their kind so the leader can tell a bad config
/// from an actor that failed at runtime.
pub fn failure_cause(error: &anyhow::Error) -> FailureCause {
    let kind = if error.downcast_ref::<ValidationError>().is_some() {
        FailureCause::KIND_VALIDATION
    } else {
        FailureCause::KIND_ACTOR
    };
    FailureCause::from_error(kind, error.as_ref())
}
