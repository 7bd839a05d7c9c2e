//! Error taxonomy shared by every crate of the coordination layer
//!
//! - [`ValidationError`]: an actor config was rejected before any registration
//! - [`DisconnectedError`]: synthetic failure injected when an owning endpoint is lost
//! - [`FailureCause`]: the serializable "throwable" carried by FAILED lifecycle events

use crate::common::identifiers::{ActorKey, AgentKey, Endpoint};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while validating keys and actor configuration
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Key is empty or whitespace-only
    #[error("{kind} key cannot be empty")]
    EmptyKey { kind: &'static str },

    /// Actor implementation class name is missing
    #[error("actor {key} has no implementation class")]
    EmptyClassName { key: String },

    /// No factory is registered for the requested class
    #[error("unknown actor class '{class_name}'")]
    UnknownActorClass { class_name: String },

    /// Forked deployment requested on an agent that cannot fork
    #[error("actor {key} requests a forked deployment but this agent has no forked actor manager")]
    ForkedUnsupported { key: String },

    /// Key is already hosted by the agent
    #[error("actor {key} already exists on this agent")]
    DuplicateActor { key: String },

    /// Custom validation failure with message
    #[error("Validation failed: {message}")]
    Custom { message: String },
}

impl ValidationError {
    /// Create a custom validation error
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom {
            message: message.into(),
        }
    }
}

/// Synthetic failure raised by a registry when the endpoint that owns an
/// entry leaves the cluster
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DisconnectedError {
    #[error("actor {key} lost: endpoint {endpoint} disconnected")]
    Actor { key: ActorKey, endpoint: Endpoint },

    #[error("agent {key} lost: endpoint {endpoint} disconnected")]
    Agent { key: AgentKey, endpoint: Endpoint },
}

/// Serializable description of why an actor or agent failed
///
/// Built from any `std::error::Error` on the failing side and carried across
/// the transport inside FAILED lifecycle messages.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct FailureCause {
    /// Coarse category (`validation`, `disconnected`, `actor`, ...)
    pub kind: String,
    /// Human readable message, including the source chain
    pub message: String,
}

impl FailureCause {
    pub const KIND_VALIDATION: &'static str = "validation";
    pub const KIND_DISCONNECTED: &'static str = "disconnected";
    pub const KIND_ACTOR: &'static str = "actor";
    pub const KIND_TRANSPORT: &'static str = "transport";

    /// Create a cause from its parts
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Capture an error and its source chain
    pub fn from_error(kind: impl Into<String>, error: &(dyn std::error::Error + 'static)) -> Self {
        let mut message = error.to_string();
        let mut source = error.source();
        while let Some(inner) = source {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            source = inner.source();
        }
        Self::new(kind, message)
    }

    /// Whether this cause was synthesized from an endpoint loss
    pub fn is_disconnect(&self) -> bool {
        self.kind == Self::KIND_DISCONNECTED
    }
}

impl From<&ValidationError> for FailureCause {
    fn from(err: &ValidationError) -> Self {
        FailureCause::from_error(FailureCause::KIND_VALIDATION, err)
    }
}

impl From<ValidationError> for FailureCause {
    fn from(err: ValidationError) -> Self {
        FailureCause::from(&err)
    }
}

impl From<DisconnectedError> for FailureCause {
    fn from(err: DisconnectedError) -> Self {
        FailureCause::from_error(FailureCause::KIND_DISCONNECTED, &err)
    }
}
