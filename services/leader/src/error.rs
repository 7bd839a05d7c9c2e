//! Leader error types

use network::TransportError;
use registry::RegistryError;
use thiserror::Error;
use types::{ActorKey, FailureCause, ValidationError};

pub type Result<T> = std::result::Result<T, ResourceError>;

/// Placement and orchestration failures of the [`ResourceManager`](crate::ResourceManager)
#[derive(Debug, Error)]
pub enum ResourceError {
    /// No agent is registered to place the actor on
    #[error("no agents registered")]
    NoAgents,

    #[error("actor {key} is not tracked")]
    UnknownActor { key: ActorKey },

    #[error("actor {key} is already tracked")]
    DuplicateActor { key: ActorKey },

    #[error("invalid actor config: {0}")]
    Validation(#[from] ValidationError),

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("registry failure: {0}")]
    Registry(#[from] RegistryError),
}

/// Why a handle completion was rejected
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandleError {
    /// The entity closed before reaching the awaited stage
    #[error("{entity} signed off")]
    SignedOff { entity: String },

    /// The entity failed; carries the reported cause
    #[error("failed with {0}")]
    Failed(FailureCause),

    /// The remote spawn action itself failed
    #[error("launch failed: {message}")]
    Launch { message: String },

    #[error("completion abandoned")]
    Abandoned,
}

impl HandleError {
    pub fn signed_off(entity: impl std::fmt::Display) -> Self {
        Self::SignedOff {
            entity: entity.to_string(),
        }
    }

    pub fn cause(&self) -> Option<&FailureCause> {
        match self {
            Self::Failed(cause) => Some(cause),
            _ => None,
        }
    }
}
