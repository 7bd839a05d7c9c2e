//! Identity keys and the shared error taxonomy

pub mod errors;
pub mod identifiers;

pub use errors::{DisconnectedError, FailureCause, ValidationError};
pub use identifiers::{require_key, ActorKey, AgentKey, Endpoint};
