//! # Fleet Types
//!
//! Shared vocabulary of the cluster coordination layer.
//!
//! ## Contents
//!
//! - **Identity**: [`ActorKey`], [`AgentKey`], [`Endpoint`] string-backed keys
//! - **Data model**: [`ActorConfig`], [`DeployConfig`], [`RegisteredActor`], [`RegisteredAgent`]
//! - **Lifecycle protocol**: [`ActorLifecycleMessage`], [`AgentLifecycleMessage`] and
//!   the listener traits they dispatch to
//! - **Input protocol**: [`ActorInputMessage`], [`AgentInputMessage`]
//! - **Errors**: [`ValidationError`], [`DisconnectedError`], [`FailureCause`]
//!
//! ## Quick Start
//!
//! ```rust
//! use types::{ActorKey, AgentKey, ActorLifecycleMessage, ActorState};
//!
//! let created = ActorLifecycleMessage::created(ActorKey::new("a1"), AgentKey::new("agent-1"));
//! assert_eq!(created.state(), ActorState::Created);
//! ```

pub mod common;
pub mod model;
pub mod protocol;

pub use common::{
    require_key, ActorKey, AgentKey, DisconnectedError, Endpoint, FailureCause, ValidationError,
};
pub use model::{
    ActorConfig, ActorDeployInfo, ActorState, AgentRegistration, AgentState, AgentSystemInfo,
    DeployConfig, RegisteredActor, RegisteredAgent,
};
pub use protocol::{
    ActorInputMessage, ActorLifecycleMessage, ActorRegistryListener, AgentCommand,
    AgentInputMessage, AgentLifecycleMessage, AgentRegistryListener,
};
