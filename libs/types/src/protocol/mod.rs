//! Wire-level protocol: lifecycle events and input commands

pub mod input;
pub mod lifecycle;

pub use input::{ActorInputMessage, AgentCommand, AgentInputMessage};
pub use lifecycle::{
    ActorLifecycleMessage, ActorRegistryListener, AgentLifecycleMessage, AgentRegistryListener,
};
