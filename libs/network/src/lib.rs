//! # Fleet Network
//!
//! Cluster client abstraction and its two transports.
//!
//! - [`client`]: transport-agnostic roles ([`ActorSender`], [`AgentSender`],
//!   registry senders and listener starters) bundled as [`ClusterClient`],
//!   plus [`attach_registries`]
//! - [`bus`]: message-bus transport with per-actor queues, per-kind topics,
//!   an LRU producer cache and heartbeat failure detection
//! - [`group`]: group-communication transport with membership views and
//!   state transfer to joining members
//!
//! Both transports deliver every registry event to every live member,
//! preserve per-sender order and feed endpoint loss into the registries.

pub mod bus;
pub mod client;
pub mod codec;
pub mod error;
pub mod factory;
pub mod group;

pub use bus::{BusClusterClient, InMemoryBus, MessageBus};
pub use client::{
    attach_registries, ActorInputHandler, ActorRegistrySender, ActorSender, AgentInputHandler,
    AgentRegistrySender, AgentSender, ClusterClient, ConnectionState, InputListenerStarter,
    ListenerHandle, MembershipEvents, RegistryListenerStarter, StateTransfer,
};
pub use error::{Result, TransportError};
pub use factory::{create_client, unique_endpoint, Backends};
pub use group::{GroupClusterClient, GroupHub};
