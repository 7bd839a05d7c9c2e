//! # Fleet Registry
//!
//! Replicated, listener-observable views of the live actors and agents in the
//! cluster. Each process keeps its own [`ActorRegistry`] and [`AgentRegistry`];
//! transports keep them consistent by delivering every lifecycle event to
//! every process through the registry's cluster listener.
//!
//! ## Mutation paths
//!
//! - [`ActorClusterListener::deliver`] / [`AgentClusterListener::deliver`]:
//!   transport delivery of a lifecycle message from a given endpoint
//! - `on_endpoint_disconnected`: membership loss, reported as FAILED
//! - `reset_state`: bulk replacement from a state transfer, silent
//!
//! FAILED and CLOSED events for keys a registry never held change nothing;
//! they only reach listeners registered through `add_discard_listener`.
//!
//! ## Example
//!
//! ```rust
//! use registry::ActorRegistry;
//! use types::{ActorKey, ActorLifecycleMessage, AgentKey, Endpoint};
//!
//! let registry = ActorRegistry::new();
//! let cluster = registry.create_cluster_listener();
//! cluster.deliver(
//!     &Endpoint::new("node-a"),
//!     &ActorLifecycleMessage::created(ActorKey::new("a1"), AgentKey::new("agent-1")),
//! );
//! assert_eq!(registry.len(), 1);
//! ```

pub mod actor;
pub mod agent;
pub mod error;
pub mod listeners;
pub mod sync;
pub mod test_utils;
mod view;

pub use actor::{ActorClusterListener, ActorRegistry};
pub use agent::{AgentClusterListener, AgentRegistry};
pub use error::{RegistryError, Result};
pub use sync::{StateHolder, ViewEvent, ViewListener};
