//! # Fleet Agent
//!
//! The per-host side of the cluster: an [`Agent`] receives CREATE_ACTOR and
//! CLOSE_ACTOR commands, hosts the resulting [`RuntimeActor`]s and publishes
//! their lifecycle on the actor-registry channel.
//!
//! ```rust,no_run
//! use agent::{ActorManagers, Agent, EmbeddedActorManager};
//! use network::{create_client, unique_endpoint, Backends};
//! use types::AgentKey;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = cluster_config::ClusterConfig::default();
//! let client = create_client(&config, unique_endpoint("agent"), &Backends::in_memory())?;
//! let managers = ActorManagers::embedded(EmbeddedActorManager::new());
//! let agent = Agent::start(AgentKey::new("agent-1"), client, managers).await?;
//! agent.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod actor;
pub mod agent;
pub mod error;
pub mod test_utils;

pub use actor::{ActorFactory, ActorManager, ActorManagers, EmbeddedActorManager, RuntimeActor};
pub use agent::Agent;
pub use error::{failure_cause, AgentError, Result};
