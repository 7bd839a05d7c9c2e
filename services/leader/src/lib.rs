//! # Fleet Leader
//!
//! Leader-side orchestration on top of the cluster client:
//!
//! - [`ResourceManager`]: places actors on registered agents and routes
//!   their close requests
//! - [`Actors`] / [`Agents`]: create actors and agents and hand back
//!   handles whose [`Completion`]s resolve as registry events arrive
//! - [`Leader`]: wires registries, placement and handles around one client
//!
//! ```rust,no_run
//! use leader::Leader;
//! use network::{create_client, unique_endpoint, Backends};
//! use types::ActorConfig;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = cluster_config::ClusterConfig::default();
//! let client = create_client(&config, unique_endpoint("leader"), &Backends::in_memory())?;
//! let leader = Leader::start(client).await?;
//! let handle = leader.actors().create(ActorConfig::new("a1", "Echo")).await?;
//! handle.stages().created.wait().await?;
//! handle.bootstrap().await?;
//! leader.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod completion;
pub mod error;
pub mod handles;
pub mod leader;
pub mod resource;

pub use completion::Completion;
pub use error::{HandleError, ResourceError, Result};
pub use handles::{
    ActorHandle, ActorStages, Actors, AgentHandle, AgentLauncher, AgentStages, Agents,
};
pub use leader::Leader;
pub use resource::{choose_agent, ResourceManager};
