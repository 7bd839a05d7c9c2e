//! Leader process wiring

use crate::error::Result;
use crate::handles::{Actors, AgentLauncher, Agents};
use crate::resource::ResourceManager;
use network::{attach_registries, ClusterClient};
use registry::{ActorRegistry, AgentRegistry};
use std::sync::Arc;
use tracing::info;

/// Registries, placement and handles around one connected cluster client
pub struct Leader {
    client: Arc<dyn ClusterClient>,
    actor_registry: Arc<ActorRegistry>,
    agent_registry: Arc<AgentRegistry>,
    resources: Arc<ResourceManager>,
}

impl Leader {
    /// Attach fresh registries to `client` and connect it
    pub async fn start(client: Arc<dyn ClusterClient>) -> Result<Self> {
        let actor_registry = ActorRegistry::new();
        let agent_registry = AgentRegistry::new();
        attach_registries(client.as_ref(), &actor_registry, &agent_registry)?;
        let resources = Arc::new(ResourceManager::new(
            Arc::clone(&actor_registry),
            Arc::clone(&agent_registry),
            Arc::clone(&client),
        )?);
        client.connect().await?;

        info!(endpoint = %client.endpoint(), "Leader started");
        Ok(Self {
            client,
            actor_registry,
            agent_registry,
            resources,
        })
    }

    pub fn client(&self) -> &Arc<dyn ClusterClient> {
        &self.client
    }

    pub fn actor_registry(&self) -> &Arc<ActorRegistry> {
        &self.actor_registry
    }

    pub fn agent_registry(&self) -> &Arc<AgentRegistry> {
        &self.agent_registry
    }

    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    pub fn actors(&self) -> Actors {
        Actors::new(
            Arc::clone(&self.actor_registry),
            Arc::clone(&self.resources),
            Arc::clone(&self.client),
        )
    }

    pub fn agents(&self, launcher: Arc<dyn AgentLauncher>) -> Agents {
        Agents::new(Arc::clone(&self.agent_registry), launcher)
    }

    /// Close every placed actor, then leave the cluster
    pub async fn close(&self) -> network::Result<()> {
        self.resources.close().await;
        self.client.close().await?;
        info!(endpoint = %self.client.endpoint(), "Leader closed");
        Ok(())
    }
}

impl std::fmt::Debug for Leader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Leader")
            .field("endpoint", self.client.endpoint())
            .field("actors", &self.actor_registry)
            .field("agents", &self.agent_registry)
            .field("resources", &self.resources)
            .finish()
    }
}
