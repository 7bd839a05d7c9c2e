//! # Resource Manager
//!
//! Leader-side placement. Actors go to a random registered agent, or to a
//! random agent on one of the actor's preferred hosts when any is
//! registered. The manager remembers which agent each actor was sent to so
//! it can route the close request.
//!
//! An actor stops being tracked when its close is requested, or when the
//! actor registry reports it FAILED or CLOSED, including failures for actors
//! that never reached CREATED and actors lost with their agent. Its key can
//! then be placed again.

use crate::error::{ResourceError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use network::ClusterClient;
use rand::seq::SliceRandom;
use rand::Rng;
use registry::{ActorRegistry, AgentRegistry};
use std::sync::Arc;
use tracing::{debug, info, warn};
use types::{
    ActorConfig, ActorDeployInfo, ActorKey, ActorRegistryListener, AgentInputMessage, AgentKey,
    FailureCause, RegisteredAgent,
};

/// Pick the agent for an actor
///
/// Agents on a preferred host win; without any, every agent is a candidate.
/// Returns `None` only when `agents` is empty.
pub fn choose_agent<'a, R: Rng + ?Sized>(
    agents: &'a [RegisteredAgent],
    preferred_hosts: &[String],
    rng: &mut R,
) -> Option<&'a RegisteredAgent> {
    if !preferred_hosts.is_empty() {
        let preferred: Vec<&RegisteredAgent> = agents
            .iter()
            .filter(|agent| preferred_hosts.iter().any(|host| host == agent.host()))
            .collect();
        if let Some(agent) = preferred.choose(rng) {
            return Some(*agent);
        }
    }
    agents.choose(rng)
}

type Placements = Arc<DashMap<ActorKey, AgentKey>>;

/// Drops placements once the registry reports the actor gone
struct Forget {
    tracked: Placements,
}

impl Forget {
    fn forget(&self, actor: &ActorKey, outcome: &str) {
        if let Some((_, agent)) = self.tracked.remove(actor) {
            debug!(actor = %actor, agent = %agent, outcome, "Placement released");
        }
    }
}

impl ActorRegistryListener for Forget {
    fn on_actor_created(&self, _actor: &ActorKey, _agent: &AgentKey) {}

    fn on_actor_initialized(&self, _actor: &ActorKey, _deploy_info: &ActorDeployInfo) {}

    fn on_actor_failed(&self, actor: &ActorKey, _cause: &FailureCause) {
        self.forget(actor, "failed");
    }

    fn on_actor_closed(&self, actor: &ActorKey) {
        self.forget(actor, "closed");
    }
}

pub struct ResourceManager {
    actors: Arc<ActorRegistry>,
    agents: Arc<AgentRegistry>,
    client: Arc<dyn ClusterClient>,
    tracked: Placements,
    forget: Arc<dyn ActorRegistryListener>,
}

impl ResourceManager {
    /// Listens on `actors` for the whole lifetime of the manager
    pub fn new(
        actors: Arc<ActorRegistry>,
        agents: Arc<AgentRegistry>,
        client: Arc<dyn ClusterClient>,
    ) -> Result<Self> {
        let tracked: Placements = Arc::new(DashMap::new());
        let forget: Arc<dyn ActorRegistryListener> = Arc::new(Forget {
            tracked: Arc::clone(&tracked),
        });
        actors.add_listener(Arc::clone(&forget))?;
        if let Err(e) = actors.add_discard_listener(Arc::clone(&forget)) {
            actors.remove_listener(&forget);
            return Err(e.into());
        }
        Ok(Self {
            actors,
            agents,
            client,
            tracked,
            forget,
        })
    }

    /// Place an actor and ask its agent to create it
    ///
    /// Returns the chosen agent. The mapping is recorded before the request
    /// is sent and dropped again if sending fails.
    pub async fn create_actor(&self, config: ActorConfig) -> Result<AgentKey> {
        config.validate()?;
        let key = config.key.clone();
        let agents = self.agents.all();
        let agent = choose_agent(
            &agents,
            &config.deploy.preferred_hosts,
            &mut rand::thread_rng(),
        )
        .map(|agent| agent.key.clone())
        .ok_or(ResourceError::NoAgents)?;

        match self.tracked.entry(key.clone()) {
            Entry::Occupied(_) => return Err(ResourceError::DuplicateActor { key }),
            Entry::Vacant(slot) => {
                slot.insert(agent.clone());
            }
        }

        let request = AgentInputMessage::create_actor(agent.clone(), config);
        if let Err(e) = self.client.send_to_agent(request).await {
            self.tracked.remove(&key);
            return Err(e.into());
        }
        info!(actor = %key, agent = %agent, candidates = agents.len(), "Actor placed");
        Ok(agent)
    }

    /// Ask the owning agent to close `key` and stop tracking it
    pub async fn close_actor(&self, key: &ActorKey) -> Result<()> {
        let agent = self
            .agent_of(key)
            .ok_or_else(|| ResourceError::UnknownActor { key: key.clone() })?;
        self.client
            .send_to_agent(AgentInputMessage::close_actor(agent.clone(), key.clone()))
            .await?;
        self.tracked.remove(key);
        debug!(actor = %key, agent = %agent, "Actor close requested");
        Ok(())
    }

    /// Close every tracked actor, continuing past individual failures
    pub async fn close(&self) {
        let keys = self.tracked_actors();
        info!(actors = keys.len(), "Closing tracked actors");
        for key in keys {
            if let Err(e) = self.close_actor(&key).await {
                warn!(actor = %key, error = %e, "Actor close request failed");
            }
        }
    }

    pub fn agent_of(&self, key: &ActorKey) -> Option<AgentKey> {
        self.tracked.get(key).map(|entry| entry.value().clone())
    }

    /// Tracked actor keys, sorted
    pub fn tracked_actors(&self) -> Vec<ActorKey> {
        let mut keys: Vec<ActorKey> = self.tracked.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        self.actors.remove_listener(&self.forget);
        self.actors.remove_discard_listener(&self.forget);
    }
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager")
            .field("agents", &self.agents.len())
            .field("tracked", &self.tracked.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent::test_utils::RecordingClient;
    use types::{
        ActorLifecycleMessage, AgentCommand, AgentLifecycleMessage, AgentRegistration,
        AgentSystemInfo, DeployConfig, Endpoint,
    };

    fn registry_with(hosts: &[(&str, &str)]) -> Arc<AgentRegistry> {
        let registry = AgentRegistry::new();
        let listener = registry.create_cluster_listener();
        for (key, host) in hosts {
            listener.deliver(
                &Endpoint::new(format!("ep-{key}")),
                &AgentLifecycleMessage::created(
                    AgentKey::new(*key),
                    AgentRegistration::new(AgentSystemInfo::current().with_host(*host)),
                ),
            );
        }
        registry
    }

    fn manager(hosts: &[(&str, &str)]) -> (ResourceManager, Arc<RecordingClient>) {
        let (resources, _actors, client) = manager_with_actors(hosts);
        (resources, client)
    }

    fn manager_with_actors(
        hosts: &[(&str, &str)],
    ) -> (ResourceManager, Arc<ActorRegistry>, Arc<RecordingClient>) {
        let client = RecordingClient::new("leader");
        let actors = ActorRegistry::new();
        let resources =
            ResourceManager::new(actors.clone(), registry_with(hosts), client.clone()).unwrap();
        (resources, actors, client)
    }

    #[tokio::test]
    async fn test_no_agents_is_a_placement_error() {
        let (resources, client) = manager(&[]);
        let err = resources
            .create_actor(ActorConfig::new("a1", "Echo"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResourceError::NoAgents));
        assert!(resources.tracked_actors().is_empty());
        assert!(client.agent_inputs().is_empty());
    }

    #[tokio::test]
    async fn test_preferred_host_wins() {
        let (resources, client) = manager(&[("ag-1", "h1"), ("ag-2", "h2"), ("ag-3", "h3")]);
        for n in 0..20 {
            let config = ActorConfig::new(format!("a{n}"), "Echo")
                .with_deploy(DeployConfig::embedded().with_preferred_hosts(["h2", "elsewhere"]));
            assert_eq!(resources.create_actor(config).await.unwrap().as_str(), "ag-2");
        }
        assert_eq!(client.agent_inputs().len(), 20);
        assert!(client.agent_inputs().iter().all(|m| {
            matches!(&m.command, AgentCommand::CreateActor { .. }) && m.target.as_str() == "ag-2"
        }));
    }

    #[tokio::test]
    async fn test_unmatched_preference_falls_back_to_any_agent() {
        let (resources, _client) = manager(&[("ag-1", "h1"), ("ag-2", "h2")]);
        let config = ActorConfig::new("a1", "Echo")
            .with_deploy(DeployConfig::embedded().with_preferred_hosts(["nowhere"]));
        let agent = resources.create_actor(config).await.unwrap();
        assert!(["ag-1", "ag-2"].contains(&agent.as_str()));
        assert_eq!(resources.agent_of(&ActorKey::new("a1")), Some(agent));
    }

    #[tokio::test]
    async fn test_invalid_and_duplicate_configs_are_rejected() {
        let (resources, client) = manager(&[("ag-1", "h1")]);
        assert!(matches!(
            resources.create_actor(ActorConfig::new("a1", "")).await,
            Err(ResourceError::Validation(_))
        ));
        resources
            .create_actor(ActorConfig::new("a1", "Echo"))
            .await
            .unwrap();
        assert!(matches!(
            resources.create_actor(ActorConfig::new("a1", "Echo")).await,
            Err(ResourceError::DuplicateActor { .. })
        ));
        assert_eq!(client.agent_inputs().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_send_forgets_the_placement() {
        let (resources, client) = manager(&[("ag-1", "h1")]);
        client.fail_sends(true);
        assert!(matches!(
            resources.create_actor(ActorConfig::new("a1", "Echo")).await,
            Err(ResourceError::Transport(_))
        ));
        assert!(resources.agent_of(&ActorKey::new("a1")).is_none());
    }

    #[tokio::test]
    async fn test_close_unknown_actor_leaves_map_untouched() {
        let (resources, client) = manager(&[("ag-1", "h1")]);
        resources
            .create_actor(ActorConfig::new("a1", "Echo"))
            .await
            .unwrap();
        assert!(matches!(
            resources.close_actor(&ActorKey::new("ghost")).await,
            Err(ResourceError::UnknownActor { .. })
        ));
        assert_eq!(resources.tracked_actors(), vec![ActorKey::new("a1")]);
        assert_eq!(client.agent_inputs().len(), 1);
    }

    #[tokio::test]
    async fn test_close_routes_to_owner_and_forgets() {
        let (resources, client) = manager(&[("ag-1", "h1")]);
        for key in ["a1", "a2"] {
            resources
                .create_actor(ActorConfig::new(key, "Echo"))
                .await
                .unwrap();
        }
        resources.close().await;
        assert!(resources.tracked_actors().is_empty());

        let closes: Vec<_> = client
            .agent_inputs()
            .into_iter()
            .filter_map(|m| match m.command {
                AgentCommand::CloseActor { actor } => Some((m.target, actor)),
                AgentCommand::CreateActor { .. } => None,
            })
            .collect();
        assert_eq!(
            closes,
            vec![
                (AgentKey::new("ag-1"), ActorKey::new("a1")),
                (AgentKey::new("ag-1"), ActorKey::new("a2"))
            ]
        );
    }

    #[tokio::test]
    async fn test_close_continues_past_failures() {
        let (resources, client) = manager(&[("ag-1", "h1")]);
        resources
            .create_actor(ActorConfig::new("a1", "Echo"))
            .await
            .unwrap();
        client.fail_sends(true);
        resources.close().await;
        // Still tracked: the request never left
        assert_eq!(resources.tracked_actors(), vec![ActorKey::new("a1")]);
    }

    #[tokio::test]
    async fn test_registry_outcomes_release_placements() {
        let (resources, actors, _client) = manager_with_actors(&[("ag-1", "h1")]);
        let events = actors.create_cluster_listener();
        let origin = Endpoint::new("ep-ag-1");
        for key in ["a1", "a2", "a3"] {
            resources
                .create_actor(ActorConfig::new(key, "Echo"))
                .await
                .unwrap();
        }

        // Construction failure: FAILED without a prior CREATED
        events.deliver(
            &origin,
            &ActorLifecycleMessage::failed(
                ActorKey::new("a1"),
                FailureCause::new(FailureCause::KIND_VALIDATION, "unknown class"),
            ),
        );
        // Closed by its agent
        events.deliver(
            &origin,
            &ActorLifecycleMessage::created(ActorKey::new("a2"), AgentKey::new("ag-1")),
        );
        events.deliver(&origin, &ActorLifecycleMessage::closed(ActorKey::new("a2")));
        // Lost with its endpoint
        events.deliver(
            &origin,
            &ActorLifecycleMessage::created(ActorKey::new("a3"), AgentKey::new("ag-1")),
        );
        actors.on_endpoint_disconnected(&origin);

        assert!(resources.tracked_actors().is_empty());
        for key in ["a1", "a2", "a3"] {
            resources
                .create_actor(ActorConfig::new(key, "Echo"))
                .await
                .unwrap();
        }
        assert_eq!(resources.tracked_actors().len(), 3);
    }

    #[tokio::test]
    async fn test_dropping_the_manager_unregisters_from_the_registry() {
        let (resources, actors, _client) = manager_with_actors(&[("ag-1", "h1")]);
        assert_eq!(actors.listener_count(), 1);
        assert_eq!(actors.discard_listener_count(), 1);
        drop(resources);
        assert_eq!(actors.listener_count(), 0);
        assert_eq!(actors.discard_listener_count(), 0);
    }
}
