//! # Awaitable Actor and Agent Handles
//!
//! Creating an actor or an agent is fire-and-forget on the wire; its progress
//! only shows up later as registry events. A handle installs a transient
//! registry listener for exactly one key before issuing the remote action and
//! turns the matching events into [`Completion`]s:
//!
//! | Event   | Resolves                | Rejects (still pending)                       |
//! |---------|-------------------------|-----------------------------------------------|
//! | CREATED | `created`               |                                               |
//! | INITIALIZED | `initialized` (actors) |                                            |
//! | FAILED  | `failed` with the cause | every other stage with [`HandleError::Failed`] |
//! | CLOSED  | `closed`                | every other stage with [`HandleError::SignedOff`] |
//!
//! The listener leaves the registry at the first terminal event, or right
//! away when the remote action could not be issued. Actor watchers also sit
//! in the registry's discard set, so a FAILED for an actor that was never
//! CREATED still settles the handle.

use crate::completion::Completion;
use crate::error::{HandleError, ResourceError, Result};
use crate::resource::ResourceManager;
use async_trait::async_trait;
use network::ClusterClient;
use registry::{ActorRegistry, AgentRegistry};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};
use types::{
    ActorConfig, ActorDeployInfo, ActorInputMessage, ActorKey, ActorRegistryListener, AgentKey,
    AgentRegistration, AgentRegistryListener, FailureCause,
};

/// Per-stage completions of an actor
#[derive(Debug, Clone, Default)]
pub struct ActorStages {
    pub created: Completion<AgentKey>,
    pub initialized: Completion<ActorDeployInfo>,
    pub closed: Completion<()>,
    pub failed: Completion<FailureCause>,
}

struct ActorWatcher {
    key: ActorKey,
    stages: ActorStages,
    registry: Weak<ActorRegistry>,
    this: Weak<ActorWatcher>,
}

impl ActorWatcher {
    fn install(registry: &Arc<ActorRegistry>, key: ActorKey) -> registry::Result<Arc<Self>> {
        let watcher = Arc::new_cyclic(|this| Self {
            key,
            stages: ActorStages::default(),
            registry: Arc::downgrade(registry),
            this: this.clone(),
        });
        registry.add_listener(watcher.clone())?;
        // A construction failure arrives as FAILED for a key never CREATED
        if let Err(e) = registry.add_discard_listener(watcher.clone()) {
            watcher.detach();
            return Err(e);
        }
        Ok(watcher)
    }

    fn detach(&self) {
        if let (Some(registry), Some(this)) = (self.registry.upgrade(), self.this.upgrade()) {
            let listener: Arc<dyn ActorRegistryListener> = this;
            registry.remove_listener(&listener);
            registry.remove_discard_listener(&listener);
            debug!(actor = %self.key, "Actor watcher detached");
        }
    }
}

impl ActorRegistryListener for ActorWatcher {
    fn on_actor_created(&self, actor: &ActorKey, agent: &AgentKey) {
        if actor == &self.key {
            self.stages.created.resolve(agent.clone());
        }
    }

    fn on_actor_initialized(&self, actor: &ActorKey, deploy_info: &ActorDeployInfo) {
        if actor == &self.key {
            self.stages.initialized.resolve(deploy_info.clone());
        }
    }

    fn on_actor_failed(&self, actor: &ActorKey, cause: &FailureCause) {
        if actor != &self.key {
            return;
        }
        let rejection = HandleError::Failed(cause.clone());
        self.stages.created.reject(rejection.clone());
        self.stages.initialized.reject(rejection.clone());
        self.stages.closed.reject(rejection);
        self.stages.failed.resolve(cause.clone());
        self.detach();
    }

    fn on_actor_closed(&self, actor: &ActorKey) {
        if actor != &self.key {
            return;
        }
        let rejection = HandleError::signed_off(actor);
        self.stages.created.reject(rejection.clone());
        self.stages.initialized.reject(rejection.clone());
        self.stages.failed.reject(rejection);
        self.stages.closed.resolve(());
        self.detach();
    }
}

/// Leader-side factory of actor handles
#[derive(Clone)]
pub struct Actors {
    registry: Arc<ActorRegistry>,
    resources: Arc<ResourceManager>,
    client: Arc<dyn ClusterClient>,
}

impl Actors {
    pub fn new(
        registry: Arc<ActorRegistry>,
        resources: Arc<ResourceManager>,
        client: Arc<dyn ClusterClient>,
    ) -> Self {
        Self {
            registry,
            resources,
            client,
        }
    }

    /// Place an actor and return a handle on its lifecycle
    pub async fn create(&self, config: ActorConfig) -> Result<ActorHandle> {
        config.validate()?;
        let key = config.key.clone();
        let watcher = ActorWatcher::install(&self.registry, key.clone())?;
        let agent = match self.resources.create_actor(config).await {
            Ok(agent) => agent,
            Err(e) => {
                watcher.detach();
                return Err(e);
            }
        };
        Ok(ActorHandle {
            key,
            agent,
            watcher,
            resources: Arc::clone(&self.resources),
            client: Arc::clone(&self.client),
        })
    }
}

impl std::fmt::Debug for Actors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actors")
            .field("registry", &self.registry)
            .field("resources", &self.resources)
            .finish()
    }
}

/// A placed actor
pub struct ActorHandle {
    key: ActorKey,
    agent: AgentKey,
    watcher: Arc<ActorWatcher>,
    resources: Arc<ResourceManager>,
    client: Arc<dyn ClusterClient>,
}

impl ActorHandle {
    pub fn key(&self) -> &ActorKey {
        &self.key
    }

    /// Agent the actor was placed on
    pub fn agent(&self) -> &AgentKey {
        &self.agent
    }

    pub fn stages(&self) -> &ActorStages {
        &self.watcher.stages
    }

    pub async fn send(&self, message: ActorInputMessage) -> Result<()> {
        self.client
            .send_to_actor(&self.key, message)
            .await
            .map_err(ResourceError::from)
    }

    pub async fn bootstrap(&self) -> Result<()> {
        self.send(ActorInputMessage::Bootstrap).await
    }

    pub async fn close(&self) -> Result<()> {
        self.resources.close_actor(&self.key).await
    }
}

impl std::fmt::Debug for ActorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorHandle")
            .field("key", &self.key)
            .field("agent", &self.agent)
            .field("stages", &self.watcher.stages)
            .finish()
    }
}

/// Starts agent processes; how is up to the deployment
#[async_trait]
pub trait AgentLauncher: Send + Sync {
    async fn launch(&self, key: &AgentKey) -> anyhow::Result<()>;
}

/// Per-stage completions of an agent
#[derive(Debug, Clone, Default)]
pub struct AgentStages {
    pub created: Completion<AgentRegistration>,
    pub closed: Completion<()>,
    pub failed: Completion<FailureCause>,
}

struct AgentWatcher {
    key: AgentKey,
    stages: AgentStages,
    registry: Weak<AgentRegistry>,
    this: Weak<AgentWatcher>,
}

impl AgentWatcher {
    fn install(registry: &Arc<AgentRegistry>, key: AgentKey) -> registry::Result<Arc<Self>> {
        let watcher = Arc::new_cyclic(|this| Self {
            key,
            stages: AgentStages::default(),
            registry: Arc::downgrade(registry),
            this: this.clone(),
        });
        registry.add_listener(watcher.clone())?;
        Ok(watcher)
    }

    fn detach(&self) {
        if let (Some(registry), Some(this)) = (self.registry.upgrade(), self.this.upgrade()) {
            let listener: Arc<dyn AgentRegistryListener> = this;
            registry.remove_listener(&listener);
            debug!(agent = %self.key, "Agent watcher detached");
        }
    }
}

impl AgentRegistryListener for AgentWatcher {
    fn on_agent_created(&self, agent: &AgentKey, registration: &AgentRegistration) {
        if agent == &self.key {
            self.stages.created.resolve(registration.clone());
        }
    }

    fn on_agent_failed(&self, agent: &AgentKey, cause: &FailureCause) {
        if agent != &self.key {
            return;
        }
        let rejection = HandleError::Failed(cause.clone());
        self.stages.created.reject(rejection.clone());
        self.stages.closed.reject(rejection);
        self.stages.failed.resolve(cause.clone());
        self.detach();
    }

    fn on_agent_closed(&self, agent: &AgentKey) {
        if agent != &self.key {
            return;
        }
        let rejection = HandleError::signed_off(agent);
        self.stages.created.reject(rejection.clone());
        self.stages.failed.reject(rejection);
        self.stages.closed.resolve(());
        self.detach();
    }
}

/// Leader-side factory of agent handles
#[derive(Clone)]
pub struct Agents {
    registry: Arc<AgentRegistry>,
    launcher: Arc<dyn AgentLauncher>,
}

impl Agents {
    pub fn new(registry: Arc<AgentRegistry>, launcher: Arc<dyn AgentLauncher>) -> Self {
        Self { registry, launcher }
    }

    /// Launch an agent and return a handle on its registration
    pub async fn create(&self, key: AgentKey) -> std::result::Result<AgentHandle, HandleError> {
        let watcher =
            AgentWatcher::install(&self.registry, key.clone()).map_err(|e| HandleError::Launch {
                message: e.to_string(),
            })?;
        if let Err(e) = self.launcher.launch(&key).await {
            warn!(agent = %key, error = %e, "Agent launch failed");
            watcher.detach();
            return Err(HandleError::Launch {
                message: format!("{e:#}"),
            });
        }
        Ok(AgentHandle { key, watcher })
    }
}

impl std::fmt::Debug for Agents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agents")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

pub struct AgentHandle {
    key: AgentKey,
    watcher: Arc<AgentWatcher>,
}

impl AgentHandle {
    pub fn key(&self) -> &AgentKey {
        &self.key
    }

    pub fn stages(&self) -> &AgentStages {
        &self.watcher.stages
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("key", &self.key)
            .field("stages", &self.watcher.stages)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent::test_utils::RecordingClient;
    use types::{ActorLifecycleMessage, AgentLifecycleMessage, AgentSystemInfo, Endpoint};

    // The resource manager's own registry listener
    const BASELINE: usize = 1;

    struct Fixture {
        actors: Arc<ActorRegistry>,
        agents: Arc<AgentRegistry>,
        handles: Actors,
        client: Arc<RecordingClient>,
    }

    fn fixture() -> Fixture {
        let actors = ActorRegistry::new();
        let agents = AgentRegistry::new();
        agents.create_cluster_listener().deliver(
            &Endpoint::new("agent-ep"),
            &AgentLifecycleMessage::created(
                AgentKey::new("ag-1"),
                AgentRegistration::new(AgentSystemInfo::current()),
            ),
        );
        let client = RecordingClient::new("leader");
        let resources =
            Arc::new(ResourceManager::new(actors.clone(), agents.clone(), client.clone()).unwrap());
        let handles = Actors::new(actors.clone(), resources, client.clone());
        Fixture {
            actors,
            agents,
            handles,
            client,
        }
    }

    fn deliver(registry: &Arc<ActorRegistry>, message: ActorLifecycleMessage) {
        registry
            .create_cluster_listener()
            .deliver(&Endpoint::new("agent-ep"), &message);
    }

    fn deploy_info() -> ActorDeployInfo {
        ActorDeployInfo {
            endpoint: Endpoint::new("agent-ep"),
            pid: Some(1),
            command: None,
        }
    }

    #[tokio::test]
    async fn test_stages_resolve_in_order_and_listener_leaves_on_close() {
        let f = fixture();
        let handle = f.handles.create(ActorConfig::new("a1", "Echo")).await.unwrap();
        assert_eq!(handle.agent().as_str(), "ag-1");
        assert_eq!(f.actors.listener_count(), BASELINE + 1);

        let key = ActorKey::new("a1");
        deliver(&f.actors, ActorLifecycleMessage::created(key.clone(), AgentKey::new("ag-1")));
        assert_eq!(handle.stages().created.wait().await, Ok(AgentKey::new("ag-1")));

        deliver(&f.actors, ActorLifecycleMessage::initialized(key.clone(), deploy_info()));
        assert_eq!(handle.stages().initialized.wait().await, Ok(deploy_info()));

        deliver(&f.actors, ActorLifecycleMessage::closed(key));
        assert_eq!(handle.stages().closed.wait().await, Ok(()));
        assert!(matches!(
            handle.stages().failed.wait().await,
            Err(HandleError::SignedOff { .. })
        ));
        assert_eq!(f.actors.listener_count(), BASELINE);
    }

    #[tokio::test]
    async fn test_failure_rejects_pending_stages() {
        let f = fixture();
        let handle = f.handles.create(ActorConfig::new("a1", "Echo")).await.unwrap();
        let key = ActorKey::new("a1");
        deliver(&f.actors, ActorLifecycleMessage::created(key.clone(), AgentKey::new("ag-1")));

        let cause = FailureCause::new(FailureCause::KIND_ACTOR, "init refused");
        deliver(&f.actors, ActorLifecycleMessage::failed(key, cause.clone()));

        let stages = handle.stages();
        assert_eq!(stages.failed.wait().await, Ok(cause.clone()));
        assert_eq!(stages.created.wait().await, Ok(AgentKey::new("ag-1")));
        assert_eq!(
            stages.initialized.wait().await,
            Err(HandleError::Failed(cause.clone()))
        );
        assert_eq!(stages.closed.wait().await, Err(HandleError::Failed(cause)));
        assert_eq!(f.actors.listener_count(), BASELINE);
    }

    #[tokio::test]
    async fn test_failure_before_creation_settles_the_handle() {
        let f = fixture();
        let handle = f
            .handles
            .create(ActorConfig::new("a1", "NoSuchClass"))
            .await
            .unwrap();
        assert_eq!(f.actors.discard_listener_count(), BASELINE + 1);

        // The agent could not build the actor, so CREATED never happens
        let cause = FailureCause::new(FailureCause::KIND_VALIDATION, "unknown class NoSuchClass");
        deliver(&f.actors, ActorLifecycleMessage::failed(ActorKey::new("a1"), cause.clone()));

        let stages = handle.stages();
        assert_eq!(stages.failed.wait().await, Ok(cause.clone()));
        assert_eq!(stages.created.wait().await, Err(HandleError::Failed(cause.clone())));
        assert_eq!(stages.initialized.wait().await, Err(HandleError::Failed(cause)));
        assert_eq!(f.actors.listener_count(), BASELINE);
        assert_eq!(f.actors.discard_listener_count(), BASELINE);
        assert!(f.actors.is_empty());

        // The key is free again
        f.handles
            .create(ActorConfig::new("a1", "Echo"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_events_for_other_keys_are_ignored() {
        let f = fixture();
        let handle = f.handles.create(ActorConfig::new("a1", "Echo")).await.unwrap();
        deliver(
            &f.actors,
            ActorLifecycleMessage::created(ActorKey::new("a2"), AgentKey::new("ag-1")),
        );
        deliver(&f.actors, ActorLifecycleMessage::closed(ActorKey::new("a2")));
        assert!(!handle.stages().created.is_complete());
        assert!(!handle.stages().closed.is_complete());
        assert_eq!(f.actors.listener_count(), BASELINE + 1);
    }

    #[tokio::test]
    async fn test_failed_placement_removes_the_listener() {
        let f = fixture();
        f.client.fail_sends(true);
        let err = f
            .handles
            .create(ActorConfig::new("a1", "Echo"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResourceError::Transport(_)));
        assert_eq!(f.actors.listener_count(), BASELINE);
        assert_eq!(f.agents.len(), 1);
    }

    #[tokio::test]
    async fn test_handle_send_and_close_go_through_the_client() {
        let f = fixture();
        let handle = f.handles.create(ActorConfig::new("a1", "Echo")).await.unwrap();
        handle.bootstrap().await.unwrap();
        handle.close().await.unwrap();
        assert_eq!(
            f.client.actor_inputs(),
            vec![(ActorKey::new("a1"), ActorInputMessage::Bootstrap)]
        );
        // create plus close
        assert_eq!(f.client.agent_inputs().len(), 2);
    }

    struct RefusingLauncher;

    #[async_trait]
    impl AgentLauncher for RefusingLauncher {
        async fn launch(&self, _key: &AgentKey) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("no capacity"))
        }
    }

    struct NoopLauncher;

    #[async_trait]
    impl AgentLauncher for NoopLauncher {
        async fn launch(&self, _key: &AgentKey) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_agent_launch_failure_is_reported() {
        let registry = AgentRegistry::new();
        let agents = Agents::new(registry.clone(), Arc::new(RefusingLauncher));
        let err = agents.create(AgentKey::new("ag-9")).await.unwrap_err();
        assert_eq!(
            err,
            HandleError::Launch {
                message: "no capacity".into()
            }
        );
        assert_eq!(registry.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_agent_sign_off_rejects_failure_stage() {
        let registry = AgentRegistry::new();
        let agents = Agents::new(registry.clone(), Arc::new(NoopLauncher));
        let handle = agents.create(AgentKey::new("ag-9")).await.unwrap();

        let listener = registry.create_cluster_listener();
        let endpoint = Endpoint::new("ag-9-ep");
        listener.deliver(
            &endpoint,
            &AgentLifecycleMessage::created(
                AgentKey::new("ag-9"),
                AgentRegistration::new(AgentSystemInfo::current().with_host("h9")),
            ),
        );
        let registration = handle.stages().created.wait().await.unwrap();
        assert_eq!(registration.system.host, "h9");

        listener.deliver(&endpoint, &AgentLifecycleMessage::closed(AgentKey::new("ag-9")));
        assert_eq!(handle.stages().closed.wait().await, Ok(()));
        assert!(matches!(
            handle.stages().failed.wait().await,
            Err(HandleError::SignedOff { .. })
        ));
        assert_eq!(registry.listener_count(), 0);
    }
}
