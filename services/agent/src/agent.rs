//! # Agent
//!
//! Per-host supervisor. The agent listens for commands addressed to its key,
//! builds actors through its actor managers, starts one input listener per
//! actor and reports every lifecycle transition on the actor-registry
//! channel. A bad actor config produces a FAILED event, never an agent crash.
//!
//! ## Late peers
//!
//! The agent keeps its own replicas of both registries on the client. Over a
//! transport with state transfer that makes it a valid snapshot source for
//! members joining later. Over a transport with membership but no state
//! transfer, the agent repeats its own CREATED and its actors' CREATED and
//! INITIALIZED events whenever a new peer shows up. Registries drop the
//! repeats they already hold.
//!
//! ## Shutdown
//!
//! [`Agent::close`] runs once: local actors are closed, the agent signs off
//! from the agent registry, the actor managers are torn down and finally the
//! cluster client is closed. A failing step is logged and the sequence
//! continues.

use crate::actor::{ActorManagers, RuntimeActor};
use crate::error::{failure_cause, AgentError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use network::{
    attach_registries, ActorInputHandler, AgentInputHandler, ClusterClient, ListenerHandle,
};
use registry::{ActorRegistry, AgentRegistry, ViewEvent, ViewListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, trace, warn};
use types::{
    require_key, ActorConfig, ActorDeployInfo, ActorInputMessage, ActorKey, ActorLifecycleMessage,
    AgentCommand, AgentInputMessage, AgentKey, AgentLifecycleMessage, AgentRegistration,
    AgentSystemInfo, Endpoint, FailureCause, ValidationError,
};

/// An actor running on this agent
struct LocalActor {
    actor: Arc<dyn RuntimeActor>,
    listener: ListenerHandle,
    /// Set once INITIALIZED has been reported
    deploy_info: Option<ActorDeployInfo>,
}

pub struct Agent {
    key: AgentKey,
    registration: AgentRegistration,
    client: Arc<dyn ClusterClient>,
    managers: ActorManagers,
    actors: DashMap<ActorKey, LocalActor>,
    actor_registry: Arc<ActorRegistry>,
    agent_registry: Arc<AgentRegistry>,
    /// Held while announcing or retiring actors, so a repeat never follows
    /// the terminal event of the same actor
    announcing: tokio::sync::Mutex<()>,
    closed: AtomicBool,
    this: Weak<Agent>,
}

impl Agent {
    /// Connect `client`, start listening for commands and register with the
    /// agent registry
    ///
    /// The client must not be connected yet; the agent attaches its own
    /// registries to it.
    pub async fn start(
        key: AgentKey,
        client: Arc<dyn ClusterClient>,
        managers: ActorManagers,
    ) -> Result<Arc<Self>> {
        let registration = AgentRegistration::new(AgentSystemInfo::current());
        Self::start_with_registration(key, client, managers, registration).await
    }

    pub async fn start_with_registration(
        key: AgentKey,
        client: Arc<dyn ClusterClient>,
        managers: ActorManagers,
        registration: AgentRegistration,
    ) -> Result<Arc<Self>> {
        require_key(&key, "agent")?;
        let agent = Arc::new_cyclic(|this| Self {
            key,
            registration,
            client,
            managers,
            actors: DashMap::new(),
            actor_registry: ActorRegistry::new(),
            agent_registry: AgentRegistry::new(),
            announcing: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
            this: this.clone(),
        });

        attach_registries(
            agent.client.as_ref(),
            &agent.actor_registry,
            &agent.agent_registry,
        )?;
        if agent.client.state_transfer().is_none() {
            if let Some(membership) = agent.client.membership() {
                membership.register_view_listener(Arc::new(PeerWatch {
                    agent: Arc::downgrade(&agent),
                }))?;
            }
        }

        agent.client.connect().await?;
        if let Err(e) = agent.register().await {
            if let Err(close_err) = agent.client.close().await {
                warn!(agent = %agent.key, error = %close_err, "Client close after failed start");
            }
            return Err(e);
        }
        Ok(agent)
    }

    /// Listen before announcing so no command sent in reaction to the
    /// announcement can be missed
    async fn register(&self) -> Result<()> {
        let router = Arc::new(AgentInputRouter {
            agent: self.this.clone(),
        });
        self.client.start_agent_listener(&self.key, router)?;

        self.client
            .send_agent_event(AgentLifecycleMessage::created(
                self.key.clone(),
                self.registration.clone(),
            ))
            .await?;
        info!(
            agent = %self.key,
            endpoint = %self.client.endpoint(),
            host = %self.registration.system.host,
            "Agent started"
        );
        Ok(())
    }

    /// Repeat this agent's announcements for a peer that just appeared
    async fn reannounce(&self, peer: &Endpoint) -> Result<()> {
        let _announcing = self.announcing.lock().await;
        self.ensure_open()?;

        let mut actors: Vec<(ActorKey, Option<ActorDeployInfo>)> = self
            .actors
            .iter()
            .map(|local| (local.key().clone(), local.deploy_info.clone()))
            .collect();
        actors.sort_by(|a, b| a.0.cmp(&b.0));

        self.client
            .send_agent_event(AgentLifecycleMessage::created(
                self.key.clone(),
                self.registration.clone(),
            ))
            .await?;
        for (key, deploy_info) in &actors {
            self.client
                .send_actor_event(ActorLifecycleMessage::created(key.clone(), self.key.clone()))
                .await?;
            if let Some(deploy_info) = deploy_info {
                self.client
                    .send_actor_event(ActorLifecycleMessage::initialized(
                        key.clone(),
                        deploy_info.clone(),
                    ))
                    .await?;
            }
        }
        info!(agent = %self.key, peer = %peer, actors = actors.len(), "Re-announced to new peer");
        Ok(())
    }

    pub fn key(&self) -> &AgentKey {
        &self.key
    }

    /// This agent's replica of the cluster's actor registry
    pub fn actor_registry(&self) -> &Arc<ActorRegistry> {
        &self.actor_registry
    }

    pub fn agent_registry(&self) -> &Arc<AgentRegistry> {
        &self.agent_registry
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Keys of the actors this agent currently hosts, sorted
    pub fn local_actors(&self) -> Vec<ActorKey> {
        let mut keys: Vec<ActorKey> = self.actors.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Build, register and announce an actor
    ///
    /// Construction problems are reported as a FAILED event and leave no
    /// trace on the agent. Only a failure to publish that event is returned.
    pub async fn on_actor_creation_request(&self, config: ActorConfig) -> Result<()> {
        self.ensure_open()?;
        let key = config.key.clone();
        match self.launch(&config).await {
            Ok(()) => {
                info!(actor = %key, class = %config.class_name, forked = config.deploy.forked, "Actor created");
                self.client
                    .send_actor_event(ActorLifecycleMessage::created(key, self.key.clone()))
                    .await?;
            }
            Err(cause) => {
                error!(actor = %key, cause = %cause, "Actor creation failed");
                self.client
                    .send_actor_event(ActorLifecycleMessage::failed(key, cause))
                    .await?;
            }
        }
        Ok(())
    }

    async fn launch(&self, config: &ActorConfig) -> std::result::Result<(), FailureCause> {
        config.validate()?;
        let key = &config.key;
        if self.actors.contains_key(key) {
            return Err(duplicate(key));
        }

        let manager = self.managers.select(config)?;
        let actor = manager
            .create_actor(config)
            .await
            .map_err(|e| failure_cause(&e))?;

        let router = Arc::new(ActorInputRouter {
            agent: self.this.clone(),
        });
        let listener = match self.client.start_actor_listener(key, router) {
            Ok(listener) => listener,
            Err(e) => {
                discard(key, actor.as_ref()).await;
                return Err(FailureCause::from_error(FailureCause::KIND_TRANSPORT, &e));
            }
        };

        let rejected = match self.actors.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Some((actor, listener)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(LocalActor {
                    actor,
                    listener,
                    deploy_info: None,
                });
                None
            }
        };
        if let Some((actor, listener)) = rejected {
            listener.release();
            discard(key, actor.as_ref()).await;
            return Err(duplicate(key));
        }
        Ok(())
    }

    /// Close one local actor; unknown keys are ignored
    ///
    /// Emits CLOSED, or FAILED when the actor's close fails. The actor's input
    /// listener is released in both cases.
    pub async fn on_actor_close_request(&self, key: &ActorKey) -> Result<()> {
        let _announcing = self.announcing.lock().await;
        let Some((_, local)) = self.actors.remove(key) else {
            debug!(actor = %key, "Close requested for unknown actor");
            return Ok(());
        };

        let event = match local.actor.close().await {
            Ok(()) => {
                info!(actor = %key, "Actor closed");
                ActorLifecycleMessage::closed(key.clone())
            }
            Err(e) => {
                let cause = failure_cause(&e);
                error!(actor = %key, cause = %cause, "Actor close failed");
                ActorLifecycleMessage::failed(key.clone(), cause)
            }
        };
        let sent = self.client.send_actor_event(event).await;
        local.listener.release();
        sent.map_err(AgentError::from)
    }

    async fn on_actor_input(&self, key: &ActorKey, message: ActorInputMessage) {
        trace!(actor = %key, command = message.command_name(), "Actor input");
        if matches!(message, ActorInputMessage::Close) {
            if let Err(e) = self.on_actor_close_request(key).await {
                warn!(actor = %key, error = %e, "Close outcome not published");
            }
            return;
        }

        let Some(actor) = self.actors.get(key).map(|local| Arc::clone(&local.actor)) else {
            debug!(actor = %key, command = message.command_name(), "Input for unknown actor dropped");
            return;
        };

        match message {
            ActorInputMessage::Bootstrap => self.bootstrap(key, actor).await,
            ActorInputMessage::DumpMetrics => {
                if let Err(e) = actor.dump_and_flush_metrics().await {
                    warn!(actor = %key, error = %e, "Metrics flush failed");
                }
            }
            ActorInputMessage::Message { from, payload } => {
                if let Err(e) = actor.on_message(&from, payload).await {
                    warn!(actor = %key, from = %from, error = %e, "Actor message handling failed");
                }
            }
            ActorInputMessage::Close => {}
        }
    }

    async fn bootstrap(&self, key: &ActorKey, actor: Arc<dyn RuntimeActor>) {
        let initialized = actor.init().await;
        let _announcing = self.announcing.lock().await;
        let event = match initialized {
            Ok(()) => {
                let deploy_info = ActorDeployInfo {
                    endpoint: self.client.endpoint().clone(),
                    pid: actor.pid(),
                    command: actor.command(),
                };
                if let Some(mut local) = self.actors.get_mut(key) {
                    local.deploy_info = Some(deploy_info.clone());
                }
                info!(actor = %key, endpoint = %deploy_info.endpoint, "Actor initialized");
                ActorLifecycleMessage::initialized(key.clone(), deploy_info)
            }
            Err(e) => {
                let cause = failure_cause(&e);
                error!(actor = %key, cause = %cause, "Actor initialization failed");
                // A failed actor leaves the registry, so it leaves the agent too
                if let Some((_, local)) = self.actors.remove(key) {
                    local.listener.release();
                    discard(key, local.actor.as_ref()).await;
                }
                ActorLifecycleMessage::failed(key.clone(), cause)
            }
        };
        if let Err(e) = self.client.send_actor_event(event).await {
            warn!(actor = %key, error = %e, "Bootstrap outcome not published");
        }
    }

    async fn on_agent_input(&self, message: AgentInputMessage) {
        if !message.is_for(&self.key) {
            return;
        }
        let outcome = match message.command {
            AgentCommand::CreateActor { config } => self.on_actor_creation_request(config).await,
            AgentCommand::CloseActor { actor } => self.on_actor_close_request(&actor).await,
        };
        if let Err(e) = outcome {
            warn!(agent = %self.key, error = %e, "Agent command not completed");
        }
    }

    /// Shut the agent down; later calls return immediately
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!(agent = %self.key, actors = self.actors.len(), "Closing agent");

        for key in self.local_actors() {
            if let Err(e) = self.on_actor_close_request(&key).await {
                warn!(actor = %key, error = %e, "Actor close not published");
            }
        }

        let signed_off = {
            let _announcing = self.announcing.lock().await;
            self.client
                .send_agent_event(AgentLifecycleMessage::closed(self.key.clone()))
                .await
        };
        if let Err(e) = signed_off {
            warn!(agent = %self.key, error = %e, "Sign-off not published");
        }

        for manager in self.managers.all() {
            if let Err(e) = manager.close().await {
                warn!(agent = %self.key, error = %e, "Actor manager close failed");
            }
        }

        let closed = self.client.close().await;
        info!(agent = %self.key, "Agent closed");
        closed.map_err(AgentError::from)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(AgentError::Closed {
                agent: self.key.clone(),
            })
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("key", &self.key)
            .field("endpoint", self.client.endpoint())
            .field("actors", &self.actors.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn duplicate(key: &ActorKey) -> FailureCause {
    ValidationError::DuplicateActor {
        key: key.to_string(),
    }
    .into()
}

/// Close an actor that never made it into service
async fn discard(key: &ActorKey, actor: &dyn RuntimeActor) {
    if let Err(e) = actor.close().await {
        warn!(actor = %key, error = %e, "Discarded actor did not close cleanly");
    }
}

/// Triggers a re-announcement when a peer joins
struct PeerWatch {
    agent: Weak<Agent>,
}

impl ViewListener for PeerWatch {
    fn on_view_event(&self, event: &ViewEvent) {
        let ViewEvent::MemberJoined(peer) = event else {
            return;
        };
        let Some(agent) = self.agent.upgrade() else {
            return;
        };
        if peer == agent.client.endpoint() || agent.is_closed() {
            return;
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(agent = %agent.key, peer = %peer, error = %e, "No runtime to re-announce on");
                return;
            }
        };
        let peer = peer.clone();
        runtime.spawn(async move {
            if let Err(e) = agent.reannounce(&peer).await {
                debug!(agent = %agent.key, peer = %peer, error = %e, "Re-announcement skipped");
            }
        });
    }
}

struct AgentInputRouter {
    agent: Weak<Agent>,
}

#[async_trait]
impl AgentInputHandler for AgentInputRouter {
    async fn on_agent_input(&self, message: AgentInputMessage) {
        if let Some(agent) = self.agent.upgrade() {
            agent.on_agent_input(message).await;
        }
    }
}

struct ActorInputRouter {
    agent: Weak<Agent>,
}

#[async_trait]
impl ActorInputHandler for ActorInputRouter {
    async fn on_actor_input(&self, key: &ActorKey, message: ActorInputMessage) {
        if let Some(agent) = self.agent.upgrade() {
            agent.on_actor_input(key, message).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::EmbeddedActorManager;
    use crate::test_utils::{scripted_manager, CallLog, RecordingClient};
    use types::{ActorState, AgentState, DeployConfig};

    async fn started(log: &CallLog) -> (Arc<Agent>, Arc<RecordingClient>) {
        let client = RecordingClient::new("agent-endpoint");
        let agent = Agent::start(
            AgentKey::new("agent-1"),
            client.clone(),
            ActorManagers::embedded(scripted_manager(log)),
        )
        .await
        .unwrap();
        (agent, client)
    }

    fn states(client: &RecordingClient) -> Vec<(String, ActorState)> {
        client
            .actor_events()
            .iter()
            .map(|e| (e.key().to_string(), e.state()))
            .collect()
    }

    #[tokio::test]
    async fn test_start_connects_and_registers() {
        let (agent, client) = started(&CallLog::default()).await;
        assert_eq!(client.connect_count(), 1);
        let events = client.agent_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].state(), AgentState::Created);
        assert_eq!(events[0].key(), agent.key());
    }

    #[tokio::test]
    async fn test_empty_agent_key_is_rejected() {
        let client = RecordingClient::new("e");
        let err = Agent::start(
            AgentKey::new(""),
            client.clone(),
            ActorManagers::embedded(EmbeddedActorManager::new()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
        assert_eq!(client.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_creation_registers_listens_and_announces() {
        let (agent, client) = started(&CallLog::default()).await;
        client
            .deliver_agent_input(AgentInputMessage::create_actor(
                AgentKey::new("agent-1"),
                ActorConfig::new("a1", "Echo"),
            ))
            .await;

        assert_eq!(agent.local_actors(), vec![ActorKey::new("a1")]);
        assert!(client.has_actor_listener(&ActorKey::new("a1")));
        assert!(matches!(
            client.actor_events().as_slice(),
            [ActorLifecycleMessage::Created { actor, agent }]
                if actor.as_str() == "a1" && agent.as_str() == "agent-1"
        ));
    }

    #[tokio::test]
    async fn test_commands_for_other_agents_are_ignored() {
        let (agent, client) = started(&CallLog::default()).await;
        client
            .deliver_agent_input(AgentInputMessage::create_actor(
                AgentKey::new("agent-2"),
                ActorConfig::new("a1", "Echo"),
            ))
            .await;
        assert!(agent.local_actors().is_empty());
        assert!(client.actor_events().is_empty());
    }

    #[tokio::test]
    async fn test_bad_config_emits_failed_without_registration() {
        let (agent, client) = started(&CallLog::default()).await;
        agent
            .on_actor_creation_request(ActorConfig::new("a1", "NoSuchClass"))
            .await
            .unwrap();
        agent
            .on_actor_creation_request(ActorConfig::new("a2", ""))
            .await
            .unwrap();

        assert!(agent.local_actors().is_empty());
        assert!(!client.has_actor_listener(&ActorKey::new("a1")));
        let events = client.actor_events();
        assert_eq!(events.len(), 2);
        for event in &events {
            match event {
                ActorLifecycleMessage::Failed { cause, .. } => {
                    assert_eq!(cause.kind, FailureCause::KIND_VALIDATION)
                }
                other => panic!("expected FAILED, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_forked_request_without_forked_manager_fails() {
        let (agent, client) = started(&CallLog::default()).await;
        let config = ActorConfig::new("a1", "Echo")
            .with_deploy(DeployConfig::forked(vec!["--heap=1g".into()]));
        agent.on_actor_creation_request(config).await.unwrap();
        assert!(agent.local_actors().is_empty());
        assert_eq!(states(&client), vec![("a1".into(), ActorState::Failed)]);
    }

    #[tokio::test]
    async fn test_forked_request_uses_forked_manager() {
        let log = CallLog::default();
        let client = RecordingClient::new("e");
        let agent = Agent::start(
            AgentKey::new("agent-1"),
            client.clone(),
            ActorManagers::embedded(EmbeddedActorManager::new())
                .with_forked(scripted_manager(&log)),
        )
        .await
        .unwrap();
        let config = ActorConfig::new("a1", "Echo").with_deploy(DeployConfig::forked(vec![]));
        agent.on_actor_creation_request(config).await.unwrap();
        assert_eq!(states(&client), vec![("a1".into(), ActorState::Created)]);
    }

    #[tokio::test]
    async fn test_duplicate_creation_fails_without_second_registration() {
        let (agent, client) = started(&CallLog::default()).await;
        agent
            .on_actor_creation_request(ActorConfig::new("a1", "Echo"))
            .await
            .unwrap();
        agent
            .on_actor_creation_request(ActorConfig::new("a1", "Echo"))
            .await
            .unwrap();

        assert_eq!(agent.local_actors().len(), 1);
        assert_eq!(
            states(&client),
            vec![
                ("a1".into(), ActorState::Created),
                ("a1".into(), ActorState::Failed)
            ]
        );
    }

    #[tokio::test]
    async fn test_bootstrap_message_and_metrics_reach_the_actor() {
        let log = CallLog::default();
        let (agent, client) = started(&log).await;
        let key = ActorKey::new("a1");
        agent
            .on_actor_creation_request(ActorConfig::new("a1", "Echo"))
            .await
            .unwrap();

        assert!(client.deliver_actor_input(&key, ActorInputMessage::Bootstrap).await);
        assert!(
            client
                .deliver_actor_input(
                    &key,
                    ActorInputMessage::message(ActorKey::new("leader"), serde_json::json!(5)),
                )
                .await
        );
        assert!(client.deliver_actor_input(&key, ActorInputMessage::DumpMetrics).await);

        assert_eq!(
            log.entries(),
            vec!["a1:init", "a1:message from leader: 5", "a1:metrics"]
        );
        match &client.actor_events()[1] {
            ActorLifecycleMessage::Initialized { deploy_info, .. } => {
                assert_eq!(deploy_info.endpoint.as_str(), "agent-endpoint");
                assert_eq!(deploy_info.pid, Some(std::process::id()));
            }
            other => panic!("expected INITIALIZED, got {other:?}"),
        }
        assert!(!agent.is_closed());
    }

    #[tokio::test]
    async fn test_failed_bootstrap_removes_the_actor() {
        let (agent, client) = started(&CallLog::default()).await;
        let key = ActorKey::new("a1");
        agent
            .on_actor_creation_request(ActorConfig::new("a1", "FailInit"))
            .await
            .unwrap();
        client.deliver_actor_input(&key, ActorInputMessage::Bootstrap).await;

        assert!(agent.local_actors().is_empty());
        assert_eq!(client.released(), vec![key]);
        assert_eq!(
            states(&client),
            vec![
                ("a1".into(), ActorState::Created),
                ("a1".into(), ActorState::Failed)
            ]
        );
    }

    #[tokio::test]
    async fn test_close_unknown_actor_is_a_noop() {
        let (agent, client) = started(&CallLog::default()).await;
        agent
            .on_actor_close_request(&ActorKey::new("ghost"))
            .await
            .unwrap();
        assert!(client.actor_events().is_empty());
    }

    #[tokio::test]
    async fn test_close_failure_emits_failed_and_still_releases() {
        let (agent, client) = started(&CallLog::default()).await;
        let key = ActorKey::new("a1");
        agent
            .on_actor_creation_request(ActorConfig::new("a1", "FailClose"))
            .await
            .unwrap();

        client.deliver_actor_input(&key, ActorInputMessage::Close).await;
        assert!(agent.local_actors().is_empty());
        assert!(!client.has_actor_listener(&key));
        assert_eq!(client.released(), vec![key]);
        assert_eq!(
            states(&client),
            vec![
                ("a1".into(), ActorState::Created),
                ("a1".into(), ActorState::Failed)
            ]
        );
    }

    #[tokio::test]
    async fn test_close_runs_in_order_and_only_once() {
        let log = CallLog::default();
        let (agent, client) = started(&log).await;
        for key in ["a1", "a2"] {
            agent
                .on_actor_creation_request(ActorConfig::new(key, "Echo"))
                .await
                .unwrap();
        }

        let (first, second) = tokio::join!(agent.close(), agent.close());
        first.unwrap();
        second.unwrap();
        agent.close().await.unwrap();

        assert_eq!(client.close_count(), 1);
        let sign_offs = client
            .agent_events()
            .iter()
            .filter(|e| e.state() == AgentState::Closed)
            .count();
        assert_eq!(sign_offs, 1);
        assert_eq!(log.entries(), vec!["a1:close", "a2:close"]);
        assert_eq!(
            states(&client)[2..],
            [
                ("a1".to_string(), ActorState::Closed),
                ("a2".to_string(), ActorState::Closed)
            ]
        );
        assert!(matches!(
            agent
                .on_actor_creation_request(ActorConfig::new("a3", "Echo"))
                .await,
            Err(AgentError::Closed { .. })
        ));
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[tokio::test]
    async fn test_agent_work_can_move_across_tasks() {
        assert_send_sync::<Agent>();
        let (agent, client) = started(&CallLog::default()).await;
        let spawned = Arc::clone(&agent);
        tokio::spawn(async move {
            spawned
                .on_actor_creation_request(ActorConfig::new("a1", "Echo"))
                .await
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(agent.local_actors(), vec![ActorKey::new("a1")]);
        assert_eq!(states(&client), vec![("a1".into(), ActorState::Created)]);
    }

    async fn settle(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if condition() {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        condition()
    }

    #[tokio::test]
    async fn test_new_peer_gets_agent_and_actors_repeated() {
        let (agent, client) = started(&CallLog::default()).await;
        for key in ["a2", "a1"] {
            agent
                .on_actor_creation_request(ActorConfig::new(key, "Echo"))
                .await
                .unwrap();
        }
        client
            .deliver_actor_input(&ActorKey::new("a1"), ActorInputMessage::Bootstrap)
            .await;
        assert_eq!(client.actor_events().len(), 3);

        // Its own endpoint is not a new peer
        client.peer_joined("agent-endpoint");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(client.agent_events().len(), 1);

        client.peer_joined("late-leader");
        assert!(settle(|| client.actor_events().len() == 6).await);
        let agents = client.agent_events();
        assert_eq!(agents.len(), 2);
        assert_eq!(agents[1].state(), AgentState::Created);
        assert_eq!(
            states(&client)[3..],
            [
                ("a1".to_string(), ActorState::Created),
                ("a1".to_string(), ActorState::Initialized),
                ("a2".to_string(), ActorState::Created)
            ]
        );
    }

    #[tokio::test]
    async fn test_closed_agent_stays_silent_for_new_peers() {
        let (agent, client) = started(&CallLog::default()).await;
        agent.close().await.unwrap();
        let before = client.agent_events().len();

        client.peer_joined("late-leader");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(client.agent_events().len(), before);
        assert!(client.actor_events().is_empty());
    }
}
