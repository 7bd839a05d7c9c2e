//! Recording listeners for tests across the workspace

use parking_lot::Mutex;
use types::{
    ActorDeployInfo, ActorKey, ActorRegistryListener, AgentKey, AgentRegistration,
    AgentRegistryListener, FailureCause,
};

/// Actor registry notification as seen by a listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorEvent {
    Created(ActorKey, AgentKey),
    Initialized(ActorKey),
    Failed(ActorKey, FailureCause),
    Closed(ActorKey),
}

/// Records every actor notification in arrival order
#[derive(Debug, Default)]
pub struct RecordingActorListener {
    events: Mutex<Vec<ActorEvent>>,
}

impl RecordingActorListener {
    pub fn events(&self) -> Vec<ActorEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn failed_keys(&self) -> Vec<ActorKey> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ActorEvent::Failed(key, _) => Some(key.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<FailureCause> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ActorEvent::Failed(_, cause) => Some(cause.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of recorded events concerning `key`
    pub fn count_for(&self, key: &ActorKey) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.key() == key)
            .count()
    }
}

impl ActorEvent {
    pub fn key(&self) -> &ActorKey {
        match self {
            ActorEvent::Created(key, _)
            | ActorEvent::Initialized(key)
            | ActorEvent::Failed(key, _)
            | ActorEvent::Closed(key) => key,
        }
    }
}

impl ActorRegistryListener for RecordingActorListener {
    fn on_actor_created(&self, actor: &ActorKey, agent: &AgentKey) {
        self.events
            .lock()
            .push(ActorEvent::Created(actor.clone(), agent.clone()));
    }

    fn on_actor_initialized(&self, actor: &ActorKey, _deploy_info: &ActorDeployInfo) {
        self.events.lock().push(ActorEvent::Initialized(actor.clone()));
    }

    fn on_actor_failed(&self, actor: &ActorKey, cause: &FailureCause) {
        self.events
            .lock()
            .push(ActorEvent::Failed(actor.clone(), cause.clone()));
    }

    fn on_actor_closed(&self, actor: &ActorKey) {
        self.events.lock().push(ActorEvent::Closed(actor.clone()));
    }
}

/// Agent registry notification as seen by a listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    Created(AgentKey),
    Failed(AgentKey, FailureCause),
    Closed(AgentKey),
}

#[derive(Debug, Default)]
pub struct RecordingAgentListener {
    events: Mutex<Vec<AgentEvent>>,
}

impl RecordingAgentListener {
    pub fn events(&self) -> Vec<AgentEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl AgentRegistryListener for RecordingAgentListener {
    fn on_agent_created(&self, agent: &AgentKey, _registration: &AgentRegistration) {
        self.events.lock().push(AgentEvent::Created(agent.clone()));
    }

    fn on_agent_failed(&self, agent: &AgentKey, cause: &FailureCause) {
        self.events
            .lock()
            .push(AgentEvent::Failed(agent.clone(), cause.clone()));
    }

    fn on_agent_closed(&self, agent: &AgentKey) {
        self.events.lock().push(AgentEvent::Closed(agent.clone()));
    }
}
