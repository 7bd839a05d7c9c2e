//! Agent Registry
//!
//! Same contract as the actor registry, keyed by agent. An agent is present
//! from its CREATED announcement until it fails, signs off, or its endpoint
//! leaves the cluster.

use crate::error::Result;
use crate::sync::{StateHolder, ViewListener};
use crate::view::{Departures, Replicated, Snapshots, View};
use std::sync::Arc;
use tracing::{info, trace, warn};
use types::{
    AgentKey, AgentLifecycleMessage, AgentRegistration, AgentRegistryListener, DisconnectedError,
    Endpoint, FailureCause, RegisteredAgent,
};

/// Registry of live agents
pub struct AgentRegistry {
    view: View<RegisteredAgent, dyn AgentRegistryListener>,
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.view.len())
            .field("listeners", &self.view.listeners().len())
            .finish()
    }
}

impl AgentRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            view: View::new("agent"),
        })
    }

    pub fn create_cluster_listener(self: &Arc<Self>) -> AgentClusterListener {
        AgentClusterListener {
            registry: Arc::clone(self),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn AgentRegistryListener>) -> Result<()> {
        self.view.listeners().add(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn AgentRegistryListener>) {
        self.view.listeners().remove(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.view.listeners().len()
    }

    /// Observe FAILED and CLOSED events for agents the registry never held
    pub fn add_discard_listener(&self, listener: Arc<dyn AgentRegistryListener>) -> Result<()> {
        self.view.discard_listeners().add(listener)
    }

    pub fn remove_discard_listener(&self, listener: &Arc<dyn AgentRegistryListener>) {
        self.view.discard_listeners().remove(listener);
    }

    /// Replace the whole view without notifying listeners
    pub fn reset_state(&self, agents: impl IntoIterator<Item = RegisteredAgent>) {
        self.view.reset(agents);
    }

    pub fn all(&self) -> Vec<RegisteredAgent> {
        self.view.all()
    }

    pub fn by_key(&self, key: &AgentKey) -> Option<RegisteredAgent> {
        self.view.get(key)
    }

    pub fn len(&self) -> usize {
        self.view.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fail every agent announced by `endpoint`, returning how many were removed
    pub fn on_endpoint_disconnected(&self, endpoint: &Endpoint) -> usize {
        let _serial = self.view.gate();
        let lost = self.view.drain_endpoint(endpoint);
        for key in &lost {
            warn!(agent = %key, endpoint = %endpoint, "Agent lost with its endpoint");
            let cause: FailureCause = DisconnectedError::Agent {
                key: key.clone(),
                endpoint: endpoint.clone(),
            }
            .into();
            self.view
                .notify(|listener| listener.on_agent_failed(key, &cause));
        }
        lost.len()
    }

    pub fn state_holder(self: &Arc<Self>) -> Arc<dyn StateHolder> {
        Arc::new(Snapshots(Arc::clone(self)))
    }

    pub fn view_listener(self: &Arc<Self>) -> Arc<dyn ViewListener> {
        Arc::new(Departures(Arc::clone(self)))
    }

    fn apply(&self, origin: &Endpoint, message: &AgentLifecycleMessage) {
        let _serial = self.view.gate();
        message.send_to(&Mutation {
            registry: self,
            origin,
        });
    }
}

impl Replicated for AgentRegistry {
    type Entry = RegisteredAgent;
    type Listener = dyn AgentRegistryListener;

    const STATE_NAME: &'static str = "agent-registry";

    fn view(&self) -> &View<RegisteredAgent, dyn AgentRegistryListener> {
        &self.view
    }

    fn on_endpoint_disconnected(&self, endpoint: &Endpoint) -> usize {
        AgentRegistry::on_endpoint_disconnected(self, endpoint)
    }
}

struct Mutation<'a> {
    registry: &'a AgentRegistry,
    origin: &'a Endpoint,
}

impl AgentRegistryListener for Mutation<'_> {
    fn on_agent_created(&self, agent: &AgentKey, registration: &AgentRegistration) {
        let view = &self.registry.view;
        let entry = RegisteredAgent::new(agent.clone(), registration.clone(), self.origin.clone());
        if !view.insert(entry) {
            trace!(agent = %agent, "Duplicate CREATED dropped");
            return;
        }
        info!(
            agent = %agent,
            host = %registration.system.host,
            endpoint = %self.origin,
            "Agent joined"
        );
        view.notify(|listener| listener.on_agent_created(agent, registration));
    }

    fn on_agent_failed(&self, agent: &AgentKey, cause: &FailureCause) {
        let view = &self.registry.view;
        if view.remove(agent).is_none() {
            trace!(agent = %agent, "FAILED for unknown agent dropped");
            view.notify_discarded(|listener| listener.on_agent_failed(agent, cause));
            return;
        }
        warn!(agent = %agent, cause = %cause, "Agent failed");
        view.notify(|listener| listener.on_agent_failed(agent, cause));
    }

    fn on_agent_closed(&self, agent: &AgentKey) {
        let view = &self.registry.view;
        if view.remove(agent).is_none() {
            trace!(agent = %agent, "CLOSED for unknown agent dropped");
            view.notify_discarded(|listener| listener.on_agent_closed(agent));
            return;
        }
        info!(agent = %agent, "Agent signed off");
        view.notify(|listener| listener.on_agent_closed(agent));
    }
}

/// Registry-bound listener handed to transports
#[derive(Clone)]
pub struct AgentClusterListener {
    registry: Arc<AgentRegistry>,
}

impl AgentClusterListener {
    pub fn deliver(&self, origin: &Endpoint, message: &AgentLifecycleMessage) {
        self.registry.apply(origin, message);
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }
}

impl std::fmt::Debug for AgentClusterListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentClusterListener").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{AgentEvent, RecordingAgentListener};
    use crate::ViewEvent;
    use types::AgentSystemInfo;

    fn registration(host: &str) -> AgentRegistration {
        AgentRegistration::new(AgentSystemInfo::current().with_host(host))
    }

    #[test]
    fn test_agent_created_then_closed() {
        let registry = AgentRegistry::new();
        let recorder = Arc::new(RecordingAgentListener::default());
        registry.add_listener(recorder.clone()).unwrap();
        let cluster = registry.create_cluster_listener();
        let origin = Endpoint::new("node-1");
        let key = AgentKey::new("agent-1");

        cluster.deliver(
            &origin,
            &AgentLifecycleMessage::created(key.clone(), registration("host-a")),
        );
        let entry = registry.by_key(&key).unwrap();
        assert_eq!(entry.host(), "host-a");
        assert_eq!(entry.endpoint, origin);

        cluster.deliver(&origin, &AgentLifecycleMessage::closed(key.clone()));
        assert!(registry.is_empty());
        assert_eq!(
            recorder.events(),
            vec![AgentEvent::Created(key.clone()), AgentEvent::Closed(key)]
        );
    }

    #[test]
    fn test_duplicate_created_keeps_first_registration() {
        let registry = AgentRegistry::new();
        let cluster = registry.create_cluster_listener();
        let key = AgentKey::new("agent-1");
        cluster.deliver(
            &Endpoint::new("e1"),
            &AgentLifecycleMessage::created(key.clone(), registration("first")),
        );
        cluster.deliver(
            &Endpoint::new("e2"),
            &AgentLifecycleMessage::created(key.clone(), registration("second")),
        );
        assert_eq!(registry.by_key(&key).unwrap().host(), "first");
    }

    #[test]
    fn test_disconnect_reports_agent_failure() {
        let registry = AgentRegistry::new();
        let recorder = Arc::new(RecordingAgentListener::default());
        registry.add_listener(recorder.clone()).unwrap();
        let cluster = registry.create_cluster_listener();
        let endpoint = Endpoint::new("node-1");
        cluster.deliver(
            &endpoint,
            &AgentLifecycleMessage::created(AgentKey::new("agent-1"), registration("h")),
        );
        recorder.clear();

        registry
            .view_listener()
            .on_view_event(&ViewEvent::MemberLeft(endpoint));
        assert!(registry.is_empty());
        let events = recorder.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            AgentEvent::Failed(key, cause) => {
                assert_eq!(key, &AgentKey::new("agent-1"));
                assert!(cause.is_disconnect());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_snapshot_round_trip() {
        let source = AgentRegistry::new();
        source.create_cluster_listener().deliver(
            &Endpoint::new("e"),
            &AgentLifecycleMessage::created(AgentKey::new("agent-1"), registration("h")),
        );
        let target = AgentRegistry::new();
        let bytes = source.state_holder().get_state().unwrap();
        target.state_holder().set_state(&bytes).unwrap();
        assert_eq!(target.all(), source.all());
    }

    #[test]
    fn test_sign_off_of_unknown_agent_reaches_discard_listener() {
        let registry = AgentRegistry::new();
        let discarded = Arc::new(RecordingAgentListener::default());
        registry.add_discard_listener(discarded.clone()).unwrap();
        let cluster = registry.create_cluster_listener();

        cluster.deliver(
            &Endpoint::new("e"),
            &AgentLifecycleMessage::closed(AgentKey::new("stranger")),
        );
        assert_eq!(
            discarded.events(),
            vec![AgentEvent::Closed(AgentKey::new("stranger"))]
        );

        let as_listener: Arc<dyn AgentRegistryListener> = discarded.clone();
        registry.remove_discard_listener(&as_listener);
        cluster.deliver(
            &Endpoint::new("e"),
            &AgentLifecycleMessage::closed(AgentKey::new("stranger")),
        );
        assert_eq!(discarded.events().len(), 1);
    }
}
