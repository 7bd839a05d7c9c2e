//! Actor Registry
//!
//! Authoritative view of the live actors of the cluster. Mutations only come
//! from the cluster listener (transport delivery) and from membership loss;
//! client listeners observe the resulting transitions.

use crate::error::Result;
use crate::sync::{StateHolder, ViewListener};
use crate::view::{Departures, Replicated, Snapshots, View};
use std::sync::Arc;
use tracing::{debug, trace, warn};
use types::{
    ActorDeployInfo, ActorKey, ActorLifecycleMessage, ActorRegistryListener, ActorState, AgentKey,
    DisconnectedError, Endpoint, FailureCause, RegisteredActor,
};

/// Registry of live actors
pub struct ActorRegistry {
    view: View<RegisteredActor, dyn ActorRegistryListener>,
}

impl std::fmt::Debug for ActorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorRegistry")
            .field("actors", &self.view.len())
            .field("listeners", &self.view.listeners().len())
            .finish()
    }
}

impl ActorRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            view: View::new("actor"),
        })
    }

    /// Listener for transport delivery code only
    pub fn create_cluster_listener(self: &Arc<Self>) -> ActorClusterListener {
        ActorClusterListener {
            registry: Arc::clone(self),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn ActorRegistryListener>) -> Result<()> {
        self.view.listeners().add(listener)
    }

    /// Remove a client listener; unknown listeners are ignored
    pub fn remove_listener(&self, listener: &Arc<dyn ActorRegistryListener>) {
        self.view.listeners().remove(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.view.listeners().len()
    }

    /// Observe FAILED and CLOSED events for actors the registry never held
    ///
    /// An actor whose construction fails is reported FAILED without ever
    /// having been CREATED; regular listeners never hear of it.
    pub fn add_discard_listener(&self, listener: Arc<dyn ActorRegistryListener>) -> Result<()> {
        self.view.discard_listeners().add(listener)
    }

    pub fn remove_discard_listener(&self, listener: &Arc<dyn ActorRegistryListener>) {
        self.view.discard_listeners().remove(listener);
    }

    pub fn discard_listener_count(&self) -> usize {
        self.view.discard_listeners().len()
    }

    /// Replace the whole view without notifying listeners
    pub fn reset_state(&self, actors: impl IntoIterator<Item = RegisteredActor>) {
        self.view.reset(actors);
    }

    /// Point-in-time snapshot ordered by key
    pub fn all(&self) -> Vec<RegisteredActor> {
        self.view.all()
    }

    pub fn by_key(&self, key: &ActorKey) -> Option<RegisteredActor> {
        self.view.get(key)
    }

    /// Actors hosted by one agent
    pub fn by_agent(&self, agent: &AgentKey) -> Vec<RegisteredActor> {
        self.all()
            .into_iter()
            .filter(|actor| &actor.agent == agent)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.view.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fail every actor announced by `endpoint`
    ///
    /// Returns the number of actors removed. Each one is reported exactly
    /// once because it leaves the view in the same step.
    pub fn on_endpoint_disconnected(&self, endpoint: &Endpoint) -> usize {
        let _serial = self.view.gate();
        let lost = self.view.drain_endpoint(endpoint);
        for key in &lost {
            warn!(actor = %key, endpoint = %endpoint, "Actor lost with its endpoint");
            let cause: FailureCause = DisconnectedError::Actor {
                key: key.clone(),
                endpoint: endpoint.clone(),
            }
            .into();
            self.view
                .notify(|listener| listener.on_actor_failed(key, &cause));
        }
        lost.len()
    }

    pub fn state_holder(self: &Arc<Self>) -> Arc<dyn StateHolder> {
        Arc::new(Snapshots(Arc::clone(self)))
    }

    pub fn view_listener(self: &Arc<Self>) -> Arc<dyn ViewListener> {
        Arc::new(Departures(Arc::clone(self)))
    }

    fn apply(&self, origin: &Endpoint, message: &ActorLifecycleMessage) {
        let _serial = self.view.gate();
        message.send_to(&Mutation {
            registry: self,
            origin,
        });
    }
}

impl Replicated for ActorRegistry {
    type Entry = RegisteredActor;
    type Listener = dyn ActorRegistryListener;

    const STATE_NAME: &'static str = "actor-registry";

    fn view(&self) -> &View<RegisteredActor, dyn ActorRegistryListener> {
        &self.view
    }

    fn on_endpoint_disconnected(&self, endpoint: &Endpoint) -> usize {
        ActorRegistry::on_endpoint_disconnected(self, endpoint)
    }
}

/// Applies one delivered event to the view; runs under the gate
struct Mutation<'a> {
    registry: &'a ActorRegistry,
    origin: &'a Endpoint,
}

impl ActorRegistryListener for Mutation<'_> {
    fn on_actor_created(&self, actor: &ActorKey, agent: &AgentKey) {
        let view = &self.registry.view;
        let entry = RegisteredActor::created(actor.clone(), agent.clone(), self.origin.clone());
        if !view.insert(entry) {
            trace!(actor = %actor, "Duplicate CREATED dropped");
            return;
        }
        debug!(actor = %actor, agent = %agent, endpoint = %self.origin, "Actor registered");
        view.notify(|listener| listener.on_actor_created(actor, agent));
    }

    fn on_actor_initialized(&self, actor: &ActorKey, deploy_info: &ActorDeployInfo) {
        let view = &self.registry.view;
        let applied = view.update(actor, |entry| match entry {
            Some(entry) if entry.state == ActorState::Created => {
                entry.state = ActorState::Initialized;
                entry.deploy_info = Some(deploy_info.clone());
                true
            }
            Some(_) => {
                trace!(actor = %actor, "Duplicate INITIALIZED dropped");
                false
            }
            None => {
                trace!(actor = %actor, "INITIALIZED for unknown actor dropped");
                false
            }
        });
        if applied {
            debug!(actor = %actor, endpoint = %deploy_info.endpoint, "Actor initialized");
            view.notify(|listener| listener.on_actor_initialized(actor, deploy_info));
        }
    }

    fn on_actor_failed(&self, actor: &ActorKey, cause: &FailureCause) {
        let view = &self.registry.view;
        if view.remove(actor).is_none() {
            trace!(actor = %actor, cause = %cause, "FAILED for unknown actor dropped");
            view.notify_discarded(|listener| listener.on_actor_failed(actor, cause));
            return;
        }
        warn!(actor = %actor, cause = %cause, "Actor failed");
        view.notify(|listener| listener.on_actor_failed(actor, cause));
    }

    fn on_actor_closed(&self, actor: &ActorKey) {
        let view = &self.registry.view;
        if view.remove(actor).is_none() {
            trace!(actor = %actor, "CLOSED for unknown actor dropped");
            view.notify_discarded(|listener| listener.on_actor_closed(actor));
            return;
        }
        debug!(actor = %actor, "Actor closed");
        view.notify(|listener| listener.on_actor_closed(actor));
    }
}

/// Registry-bound listener handed to transports
#[derive(Clone)]
pub struct ActorClusterListener {
    registry: Arc<ActorRegistry>,
}

impl ActorClusterListener {
    /// Apply an event received from `origin`
    pub fn deliver(&self, origin: &Endpoint, message: &ActorLifecycleMessage) {
        self.registry.apply(origin, message);
    }

    pub fn registry(&self) -> &Arc<ActorRegistry> {
        &self.registry
    }
}

impl std::fmt::Debug for ActorClusterListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorClusterListener").finish_non_exhaustive()
    }
}
