//! Cluster client over a [`GroupHub`]
//!
//! Every message travels as one broadcast on the group and is filtered on
//! the receiving side. Registries receive their snapshot from the
//! coordinator on join, and membership loss comes straight from view changes.

use super::hub::{GroupChannel, GroupDelivery, GroupHub, GroupState};
use crate::client::{
    spawn_delivery, ActorInputHandler, ActorRegistrySender, ActorSender, AgentInputHandler,
    AgentRegistrySender, AgentSender, ClusterClient, ConnectionGuard, ConnectionState,
    InputListenerStarter, ListenerHandle, MembershipEvents, RegistryListenerStarter,
    StateTransfer,
};
use crate::codec;
use crate::error::{Result, TransportError};
use async_trait::async_trait;
use cluster_config::GroupSettings;
use dashmap::DashMap;
use parking_lot::Mutex;
use registry::{
    ActorClusterListener, AgentClusterListener, StateHolder, ViewListener,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, info, trace, warn};
use types::{
    ActorInputMessage, ActorKey, ActorLifecycleMessage, AgentInputMessage, AgentKey,
    AgentLifecycleMessage, Endpoint,
};

/// Everything that travels on the group channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "SCREAMING_SNAKE_CASE")]
enum GroupFrame {
    ActorInput {
        actor: ActorKey,
        message: ActorInputMessage,
    },
    AgentInput {
        message: AgentInputMessage,
    },
    ActorLifecycle {
        event: ActorLifecycleMessage,
    },
    AgentLifecycle {
        event: AgentLifecycleMessage,
    },
}

/// Local routing of received frames
#[derive(Default)]
struct Dispatch {
    actor_registries: Mutex<Vec<ActorClusterListener>>,
    agent_registries: Mutex<Vec<AgentClusterListener>>,
    actor_inputs: DashMap<ActorKey, mpsc::UnboundedSender<ActorInputMessage>>,
    agent_inputs: Mutex<Vec<(AgentKey, mpsc::UnboundedSender<AgentInputMessage>)>>,
    view_listeners: Mutex<Vec<Arc<dyn ViewListener>>>,
    holders: Mutex<HashMap<&'static str, Arc<dyn StateHolder>>>,
    /// Snapshots that arrived before their holder registered
    pending_state: Mutex<GroupState>,
}

impl Dispatch {
    fn handle(&self, delivery: GroupDelivery) {
        match delivery {
            GroupDelivery::Broadcast { origin, payload } => {
                match codec::decode::<GroupFrame>(&payload) {
                    Ok(frame) => self.route(&origin, frame),
                    Err(e) => warn!(origin = %origin, error = %e, "Dropping undecodable frame"),
                }
            }
            GroupDelivery::View(event) => {
                debug!(event = ?event, "Group view changed");
                let listeners = self.view_listeners.lock().clone();
                for listener in listeners {
                    listener.on_view_event(&event);
                }
            }
            GroupDelivery::StateRequest { .. } | GroupDelivery::State(_) => {}
        }
    }

    fn route(&self, origin: &Endpoint, frame: GroupFrame) {
        match frame {
            GroupFrame::ActorInput { actor, message } => match self.actor_inputs.get(&actor) {
                Some(input) => {
                    if input.send(message).is_err() {
                        trace!(actor = %actor, "Actor input listener stopped");
                    }
                }
                None => trace!(actor = %actor, "No local listener for actor input"),
            },
            GroupFrame::AgentInput { message } => {
                let inputs = self.agent_inputs.lock();
                for (agent, input) in inputs.iter() {
                    if message.is_for(agent) {
                        let _ = input.send(message.clone());
                    }
                }
            }
            GroupFrame::ActorLifecycle { event } => {
                let listeners = self.actor_registries.lock().clone();
                for listener in &listeners {
                    listener.deliver(origin, &event);
                }
            }
            GroupFrame::AgentLifecycle { event } => {
                let listeners = self.agent_registries.lock().clone();
                for listener in &listeners {
                    listener.deliver(origin, &event);
                }
            }
        }
    }

    fn snapshot(&self) -> GroupState {
        let holders = self.holders.lock().clone();
        let mut state = GroupState::new();
        for (name, holder) in holders {
            match holder.get_state() {
                Ok(bytes) => {
                    state.insert(name.to_string(), bytes);
                }
                Err(e) => warn!(state = name, error = %e, "State omitted from transfer"),
            }
        }
        state
    }

    fn apply_state(&self, state: GroupState) {
        for (name, bytes) in state {
            let holder = self.holders.lock().get(name.as_str()).cloned();
            match holder {
                Some(holder) => Self::restore(holder.as_ref(), &bytes),
                None => {
                    self.pending_state.lock().insert(name, bytes);
                }
            }
        }
    }

    fn register_holder(&self, holder: Arc<dyn StateHolder>) {
        let name = holder.state_name();
        self.holders.lock().insert(name, Arc::clone(&holder));
        let pending = self.pending_state.lock().remove(name);
        if let Some(bytes) = pending {
            Self::restore(holder.as_ref(), &bytes);
        }
    }

    fn restore(holder: &dyn StateHolder, bytes: &[u8]) {
        match holder.set_state(bytes) {
            Ok(()) => info!(state = holder.state_name(), bytes = bytes.len(), "State received"),
            Err(e) => warn!(state = holder.state_name(), error = %e, "State rejected"),
        }
    }

    fn clear_inputs(&self) {
        self.actor_inputs.clear();
        self.agent_inputs.lock().clear();
    }
}

/// Drain a member's delivery queue in order
///
/// Until the awaited snapshot arrives, normal traffic is held back and then
/// replayed on top of the restored state.
async fn run_member(
    dispatch: Arc<Dispatch>,
    channel: GroupChannel,
    mut deliveries: mpsc::UnboundedReceiver<GroupDelivery>,
    awaits_state: bool,
) {
    let mut held: Option<Vec<GroupDelivery>> = awaits_state.then(Vec::new);
    while let Some(delivery) = deliveries.recv().await {
        match delivery {
            GroupDelivery::StateRequest { joiner } => {
                debug!(joiner = %joiner, "Providing state");
                channel.provide_state(&joiner, dispatch.snapshot());
            }
            GroupDelivery::State(state) => {
                dispatch.apply_state(state);
                if let Some(held) = held.take() {
                    debug!(held = held.len(), "Replaying traffic held during state transfer");
                    for delivery in held {
                        dispatch.handle(delivery);
                    }
                }
            }
            other => match held.as_mut() {
                Some(held) => held.push(other),
                None => dispatch.handle(other),
            },
        }
    }
}

/// Spawn a task feeding one input channel to its handler
///
/// The task ends when the channel closes or, between messages, once `stop`
/// fires.
fn spawn_input_task<M, F, Fut>(
    name: &str,
    mut inputs: mpsc::UnboundedReceiver<M>,
    mut stop: Option<oneshot::Receiver<()>>,
    mut handle: F,
) -> Result<()>
where
    M: Send + 'static,
    F: FnMut(M) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    spawn_delivery(name, async move {
        loop {
            let next = match stop.as_mut() {
                Some(stop) => tokio::select! {
                    biased;
                    _ = stop => break,
                    message = inputs.recv() => message,
                },
                None => inputs.recv().await,
            };
            let Some(message) = next else { break };
            handle(message).await;
        }
    })
    .map(|_| ())
}

/// Group-channel cluster client
pub struct GroupClusterClient {
    endpoint: Endpoint,
    hub: GroupHub,
    settings: GroupSettings,
    connection: ConnectionGuard,
    channel: Mutex<Option<GroupChannel>>,
    dispatch: Arc<Dispatch>,
    member_task: Mutex<Option<AbortHandle>>,
}

impl GroupClusterClient {
    pub fn new(endpoint: Endpoint, hub: GroupHub, settings: GroupSettings) -> Result<Self> {
        if settings.cluster_name.trim().is_empty() {
            return Err(TransportError::config_field(
                "cluster name must not be empty",
                "group.cluster_name",
            ));
        }
        Ok(Self {
            endpoint,
            hub,
            settings,
            connection: ConnectionGuard::new(),
            channel: Mutex::new(None),
            dispatch: Arc::new(Dispatch::default()),
            member_task: Mutex::new(None),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.current()
    }

    fn broadcast(&self, frame: &GroupFrame, operation: &str) -> Result<()> {
        self.connection.ensure_connected(operation)?;
        let channel = self
            .channel
            .lock()
            .clone()
            .ok_or_else(|| TransportError::not_connected(operation))?;
        channel.broadcast(codec::encode(frame)?)
    }
}

impl std::fmt::Debug for GroupClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupClusterClient")
            .field("endpoint", &self.endpoint)
            .field("cluster", &self.settings.cluster_name)
            .field("state", &self.connection.current())
            .finish()
    }
}

#[async_trait]
impl ActorSender for GroupClusterClient {
    async fn send_to_actor(&self, key: &ActorKey, message: ActorInputMessage) -> Result<()> {
        self.broadcast(
            &GroupFrame::ActorInput {
                actor: key.clone(),
                message,
            },
            "send_to_actor",
        )
    }
}

#[async_trait]
impl AgentSender for GroupClusterClient {
    async fn send_to_agent(&self, message: AgentInputMessage) -> Result<()> {
        self.broadcast(&GroupFrame::AgentInput { message }, "send_to_agent")
    }
}

#[async_trait]
impl ActorRegistrySender for GroupClusterClient {
    async fn send_actor_event(&self, message: ActorLifecycleMessage) -> Result<()> {
        debug!(actor = %message.key(), state = ?message.state(), "Broadcasting actor event");
        self.broadcast(&GroupFrame::ActorLifecycle { event: message }, "send_actor_event")
    }
}

#[async_trait]
impl AgentRegistrySender for GroupClusterClient {
    async fn send_agent_event(&self, message: AgentLifecycleMessage) -> Result<()> {
        debug!(agent = %message.key(), state = ?message.state(), "Broadcasting agent event");
        self.broadcast(&GroupFrame::AgentLifecycle { event: message }, "send_agent_event")
    }
}

impl RegistryListenerStarter for GroupClusterClient {
    fn start_actor_registry_listener(&self, listener: ActorClusterListener) -> Result<()> {
        self.connection.ensure_open()?;
        self.dispatch.actor_registries.lock().push(listener);
        Ok(())
    }

    fn start_agent_registry_listener(&self, listener: AgentClusterListener) -> Result<()> {
        self.connection.ensure_open()?;
        self.dispatch.agent_registries.lock().push(listener);
        Ok(())
    }
}

impl InputListenerStarter for GroupClusterClient {
    fn start_actor_listener(
        &self,
        key: &ActorKey,
        handler: Arc<dyn ActorInputHandler>,
    ) -> Result<ListenerHandle> {
        self.connection.ensure_open()?;
        let name = format!("{}/{}", self.settings.cluster_name, key);
        let (tx, rx) = mpsc::unbounded_channel();

        match self.dispatch.actor_inputs.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut live) => {
                if !live.get().is_closed() {
                    return Err(TransportError::listener_setup(
                        name,
                        "actor already has an input listener",
                    ));
                }
                live.insert(tx.clone());
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(tx.clone());
            }
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let actor = key.clone();
        let started = spawn_input_task(&name, rx, Some(stop_rx), move |message| {
            let handler = Arc::clone(&handler);
            let actor = actor.clone();
            async move { handler.on_actor_input(&actor, message).await }
        });
        if let Err(e) = started {
            self.dispatch.actor_inputs.remove(key);
            return Err(e);
        }

        let dispatch = Arc::clone(&self.dispatch);
        let key = key.clone();
        Ok(ListenerHandle::new(name, move || {
            let _ = stop_tx.send(());
            dispatch
                .actor_inputs
                .remove_if(&key, |_, sender| sender.same_channel(&tx));
        }))
    }

    fn start_agent_listener(
        &self,
        agent: &AgentKey,
        handler: Arc<dyn AgentInputHandler>,
    ) -> Result<()> {
        self.connection.ensure_open()?;
        let name = format!("{}/{}", self.settings.cluster_name, agent);
        let (tx, rx) = mpsc::unbounded_channel();
        spawn_input_task(&name, rx, None, move |message| {
            let handler = Arc::clone(&handler);
            async move { handler.on_agent_input(message).await }
        })?;
        self.dispatch.agent_inputs.lock().push((agent.clone(), tx));
        Ok(())
    }
}

impl MembershipEvents for GroupClusterClient {
    fn register_view_listener(&self, listener: Arc<dyn ViewListener>) -> Result<()> {
        self.connection.ensure_open()?;
        self.dispatch.view_listeners.lock().push(listener);
        Ok(())
    }
}

impl StateTransfer for GroupClusterClient {
    fn register_state_holder(&self, holder: Arc<dyn StateHolder>) -> Result<()> {
        self.connection.ensure_open()?;
        self.dispatch.register_holder(holder);
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for GroupClusterClient {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn connect(&self) -> Result<()> {
        self.connection.begin_connect()?;
        let holds_state = !self.dispatch.holders.lock().is_empty();
        let joined = self.hub.join(
            &self.settings.cluster_name,
            self.endpoint.clone(),
            holds_state,
        )?;
        let channel = joined.channel.clone();

        let task = spawn_delivery(
            &self.settings.cluster_name,
            run_member(
                Arc::clone(&self.dispatch),
                joined.channel,
                joined.deliveries,
                joined.awaits_state,
            ),
        );
        let task = match task {
            Ok(task) => task,
            Err(e) => {
                channel.leave();
                return Err(e);
            }
        };

        *self.member_task.lock() = Some(task.abort_handle());
        *self.channel.lock() = Some(channel);
        info!(
            endpoint = %self.endpoint,
            cluster = %self.settings.cluster_name,
            awaits_state = joined.awaits_state,
            "Joined group"
        );
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.connection.begin_close() == ConnectionState::Closed {
            return Ok(());
        }
        if let Some(channel) = self.channel.lock().take() {
            channel.leave();
        }
        if let Some(task) = self.member_task.lock().take() {
            task.abort();
        }
        self.dispatch.clear_inputs();
        info!(endpoint = %self.endpoint, "Left group");
        Ok(())
    }

    fn membership(&self) -> Option<&dyn MembershipEvents> {
        Some(self)
    }

    fn state_transfer(&self) -> Option<&dyn StateTransfer> {
        Some(self)
    }
}
