//! Cluster Client Abstraction
//!
//! Transport-agnostic roles used by agents and the leader. Each role is a
//! separate trait so components depend only on what they use; a
//! [`ClusterClient`] bundles them together with connection management and the
//! optional membership and state-transfer capabilities.

use crate::error::{Result, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use registry::{
    ActorClusterListener, ActorRegistry, AgentClusterListener, AgentRegistry, StateHolder,
    ViewListener,
};
use std::sync::Arc;
use tracing::debug;
use types::{
    ActorInputMessage, ActorKey, ActorLifecycleMessage, AgentInputMessage, AgentKey,
    AgentLifecycleMessage, Endpoint,
};

/// Point-to-point delivery to one actor's input channel
#[async_trait]
pub trait ActorSender: Send + Sync {
    async fn send_to_actor(&self, key: &ActorKey, message: ActorInputMessage) -> Result<()>;
}

/// Delivery of an agent command, filtered by its target on the receiving side
#[async_trait]
pub trait AgentSender: Send + Sync {
    async fn send_to_agent(&self, message: AgentInputMessage) -> Result<()>;
}

/// Publishes actor lifecycle events on the actor-registry channel
#[async_trait]
pub trait ActorRegistrySender: Send + Sync {
    async fn send_actor_event(&self, message: ActorLifecycleMessage) -> Result<()>;
}

/// Publishes agent lifecycle events on the agent-registry channel
#[async_trait]
pub trait AgentRegistrySender: Send + Sync {
    async fn send_agent_event(&self, message: AgentLifecycleMessage) -> Result<()>;
}

/// Feeds registry channels into registry cluster listeners
pub trait RegistryListenerStarter: Send + Sync {
    fn start_actor_registry_listener(&self, listener: ActorClusterListener) -> Result<()>;

    fn start_agent_registry_listener(&self, listener: AgentClusterListener) -> Result<()>;
}

/// Consumer of one actor's input, run on the transport's delivery task
#[async_trait]
pub trait ActorInputHandler: Send + Sync {
    async fn on_actor_input(&self, key: &ActorKey, message: ActorInputMessage);
}

/// Consumer of commands addressed to one agent
#[async_trait]
pub trait AgentInputHandler: Send + Sync {
    async fn on_agent_input(&self, message: AgentInputMessage);
}

/// Starts input listeners for actors and agents
pub trait InputListenerStarter: Send + Sync {
    /// Start consuming `key`'s input; dropping the handle stops it
    fn start_actor_listener(
        &self,
        key: &ActorKey,
        handler: Arc<dyn ActorInputHandler>,
    ) -> Result<ListenerHandle>;

    fn start_agent_listener(
        &self,
        agent: &AgentKey,
        handler: Arc<dyn AgentInputHandler>,
    ) -> Result<()>;
}

/// Transports that report membership changes
pub trait MembershipEvents: Send + Sync {
    fn register_view_listener(&self, listener: Arc<dyn ViewListener>) -> Result<()>;
}

/// Transports that hand a full snapshot to joining members
pub trait StateTransfer: Send + Sync {
    fn register_state_holder(&self, holder: Arc<dyn StateHolder>) -> Result<()>;
}

/// All roles plus connection management
#[async_trait]
pub trait ClusterClient:
    ActorSender
    + AgentSender
    + ActorRegistrySender
    + AgentRegistrySender
    + RegistryListenerStarter
    + InputListenerStarter
{
    /// Identity under which this client's messages are observed
    fn endpoint(&self) -> &Endpoint;

    async fn connect(&self) -> Result<()>;

    /// Leave the cluster; calling it again is a no-op
    async fn close(&self) -> Result<()>;

    fn membership(&self) -> Option<&dyn MembershipEvents> {
        None
    }

    fn state_transfer(&self) -> Option<&dyn StateTransfer> {
        None
    }
}

/// Wire both registries onto a client
///
/// Must run before [`ClusterClient::connect`] so a group join can deliver
/// state straight into the registries.
pub fn attach_registries(
    client: &dyn ClusterClient,
    actors: &Arc<ActorRegistry>,
    agents: &Arc<AgentRegistry>,
) -> Result<()> {
    client.start_actor_registry_listener(actors.create_cluster_listener())?;
    client.start_agent_registry_listener(agents.create_cluster_listener())?;

    if let Some(membership) = client.membership() {
        membership.register_view_listener(actors.view_listener())?;
        membership.register_view_listener(agents.view_listener())?;
    }
    if let Some(transfer) = client.state_transfer() {
        transfer.register_state_holder(actors.state_holder())?;
        transfer.register_state_holder(agents.state_holder())?;
    }

    debug!(
        endpoint = %client.endpoint(),
        membership = client.membership().is_some(),
        state_transfer = client.state_transfer().is_some(),
        "Registries attached"
    );
    Ok(())
}

/// Keeps a per-actor input listener alive
///
/// Dropping or releasing the handle stops delivery and frees the listener's
/// transport resources. The release closure must be `Send + Sync` since
/// handles live inside agent state shared across tasks.
pub struct ListenerHandle {
    name: String,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ListenerHandle {
    pub fn new(name: impl Into<String>, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn release(mut self) {
        self.run_release();
    }

    fn run_release(&mut self) {
        if let Some(release) = self.release.take() {
            debug!(listener = %self.name, "Input listener released");
            release();
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.run_release();
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("name", &self.name)
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// Connection lifecycle shared by the transport clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connected,
    Closed,
}

/// Guarded [`ConnectionState`] with the checks every client performs
#[derive(Debug)]
pub(crate) struct ConnectionGuard {
    state: Mutex<ConnectionState>,
}

impl ConnectionGuard {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Idle),
        }
    }

    pub(crate) fn current(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Idle → Connected; connecting twice is an error
    pub(crate) fn begin_connect(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            ConnectionState::Idle => {
                *state = ConnectionState::Connected;
                Ok(())
            }
            ConnectionState::Connected => Err(TransportError::config("client already connected")),
            ConnectionState::Closed => Err(TransportError::Closed),
        }
    }

    /// Moves to Closed, returning the previous state
    pub(crate) fn begin_close(&self) -> ConnectionState {
        std::mem::replace(&mut *self.state.lock(), ConnectionState::Closed)
    }

    pub(crate) fn ensure_connected(&self, operation: &str) -> Result<()> {
        match self.current() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Idle => Err(TransportError::not_connected(operation)),
            ConnectionState::Closed => Err(TransportError::Closed),
        }
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        match self.current() {
            ConnectionState::Closed => Err(TransportError::Closed),
            ConnectionState::Idle | ConnectionState::Connected => Ok(()),
        }
    }
}

/// Spawn on the ambient tokio runtime, failing instead of panicking without one
pub(crate) fn spawn_delivery<F>(channel: &str, task: F) -> Result<tokio::task::JoinHandle<()>>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let handle = tokio::runtime::Handle::try_current()
        .map_err(|e| TransportError::listener_setup(channel, e.to_string()))?;
    Ok(handle.spawn(task))
}
