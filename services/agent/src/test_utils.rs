//! Test doubles for agent tests: scripted actors and a recording client

use crate::actor::{EmbeddedActorManager, RuntimeActor};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use network::{
    ActorInputHandler, ActorRegistrySender, ActorSender, AgentInputHandler, AgentRegistrySender,
    AgentSender, ClusterClient, InputListenerStarter, ListenerHandle, MembershipEvents,
    RegistryListenerStarter, TransportError,
};
use parking_lot::Mutex;
use registry::{ActorClusterListener, AgentClusterListener, ViewEvent, ViewListener};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use types::{
    ActorInputMessage, ActorKey, ActorLifecycleMessage, AgentInputMessage, AgentKey,
    AgentLifecycleMessage, Endpoint,
};

/// Shared, ordered record of actor calls (`"a1:init"`, `"a1:close"`, ...)
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn record(&self, key: &ActorKey, call: &str) {
        self.0.lock().push(format!("{key}:{call}"));
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

/// Actor whose init or close can be made to fail
pub struct ScriptedActor {
    key: ActorKey,
    log: CallLog,
    fail_init: bool,
    fail_close: bool,
}

impl ScriptedActor {
    pub fn new(key: ActorKey) -> Self {
        Self {
            key,
            log: CallLog::default(),
            fail_init: false,
            fail_close: false,
        }
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }
}

#[async_trait]
impl RuntimeActor for ScriptedActor {
    fn key(&self) -> &ActorKey {
        &self.key
    }

    async fn init(&self) -> Result<()> {
        self.log.record(&self.key, "init");
        if self.fail_init {
            return Err(anyhow!("init refused"));
        }
        Ok(())
    }

    async fn on_message(&self, from: &ActorKey, payload: serde_json::Value) -> Result<()> {
        self.log.record(&self.key, &format!("message from {from}: {payload}"));
        Ok(())
    }

    async fn dump_and_flush_metrics(&self) -> Result<()> {
        self.log.record(&self.key, "metrics");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.log.record(&self.key, "close");
        if self.fail_close {
            return Err(anyhow!("close refused"));
        }
        Ok(())
    }
}

/// Embedded manager with `Echo`, `FailInit` and `FailClose` classes
pub fn scripted_manager(log: &CallLog) -> EmbeddedActorManager {
    let echo = log.clone();
    let fail_init = log.clone();
    let fail_close = log.clone();
    EmbeddedActorManager::new()
        .with_factory("Echo", move |config| {
            Ok(Arc::new(ScriptedActor::new(config.key.clone()).with_log(echo.clone()))
                as Arc<dyn RuntimeActor>)
        })
        .with_factory("FailInit", move |config| {
            Ok(Arc::new(
                ScriptedActor::new(config.key.clone())
                    .with_log(fail_init.clone())
                    .failing_init(),
            ) as Arc<dyn RuntimeActor>)
        })
        .with_factory("FailClose", move |config| {
            Ok(Arc::new(
                ScriptedActor::new(config.key.clone())
                    .with_log(fail_close.clone())
                    .failing_close(),
            ) as Arc<dyn RuntimeActor>)
        })
}

type ActorHandlers = Arc<Mutex<HashMap<ActorKey, Arc<dyn ActorInputHandler>>>>;

/// Cluster client that records what it is asked to do
///
/// Input is injected with [`RecordingClient::deliver_agent_input`] and
/// [`RecordingClient::deliver_actor_input`] instead of arriving from peers.
/// Membership changes are injected with [`RecordingClient::peer_joined`].
pub struct RecordingClient {
    endpoint: Endpoint,
    closed: AtomicBool,
    fail_sends: AtomicBool,
    connects: AtomicUsize,
    closes: AtomicUsize,
    actor_events: Mutex<Vec<ActorLifecycleMessage>>,
    agent_events: Mutex<Vec<AgentLifecycleMessage>>,
    actor_inputs: Mutex<Vec<(ActorKey, ActorInputMessage)>>,
    agent_inputs: Mutex<Vec<AgentInputMessage>>,
    agent_handler: Mutex<Option<Arc<dyn AgentInputHandler>>>,
    actor_handlers: ActorHandlers,
    released: Arc<Mutex<Vec<ActorKey>>>,
    view_listeners: Mutex<Vec<Arc<dyn ViewListener>>>,
}

impl RecordingClient {
    pub fn new(endpoint: &str) -> Arc<Self> {
        Arc::new(Self {
            endpoint: Endpoint::new(endpoint),
            closed: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            actor_events: Mutex::new(Vec::new()),
            agent_events: Mutex::new(Vec::new()),
            actor_inputs: Mutex::new(Vec::new()),
            agent_inputs: Mutex::new(Vec::new()),
            agent_handler: Mutex::new(None),
            actor_handlers: Arc::new(Mutex::new(HashMap::new())),
            released: Arc::new(Mutex::new(Vec::new())),
            view_listeners: Mutex::new(Vec::new()),
        })
    }

    pub fn actor_events(&self) -> Vec<ActorLifecycleMessage> {
        self.actor_events.lock().clone()
    }

    pub fn agent_events(&self) -> Vec<AgentLifecycleMessage> {
        self.agent_events.lock().clone()
    }

    /// Commands sent to agents, in send order
    pub fn agent_inputs(&self) -> Vec<AgentInputMessage> {
        self.agent_inputs.lock().clone()
    }

    pub fn actor_inputs(&self) -> Vec<(ActorKey, ActorInputMessage)> {
        self.actor_inputs.lock().clone()
    }

    /// Make every later send fail as if the destination were unreachable
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn has_actor_listener(&self, key: &ActorKey) -> bool {
        self.actor_handlers.lock().contains_key(key)
    }

    pub fn released(&self) -> Vec<ActorKey> {
        self.released.lock().clone()
    }

    pub async fn deliver_agent_input(&self, message: AgentInputMessage) {
        let handler = self.agent_handler.lock().clone();
        if let Some(handler) = handler {
            handler.on_agent_input(message).await;
        }
    }

    /// Returns false when no listener is running for `key`
    pub async fn deliver_actor_input(&self, key: &ActorKey, message: ActorInputMessage) -> bool {
        let handler = self.actor_handlers.lock().get(key).cloned();
        match handler {
            Some(handler) => {
                handler.on_actor_input(key, message).await;
                true
            }
            None => false,
        }
    }

    /// Report `endpoint` as a new member to every view listener
    pub fn peer_joined(&self, endpoint: &str) {
        let listeners = self.view_listeners.lock().clone();
        let event = ViewEvent::MemberJoined(Endpoint::new(endpoint));
        for listener in listeners {
            listener.on_view_event(&event);
        }
    }

    fn check_open(&self) -> network::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    fn check_send(&self, destination: &str) -> network::Result<()> {
        self.check_open()?;
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::send(destination, "destination unreachable"));
        }
        Ok(())
    }
}

#[async_trait]
impl ActorSender for RecordingClient {
    async fn send_to_actor(&self, key: &ActorKey, message: ActorInputMessage) -> network::Result<()> {
        self.check_send(key.as_str())?;
        self.actor_inputs.lock().push((key.clone(), message));
        Ok(())
    }
}

#[async_trait]
impl AgentSender for RecordingClient {
    async fn send_to_agent(&self, message: AgentInputMessage) -> network::Result<()> {
        self.check_send(message.target.as_str())?;
        self.agent_inputs.lock().push(message);
        Ok(())
    }
}

#[async_trait]
impl ActorRegistrySender for RecordingClient {
    async fn send_actor_event(&self, message: ActorLifecycleMessage) -> network::Result<()> {
        self.check_send("actor-registry")?;
        self.actor_events.lock().push(message);
        Ok(())
    }
}

#[async_trait]
impl AgentRegistrySender for RecordingClient {
    async fn send_agent_event(&self, message: AgentLifecycleMessage) -> network::Result<()> {
        self.check_send("agent-registry")?;
        self.agent_events.lock().push(message);
        Ok(())
    }
}

impl RegistryListenerStarter for RecordingClient {
    fn start_actor_registry_listener(&self, _listener: ActorClusterListener) -> network::Result<()> {
        Ok(())
    }

    fn start_agent_registry_listener(&self, _listener: AgentClusterListener) -> network::Result<()> {
        Ok(())
    }
}

impl InputListenerStarter for RecordingClient {
    fn start_actor_listener(
        &self,
        key: &ActorKey,
        handler: Arc<dyn ActorInputHandler>,
    ) -> network::Result<ListenerHandle> {
        self.check_open()?;
        {
            let mut handlers = self.actor_handlers.lock();
            if handlers.contains_key(key) {
                return Err(TransportError::listener_setup(
                    key.as_str(),
                    "actor already has an input listener",
                ));
            }
            handlers.insert(key.clone(), handler);
        }

        let handlers = Arc::clone(&self.actor_handlers);
        let released = Arc::clone(&self.released);
        let key = key.clone();
        Ok(ListenerHandle::new(key.to_string(), move || {
            handlers.lock().remove(&key);
            released.lock().push(key);
        }))
    }

    fn start_agent_listener(
        &self,
        _agent: &AgentKey,
        handler: Arc<dyn AgentInputHandler>,
    ) -> network::Result<()> {
        self.check_open()?;
        *self.agent_handler.lock() = Some(handler);
        Ok(())
    }
}

impl MembershipEvents for RecordingClient {
    fn register_view_listener(&self, listener: Arc<dyn ViewListener>) -> network::Result<()> {
        self.check_open()?;
        self.view_listeners.lock().push(listener);
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for RecordingClient {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn connect(&self) -> network::Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> network::Result<()> {
        tokio::task::yield_now().await;
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn membership(&self) -> Option<&dyn MembershipEvents> {
        Some(self)
    }
}
