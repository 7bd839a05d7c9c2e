//! Cluster client over a [`MessageBus`]

use super::{
    BusFrame, Destination, HeartbeatFrame, HeartbeatMonitor, MessageBus, ProducerCache,
};
use crate::client::{
    spawn_delivery, ActorInputHandler, ActorRegistrySender, ActorSender, AgentInputHandler,
    AgentRegistrySender, AgentSender, ClusterClient, ConnectionGuard, ConnectionState,
    InputListenerStarter, ListenerHandle, MembershipEvents, RegistryListenerStarter,
};
use crate::codec;
use crate::error::{Result, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use cluster_config::{BusSettings, ChannelNames};
use parking_lot::Mutex;
use registry::{ActorClusterListener, AgentClusterListener, ViewListener};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use types::{
    ActorInputMessage, ActorKey, ActorLifecycleMessage, AgentInputMessage, AgentKey,
    AgentLifecycleMessage, Endpoint,
};

/// Message-bus cluster client
///
/// Offers membership events through heartbeats but no state transfer: a
/// process that connects late only learns about entities from the events
/// published after it subscribed.
pub struct BusClusterClient {
    endpoint: Endpoint,
    bus: Arc<dyn MessageBus>,
    channels: ChannelNames,
    settings: BusSettings,
    producers: Arc<ProducerCache>,
    monitor: Arc<HeartbeatMonitor>,
    connection: ConnectionGuard,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl BusClusterClient {
    pub fn new(
        endpoint: Endpoint,
        bus: Arc<dyn MessageBus>,
        channels: ChannelNames,
        settings: BusSettings,
    ) -> Result<Self> {
        if settings.producer_cache_capacity == 0 {
            return Err(TransportError::config_field(
                "producer cache needs room for one producer",
                "bus.producer_cache_capacity",
            ));
        }
        if settings.heartbeat_interval_ms == 0
            || settings.heartbeat_timeout_ms <= settings.heartbeat_interval_ms
        {
            return Err(TransportError::config_field(
                "heartbeat timeout must exceed a positive interval",
                "bus.heartbeat_timeout_ms",
            ));
        }

        let producers = Arc::new(ProducerCache::with_capacity(
            Arc::clone(&bus),
            settings.producer_cache_capacity,
        ));
        let monitor = Arc::new(HeartbeatMonitor::new(
            endpoint.clone(),
            settings.heartbeat_timeout(),
        ));
        Ok(Self {
            endpoint,
            bus,
            channels,
            settings,
            producers,
            monitor,
            connection: ConnectionGuard::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn monitor(&self) -> &Arc<HeartbeatMonitor> {
        &self.monitor
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.current()
    }

    fn actor_queue(&self, key: &ActorKey) -> Destination {
        Destination::Queue(key.channel_name(&self.channels.actor_prefix))
    }

    async fn publish(&self, destination: Destination, payload: Bytes, operation: &str) -> Result<()> {
        self.connection.ensure_connected(operation)?;
        let producer = self.producers.get(&destination)?;
        producer
            .send(BusFrame {
                origin: self.endpoint.clone(),
                payload,
            })
            .await
    }

    /// Subscribe and decode every frame into `T` on a dedicated task
    ///
    /// With a `stop` signal the task ends between frames once it fires, so a
    /// handler may stop its own consumer without being cancelled mid-frame.
    fn spawn_consumer<T, F, Fut>(
        &self,
        destination: Destination,
        mut stop: Option<oneshot::Receiver<()>>,
        mut on_frame: F,
    ) -> Result<()>
    where
        T: DeserializeOwned + Send + 'static,
        F: FnMut(Endpoint, T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.connection.ensure_open()?;
        let mut subscription = self.bus.subscribe(&destination)?;
        let channel = destination.to_string();
        let task_channel = channel.clone();
        let task = spawn_delivery(&channel, async move {
            loop {
                let next = match stop.as_mut() {
                    Some(stop) => tokio::select! {
                        biased;
                        _ = stop => break,
                        frame = subscription.recv() => frame,
                    },
                    None => subscription.recv().await,
                };
                let Some(frame) = next else { break };
                match codec::decode::<T>(&frame.payload) {
                    Ok(message) => on_frame(frame.origin, message).await,
                    Err(e) => warn!(
                        channel = %task_channel,
                        origin = %frame.origin,
                        error = %e,
                        "Dropping undecodable frame"
                    ),
                }
            }
        })?;

        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task.abort_handle());
        debug!(channel = %channel, endpoint = %self.endpoint, "Bus consumer started");
        Ok(())
    }

    fn start_heartbeat(&self) -> Result<()> {
        let monitor = Arc::clone(&self.monitor);
        self.spawn_consumer::<HeartbeatFrame, _, _>(
            Destination::Topic(self.channels.heartbeat.clone()),
            None,
            move |_origin, frame| {
                monitor.observe(&frame, Instant::now());
                std::future::ready(())
            },
        )?;

        let destination = Destination::Topic(self.channels.heartbeat.clone());
        let payload = codec::encode(&HeartbeatFrame::Heartbeat {
            endpoint: self.endpoint.clone(),
        })?;
        let producers = Arc::clone(&self.producers);
        let monitor = Arc::clone(&self.monitor);
        let origin = self.endpoint.clone();
        let period = self.settings.heartbeat_interval();

        let task = spawn_delivery(&destination.to_string(), async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let sent = match producers.get(&destination) {
                    Ok(producer) => {
                        producer
                            .send(BusFrame {
                                origin: origin.clone(),
                                payload: payload.clone(),
                            })
                            .await
                    }
                    Err(e) => Err(e),
                };
                if let Err(e) = sent {
                    warn!(endpoint = %origin, error = %e, "Heartbeat not sent");
                }
                monitor.sweep(Instant::now());
            }
        })?;
        self.tasks.lock().push(task.abort_handle());
        Ok(())
    }

    async fn announce_leaving(&self) {
        let destination = Destination::Topic(self.channels.heartbeat.clone());
        let frame = HeartbeatFrame::Leaving {
            endpoint: self.endpoint.clone(),
        };
        let sent = match (codec::encode(&frame), self.producers.get(&destination)) {
            (Ok(payload), Ok(producer)) => {
                producer
                    .send(BusFrame {
                        origin: self.endpoint.clone(),
                        payload,
                    })
                    .await
            }
            (Err(e), _) | (_, Err(e)) => Err(e),
        };
        if let Err(e) = sent {
            warn!(endpoint = %self.endpoint, error = %e, "Leave announcement not sent");
        }
    }
}

impl std::fmt::Debug for BusClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusClusterClient")
            .field("endpoint", &self.endpoint)
            .field("state", &self.connection.current())
            .finish()
    }
}

#[async_trait]
impl ActorSender for BusClusterClient {
    async fn send_to_actor(&self, key: &ActorKey, message: ActorInputMessage) -> Result<()> {
        let payload = codec::encode(&message)?;
        self.publish(self.actor_queue(key), payload, "send_to_actor")
            .await
    }
}

#[async_trait]
impl AgentSender for BusClusterClient {
    async fn send_to_agent(&self, message: AgentInputMessage) -> Result<()> {
        let payload = codec::encode(&message)?;
        self.publish(
            Destination::Topic(self.channels.agent_input.clone()),
            payload,
            "send_to_agent",
        )
        .await
    }
}

#[async_trait]
impl ActorRegistrySender for BusClusterClient {
    async fn send_actor_event(&self, message: ActorLifecycleMessage) -> Result<()> {
        debug!(actor = %message.key(), state = ?message.state(), "Publishing actor event");
        let payload = codec::encode(&message)?;
        self.publish(
            Destination::Topic(self.channels.actor_registry.clone()),
            payload,
            "send_actor_event",
        )
        .await
    }
}

#[async_trait]
impl AgentRegistrySender for BusClusterClient {
    async fn send_agent_event(&self, message: AgentLifecycleMessage) -> Result<()> {
        debug!(agent = %message.key(), state = ?message.state(), "Publishing agent event");
        let payload = codec::encode(&message)?;
        self.publish(
            Destination::Topic(self.channels.agent_registry.clone()),
            payload,
            "send_agent_event",
        )
        .await
    }
}

impl RegistryListenerStarter for BusClusterClient {
    fn start_actor_registry_listener(&self, listener: ActorClusterListener) -> Result<()> {
        self.spawn_consumer::<ActorLifecycleMessage, _, _>(
            Destination::Topic(self.channels.actor_registry.clone()),
            None,
            move |origin, message| {
                listener.deliver(&origin, &message);
                std::future::ready(())
            },
        )
    }

    fn start_agent_registry_listener(&self, listener: AgentClusterListener) -> Result<()> {
        self.spawn_consumer::<AgentLifecycleMessage, _, _>(
            Destination::Topic(self.channels.agent_registry.clone()),
            None,
            move |origin, message| {
                listener.deliver(&origin, &message);
                std::future::ready(())
            },
        )
    }
}

impl InputListenerStarter for BusClusterClient {
    fn start_actor_listener(
        &self,
        key: &ActorKey,
        handler: Arc<dyn ActorInputHandler>,
    ) -> Result<ListenerHandle> {
        let destination = self.actor_queue(key);
        let name = destination.name().to_string();
        let actor = key.clone();
        let (stop_tx, stop_rx) = oneshot::channel();
        self.spawn_consumer::<ActorInputMessage, _, _>(
            destination.clone(),
            Some(stop_rx),
            move |_origin, message| {
                let handler = Arc::clone(&handler);
                let actor = actor.clone();
                async move { handler.on_actor_input(&actor, message).await }
            },
        )?;
        let bus = Arc::clone(&self.bus);
        Ok(ListenerHandle::new(name, move || {
            let _ = stop_tx.send(());
            bus.release(&destination);
        }))
    }

    fn start_agent_listener(
        &self,
        agent: &AgentKey,
        handler: Arc<dyn AgentInputHandler>,
    ) -> Result<()> {
        let agent = agent.clone();
        self.spawn_consumer::<AgentInputMessage, _, _>(
            Destination::Topic(self.channels.agent_input.clone()),
            None,
            move |_origin, message| {
                let handler = Arc::clone(&handler);
                let for_us = message.is_for(&agent);
                async move {
                    if for_us {
                        handler.on_agent_input(message).await;
                    }
                }
            },
        )
    }
}

impl MembershipEvents for BusClusterClient {
    fn register_view_listener(&self, listener: Arc<dyn ViewListener>) -> Result<()> {
        self.connection.ensure_open()?;
        self.monitor.add_listener(listener);
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for BusClusterClient {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn connect(&self) -> Result<()> {
        self.connection.begin_connect()?;
        self.start_heartbeat()?;
        info!(
            endpoint = %self.endpoint,
            heartbeat_ms = self.settings.heartbeat_interval_ms,
            "Bus client connected"
        );
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let previous = self.connection.begin_close();
        if previous == ConnectionState::Closed {
            return Ok(());
        }
        if previous == ConnectionState::Connected {
            self.announce_leaving().await;
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.producers.clear();
        info!(endpoint = %self.endpoint, "Bus client closed");
        Ok(())
    }

    fn membership(&self) -> Option<&dyn MembershipEvents> {
        Some(self)
    }
}
