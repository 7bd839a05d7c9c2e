//! In-process message bus
//!
//! Queues keep at most one consumer and buffer frames while none is
//! attached, up to a backlog limit past which the oldest frames are dropped.
//! Releasing a queue forgets it together with its backlog. Topics deliver
//! each frame to every subscriber registered at publish time; subscribers
//! whose receiver was dropped are pruned lazily.

use super::{BusFrame, BusProducer, BusSubscription, Destination, MessageBus};
use crate::error::{Result, TransportError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Frames kept per queue while no consumer is attached
pub const DEFAULT_BACKLOG_LIMIT: usize = 1024;

#[derive(Default)]
struct QueueState {
    consumer: Option<mpsc::UnboundedSender<BusFrame>>,
    backlog: VecDeque<BusFrame>,
}

struct BusState {
    queues: DashMap<String, QueueState>,
    topics: DashMap<String, Vec<mpsc::UnboundedSender<BusFrame>>>,
    producers_created: AtomicU64,
    backlog_limit: usize,
}

impl BusState {
    fn publish(&self, destination: &Destination, frame: BusFrame) {
        match destination {
            Destination::Queue(name) => {
                let mut queue = self.queues.entry(name.clone()).or_default();
                let frame = match queue.consumer.as_ref() {
                    Some(consumer) => match consumer.send(frame) {
                        Ok(()) => return,
                        Err(mpsc::error::SendError(frame)) => frame,
                    },
                    None => frame,
                };
                queue.consumer = None;
                if self.backlog_limit == 0 {
                    trace!(queue = %name, "Frame dropped, queue keeps no backlog");
                    return;
                }
                if queue.backlog.len() >= self.backlog_limit {
                    queue.backlog.pop_front();
                    warn!(queue = %name, limit = self.backlog_limit, "Backlog full, oldest frame dropped");
                }
                queue.backlog.push_back(frame);
                trace!(queue = %name, backlog = queue.backlog.len(), "Frame buffered");
            }
            Destination::Topic(name) => {
                if let Some(mut subscribers) = self.topics.get_mut(name) {
                    subscribers.retain(|subscriber| subscriber.send(frame.clone()).is_ok());
                }
            }
        }
    }
}

/// Shared in-memory broker; clones talk to the same bus
#[derive(Clone)]
pub struct InMemoryBus {
    state: Arc<BusState>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::with_backlog_limit(DEFAULT_BACKLOG_LIMIT)
    }
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus whose queues buffer at most `limit` frames each
    pub fn with_backlog_limit(limit: usize) -> Self {
        Self {
            state: Arc::new(BusState {
                queues: DashMap::new(),
                topics: DashMap::new(),
                producers_created: AtomicU64::new(0),
                backlog_limit: limit,
            }),
        }
    }

    /// Number of producers opened since creation
    pub fn producers_created(&self) -> u64 {
        self.state.producers_created.load(Ordering::Relaxed)
    }

    /// Frames waiting for a queue consumer
    pub fn backlog(&self, queue: &str) -> usize {
        self.state
            .queues
            .get(queue)
            .map(|q| q.backlog.len())
            .unwrap_or(0)
    }

    /// Queues currently known to the bus, with or without a consumer
    pub fn queue_count(&self) -> usize {
        self.state.queues.len()
    }

    pub fn topic_subscribers(&self, topic: &str) -> usize {
        self.state
            .topics
            .get(topic)
            .map(|subs| subs.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for InMemoryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBus")
            .field("queues", &self.state.queues.len())
            .field("topics", &self.state.topics.len())
            .finish()
    }
}

impl MessageBus for InMemoryBus {
    fn create_producer(&self, destination: &Destination) -> Result<Arc<dyn BusProducer>> {
        self.state.producers_created.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(InMemoryProducer {
            state: Arc::clone(&self.state),
            destination: destination.clone(),
        }))
    }

    fn subscribe(&self, destination: &Destination) -> Result<BusSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        match destination {
            Destination::Queue(name) => {
                let mut queue = self.state.queues.entry(name.clone()).or_default();
                if queue.consumer.as_ref().is_some_and(|c| !c.is_closed()) {
                    return Err(TransportError::listener_setup(
                        name.clone(),
                        "queue already has a consumer",
                    ));
                }
                while let Some(frame) = queue.backlog.pop_front() {
                    // Receiver is held locally, send cannot fail
                    let _ = tx.send(frame);
                }
                queue.consumer = Some(tx);
            }
            Destination::Topic(name) => {
                self.state.topics.entry(name.clone()).or_default().push(tx);
            }
        }
        Ok(rx)
    }

    fn release(&self, destination: &Destination) {
        if let Destination::Queue(name) = destination {
            if let Some((_, queue)) = self.state.queues.remove(name) {
                debug!(queue = %name, dropped = queue.backlog.len(), "Queue released");
            }
        }
    }
}

struct InMemoryProducer {
    state: Arc<BusState>,
    destination: Destination,
}

#[async_trait]
impl BusProducer for InMemoryProducer {
    fn destination(&self) -> &Destination {
        &self.destination
    }

    async fn send(&self, frame: BusFrame) -> Result<()> {
        self.state.publish(&self.destination, frame);
        Ok(())
    }
}
