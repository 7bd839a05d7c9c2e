//! Message-Bus Transport
//!
//! Point-to-point actor input goes to one durable queue per actor key;
//! registry events fan out on one topic per entity kind. The broker itself is
//! behind [`MessageBus`]; [`InMemoryBus`] is the in-process backend.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use types::Endpoint;

pub mod cache;
pub mod client;
pub mod heartbeat;
pub mod memory;

pub use cache::ProducerCache;
pub use client::BusClusterClient;
pub use heartbeat::{HeartbeatFrame, HeartbeatMonitor};
pub use memory::InMemoryBus;

/// Addressable bus channel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Single consumer, buffered until one subscribes
    Queue(String),
    /// Every current subscriber receives every message
    Topic(String),
}

impl Destination {
    pub fn name(&self) -> &str {
        match self {
            Destination::Queue(name) | Destination::Topic(name) => name,
        }
    }

    /// Producer cache key
    pub fn cache_key(&self) -> String {
        match self {
            Destination::Queue(name) => format!("queue://{name}"),
            Destination::Topic(name) => format!("topic://{name}"),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cache_key())
    }
}

/// One message on the bus, stamped with the sender's endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusFrame {
    pub origin: Endpoint,
    pub payload: Bytes,
}

/// Receiving side of a subscription; dropping it unsubscribes
pub type BusSubscription = mpsc::UnboundedReceiver<BusFrame>;

/// Broker abstraction
pub trait MessageBus: Send + Sync {
    /// Open a producer for one destination
    fn create_producer(&self, destination: &Destination) -> Result<Arc<dyn BusProducer>>;

    fn subscribe(&self, destination: &Destination) -> Result<BusSubscription>;

    /// Forget a queue, its consumer and its backlog; topics are left alone
    fn release(&self, destination: &Destination);
}

/// Sending handle bound to one destination
#[async_trait]
pub trait BusProducer: Send + Sync {
    fn destination(&self) -> &Destination;

    async fn send(&self, frame: BusFrame) -> Result<()>;
}
