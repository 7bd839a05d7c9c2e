//! Per-destination producer cache
//!
//! Opening a producer can be expensive on a real broker, so producers are
//! reused across sends. The cache is bounded and evicts the least recently
//! used producer. Producers are shared through `Arc`, so a send that already
//! holds one finishes even if the cache evicts it meanwhile.

use super::{BusProducer, Destination, MessageBus};
use crate::error::{Result, TransportError};
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use std::sync::Arc;

pub struct ProducerCache {
    bus: Arc<dyn MessageBus>,
    cache: Cache<String, Arc<dyn BusProducer>>,
}

impl ProducerCache {
    pub fn with_capacity(bus: Arc<dyn MessageBus>, capacity: u64) -> Self {
        Self {
            bus,
            cache: Cache::builder()
                .max_capacity(capacity)
                .eviction_policy(EvictionPolicy::lru())
                .build(),
        }
    }

    /// Cached producer for `destination`, opening one on a miss
    pub fn get(&self, destination: &Destination) -> Result<Arc<dyn BusProducer>> {
        self.cache
            .try_get_with(destination.cache_key(), || {
                self.bus.create_producer(destination)
            })
            .map_err(|e| {
                TransportError::send(destination.to_string(), format!("cannot open producer: {e}"))
            })
    }

    /// Number of cached producers after pending evictions settle
    pub fn len(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}

impl std::fmt::Debug for ProducerCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerCache")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusFrame, InMemoryBus};
    use bytes::Bytes;
    use types::Endpoint;

    #[test]
    fn test_hits_reuse_the_same_producer() {
        let bus = InMemoryBus::new();
        let cache = ProducerCache::with_capacity(Arc::new(bus.clone()), 4);
        let queue = Destination::Queue("q".into());
        let a = cache.get(&queue).unwrap();
        let b = cache.get(&queue).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(bus.producers_created(), 1);
    }

    #[test]
    fn test_capacity_is_bounded() {
        let bus = InMemoryBus::new();
        let cache = ProducerCache::with_capacity(Arc::new(bus.clone()), 2);
        for n in 0..10 {
            cache.get(&Destination::Queue(format!("q{n}"))).unwrap();
        }
        assert!(cache.len() <= 2);
        assert_eq!(bus.producers_created(), 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_eviction_under_concurrent_sends_loses_nothing() {
        let bus = InMemoryBus::new();
        let cache = Arc::new(ProducerCache::with_capacity(Arc::new(bus.clone()), 2));
        let destinations: Vec<_> = (0..8)
            .map(|n| Destination::Queue(format!("fleet.actor.a{n}")))
            .collect();
        let mut receivers: Vec<_> = destinations
            .iter()
            .map(|d| bus.subscribe(d).unwrap())
            .collect();

        let per_sender = 50;
        let mut tasks = Vec::new();
        for (i, destination) in destinations.iter().cloned().enumerate() {
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move {
                for n in 0..per_sender {
                    let producer = cache.get(&destination).unwrap();
                    tokio::task::yield_now().await;
                    producer
                        .send(BusFrame {
                            origin: Endpoint::new(format!("sender-{i}")),
                            payload: Bytes::from(format!("{n}")),
                        })
                        .await
                        .unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        for rx in receivers.iter_mut() {
            for n in 0..per_sender {
                let frame = rx.recv().await.unwrap();
                assert_eq!(frame.payload, Bytes::from(format!("{n}")));
            }
        }
    }
}
