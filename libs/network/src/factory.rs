//! Client construction from cluster configuration

use crate::bus::{BusClusterClient, InMemoryBus, MessageBus};
use crate::client::ClusterClient;
use crate::error::Result;
use crate::group::{GroupClusterClient, GroupHub};
use cluster_config::{ClusterConfig, TransportKind};
use std::sync::Arc;
use tracing::info;
use types::Endpoint;

/// Shared transport backends a process connects through
#[derive(Clone)]
pub struct Backends {
    pub bus: Arc<dyn MessageBus>,
    pub hub: GroupHub,
}

impl Backends {
    /// In-process bus and hub, shared by every client built from the clone
    pub fn in_memory() -> Self {
        Self {
            bus: Arc::new(InMemoryBus::new()),
            hub: GroupHub::new(),
        }
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends").field("hub", &self.hub).finish_non_exhaustive()
    }
}

/// Build the client selected by `config.transport`
pub fn create_client(
    config: &ClusterConfig,
    endpoint: Endpoint,
    backends: &Backends,
) -> Result<Arc<dyn ClusterClient>> {
    info!(transport = ?config.transport, endpoint = %endpoint, "Creating cluster client");
    let client: Arc<dyn ClusterClient> = match config.transport {
        TransportKind::Bus => Arc::new(BusClusterClient::new(
            endpoint,
            Arc::clone(&backends.bus),
            config.channels.clone(),
            config.bus.clone(),
        )?),
        TransportKind::Group => Arc::new(GroupClusterClient::new(
            endpoint,
            backends.hub.clone(),
            config.group.clone(),
        )?),
    };
    Ok(client)
}

/// Fresh endpoint name for a process playing `role`
pub fn unique_endpoint(role: &str) -> Endpoint {
    Endpoint::new(format!("{}-{}", role, uuid::Uuid::new_v4().simple()))
}
