//! Runtime actor contracts and the embedded actor manager
//!
//! User actor code lives behind [`RuntimeActor`]; an [`ActorManager`] turns
//! an [`ActorConfig`] into a running actor. Errors from user code are
//! `anyhow::Error` and become FAILED lifecycle events at the agent.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use types::{ActorConfig, ActorKey, ValidationError};

/// A unit of work hosted by an agent
#[async_trait]
pub trait RuntimeActor: Send + Sync {
    fn key(&self) -> &ActorKey;

    async fn init(&self) -> Result<()>;

    async fn on_message(&self, from: &ActorKey, payload: serde_json::Value) -> Result<()>;

    /// Push accumulated metrics to the metrics sink
    async fn dump_and_flush_metrics(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    /// Process the actor runs in
    fn pid(&self) -> Option<u32> {
        Some(std::process::id())
    }

    /// Command line of a forked actor process
    fn command(&self) -> Option<String> {
        None
    }
}

/// Builds runtime actors from their configuration
#[async_trait]
pub trait ActorManager: Send + Sync {
    async fn create_actor(&self, config: &ActorConfig) -> Result<Arc<dyn RuntimeActor>>;

    /// Release manager-wide resources
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Constructor for one actor class
pub type ActorFactory = Arc<dyn Fn(&ActorConfig) -> Result<Arc<dyn RuntimeActor>> + Send + Sync>;

/// Runs actors inside the agent process, resolved by class name
#[derive(Default, Clone)]
pub struct EmbeddedActorManager {
    factories: HashMap<String, ActorFactory>,
}

impl EmbeddedActorManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_factory<F>(mut self, class_name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ActorConfig) -> Result<Arc<dyn RuntimeActor>> + Send + Sync + 'static,
    {
        self.register(class_name, factory);
        self
    }

    pub fn register<F>(&mut self, class_name: impl Into<String>, factory: F)
    where
        F: Fn(&ActorConfig) -> Result<Arc<dyn RuntimeActor>> + Send + Sync + 'static,
    {
        self.factories.insert(class_name.into(), Arc::new(factory));
    }

    pub fn classes(&self) -> Vec<&str> {
        let mut classes: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        classes.sort_unstable();
        classes
    }
}

#[async_trait]
impl ActorManager for EmbeddedActorManager {
    async fn create_actor(&self, config: &ActorConfig) -> Result<Arc<dyn RuntimeActor>> {
        let factory = self.factories.get(&config.class_name).ok_or_else(|| {
            ValidationError::UnknownActorClass {
                class_name: config.class_name.clone(),
            }
        })?;
        debug!(actor = %config.key, class = %config.class_name, "Constructing embedded actor");
        factory(config)
    }
}

impl std::fmt::Debug for EmbeddedActorManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedActorManager")
            .field("classes", &self.classes())
            .finish()
    }
}

/// The managers an agent creates actors through
///
/// Forked deployment is optional; an agent without a forked manager rejects
/// actors that ask for their own process.
#[derive(Clone)]
pub struct ActorManagers {
    pub embedded: Arc<dyn ActorManager>,
    pub forked: Option<Arc<dyn ActorManager>>,
}

impl ActorManagers {
    pub fn embedded(manager: impl ActorManager + 'static) -> Self {
        Self {
            embedded: Arc::new(manager),
            forked: None,
        }
    }

    pub fn with_forked(mut self, manager: impl ActorManager + 'static) -> Self {
        self.forked = Some(Arc::new(manager));
        self
    }

    /// Manager responsible for `config`'s deployment
    pub fn select(&self, config: &ActorConfig) -> Result<&Arc<dyn ActorManager>, ValidationError> {
        if !config.deploy.forked {
            return Ok(&self.embedded);
        }
        self.forked
            .as_ref()
            .ok_or_else(|| ValidationError::ForkedUnsupported {
                key: config.key.to_string(),
            })
    }

    pub(crate) fn all(&self) -> impl Iterator<Item = &Arc<dyn ActorManager>> {
        std::iter::once(&self.embedded).chain(self.forked.iter())
    }
}
