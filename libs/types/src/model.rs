//! # Cluster Data Model
//!
//! Configuration handed to agents when an actor is placed, and the entries the
//! actor and agent registries hold. Every registry entry remembers the
//! [`Endpoint`] that delivered its CREATED event so that losing that endpoint
//! can be mapped back to the entries it owned.

use crate::common::errors::ValidationError;
use crate::common::identifiers::{require_key, ActorKey, AgentKey, Endpoint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placement and process-model preferences of an actor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Run the actor in its own OS process instead of inside the agent
    #[serde(default)]
    pub forked: bool,

    /// Hosts the actor would like to run on, in no particular order
    #[serde(default, alias = "preferredHosts")]
    pub preferred_hosts: Vec<String>,

    /// Extra arguments for the forked actor process
    #[serde(default, alias = "jvm_args", alias = "jvmArgs")]
    pub process_args: Vec<String>,
}

impl DeployConfig {
    /// Embedded deployment with no host preference
    pub fn embedded() -> Self {
        Self::default()
    }

    /// Forked deployment with the given process arguments
    pub fn forked(process_args: Vec<String>) -> Self {
        Self {
            forked: true,
            preferred_hosts: Vec::new(),
            process_args,
        }
    }

    pub fn with_preferred_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preferred_hosts = hosts.into_iter().map(Into::into).collect();
        self
    }
}

/// Everything an agent needs to construct an actor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorConfig {
    pub key: ActorKey,

    /// Implementation class resolved by the agent's actor manager
    #[serde(alias = "className")]
    pub class_name: String,

    #[serde(default)]
    pub deploy: DeployConfig,

    /// Opaque configuration handed to the actor implementation
    #[serde(default)]
    pub config: serde_json::Value,
}

impl ActorConfig {
    pub fn new(key: impl Into<ActorKey>, class_name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            class_name: class_name.into(),
            deploy: DeployConfig::default(),
            config: serde_json::Value::Null,
        }
    }

    pub fn with_deploy(mut self, deploy: DeployConfig) -> Self {
        self.deploy = deploy;
        self
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    /// Reject configs that can never produce an actor
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_key(&self.key, "actor")?;
        if self.class_name.trim().is_empty() {
            return Err(ValidationError::EmptyClassName {
                key: self.key.to_string(),
            });
        }
        Ok(())
    }
}

/// Actor lifecycle states
///
/// CREATED → INITIALIZED → FAILED | CLOSED. Terminal states remove the
/// registry entry, so a live entry is only ever CREATED or INITIALIZED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorState {
    Created,
    Initialized,
    Failed,
    Closed,
}

impl ActorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ActorState::Failed | ActorState::Closed)
    }
}

/// Agent lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    Created,
    Failed,
    Closed,
}

/// Where and how an initialized actor runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorDeployInfo {
    pub endpoint: Endpoint,
    pub pid: Option<u32>,
    pub command: Option<String>,
}

/// Registry view of a live actor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredActor {
    pub key: ActorKey,
    pub agent: AgentKey,
    pub state: ActorState,
    pub deploy_info: Option<ActorDeployInfo>,
    /// Endpoint that announced the actor
    pub endpoint: Endpoint,
}

impl RegisteredActor {
    pub fn created(key: ActorKey, agent: AgentKey, endpoint: Endpoint) -> Self {
        Self {
            key,
            agent,
            state: ActorState::Created,
            deploy_info: None,
            endpoint,
        }
    }
}

/// Snapshot of the host an agent runs on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSystemInfo {
    pub host: String,
    pub os: String,
    pub cpus: usize,
    pub pid: u32,
}

impl AgentSystemInfo {
    /// Describe the current process
    ///
    /// The host name comes from `FLEET_HOST`, then `HOSTNAME`, falling back
    /// to `localhost`.
    pub fn current() -> Self {
        let host = std::env::var("FLEET_HOST")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| "localhost".to_string());
        Self {
            host,
            os: std::env::consts::OS.to_string(),
            cpus: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            pid: std::process::id(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }
}

/// Payload of an agent's CREATED event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub system: AgentSystemInfo,
    pub created_at: DateTime<Utc>,
}

impl AgentRegistration {
    pub fn new(system: AgentSystemInfo) -> Self {
        Self {
            system,
            created_at: Utc::now(),
        }
    }
}

/// Registry view of a live agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredAgent {
    pub key: AgentKey,
    pub system: AgentSystemInfo,
    pub created_at: DateTime<Utc>,
    pub endpoint: Endpoint,
}

impl RegisteredAgent {
    pub fn new(key: AgentKey, registration: AgentRegistration, endpoint: Endpoint) -> Self {
        Self {
            key,
            system: registration.system,
            created_at: registration.created_at,
            endpoint,
        }
    }

    pub fn host(&self) -> &str {
        &self.system.host
    }
}
