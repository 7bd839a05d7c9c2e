//! # Lifecycle Message Protocol
//!
//! Immutable events describing one state transition of an actor or an agent.
//! Each variant carries exactly the payload its state requires, and the named
//! factories take exactly those fields, so an incomplete message (a FAILED
//! event without a cause, say) cannot be built.
//!
//! [`ActorLifecycleMessage::send_to`] and [`AgentLifecycleMessage::send_to`]
//! are the single dispatch points used by every transport: in-process and
//! remote delivery reach the listener callbacks through the same match.

use crate::common::errors::FailureCause;
use crate::common::identifiers::{ActorKey, AgentKey};
use crate::model::{ActorDeployInfo, ActorState, AgentRegistration, AgentState};
use serde::{Deserialize, Serialize};

/// Observer of actor lifecycle transitions
///
/// Callbacks run on transport delivery tasks and must return quickly.
pub trait ActorRegistryListener: Send + Sync {
    fn on_actor_created(&self, actor: &ActorKey, agent: &AgentKey);

    fn on_actor_initialized(&self, actor: &ActorKey, deploy_info: &ActorDeployInfo);

    fn on_actor_failed(&self, actor: &ActorKey, cause: &FailureCause);

    fn on_actor_closed(&self, actor: &ActorKey);
}

/// Observer of agent lifecycle transitions
pub trait AgentRegistryListener: Send + Sync {
    fn on_agent_created(&self, agent: &AgentKey, registration: &AgentRegistration);

    fn on_agent_failed(&self, agent: &AgentKey, cause: &FailureCause);

    fn on_agent_closed(&self, agent: &AgentKey);
}

/// One actor state transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorLifecycleMessage {
    Created {
        actor: ActorKey,
        agent: AgentKey,
    },
    Initialized {
        actor: ActorKey,
        deploy_info: ActorDeployInfo,
    },
    Failed {
        actor: ActorKey,
        cause: FailureCause,
    },
    Closed {
        actor: ActorKey,
    },
}

impl ActorLifecycleMessage {
    pub fn created(actor: ActorKey, agent: AgentKey) -> Self {
        Self::Created { actor, agent }
    }

    pub fn initialized(actor: ActorKey, deploy_info: ActorDeployInfo) -> Self {
        Self::Initialized { actor, deploy_info }
    }

    pub fn failed(actor: ActorKey, cause: impl Into<FailureCause>) -> Self {
        Self::Failed {
            actor,
            cause: cause.into(),
        }
    }

    pub fn closed(actor: ActorKey) -> Self {
        Self::Closed { actor }
    }

    /// Actor this transition belongs to
    pub fn key(&self) -> &ActorKey {
        match self {
            Self::Created { actor, .. }
            | Self::Initialized { actor, .. }
            | Self::Failed { actor, .. }
            | Self::Closed { actor } => actor,
        }
    }

    pub fn state(&self) -> ActorState {
        match self {
            Self::Created { .. } => ActorState::Created,
            Self::Initialized { .. } => ActorState::Initialized,
            Self::Failed { .. } => ActorState::Failed,
            Self::Closed { .. } => ActorState::Closed,
        }
    }

    /// Deliver this transition to the matching listener callback
    pub fn send_to(&self, listener: &dyn ActorRegistryListener) {
        match self {
            Self::Created { actor, agent } => listener.on_actor_created(actor, agent),
            Self::Initialized { actor, deploy_info } => {
                listener.on_actor_initialized(actor, deploy_info)
            }
            Self::Failed { actor, cause } => listener.on_actor_failed(actor, cause),
            Self::Closed { actor } => listener.on_actor_closed(actor),
        }
    }
}

/// One agent state transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentLifecycleMessage {
    Created {
        agent: AgentKey,
        registration: AgentRegistration,
    },
    Failed {
        agent: AgentKey,
        cause: FailureCause,
    },
    Closed {
        agent: AgentKey,
    },
}

impl AgentLifecycleMessage {
    pub fn created(agent: AgentKey, registration: AgentRegistration) -> Self {
        Self::Created {
            agent,
            registration,
        }
    }

    pub fn failed(agent: AgentKey, cause: impl Into<FailureCause>) -> Self {
        Self::Failed {
            agent,
            cause: cause.into(),
        }
    }

    pub fn closed(agent: AgentKey) -> Self {
        Self::Closed { agent }
    }

    pub fn key(&self) -> &AgentKey {
        match self {
            Self::Created { agent, .. } | Self::Failed { agent, .. } | Self::Closed { agent } => {
                agent
            }
        }
    }

    pub fn state(&self) -> AgentState {
        match self {
            Self::Created { .. } => AgentState::Created,
            Self::Failed { .. } => AgentState::Failed,
            Self::Closed { .. } => AgentState::Closed,
        }
    }

    /// Deliver this transition to the matching listener callback
    pub fn send_to(&self, listener: &dyn AgentRegistryListener) {
        match self {
            Self::Created {
                agent,
                registration,
            } => listener.on_agent_created(agent, registration),
            Self::Failed { agent, cause } => listener.on_agent_failed(agent, cause),
            Self::Closed { agent } => listener.on_agent_closed(agent),
        }
    }
}
