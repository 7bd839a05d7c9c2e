//! Input messages addressed to actors and agents
//!
//! Actor input is delivered in order on the actor's own channel. Agent input
//! is broadcast to every agent and filtered by the target key it carries.

use crate::common::identifiers::{ActorKey, AgentKey};
use crate::model::ActorConfig;
use serde::{Deserialize, Serialize};

/// Command for a single actor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorInputMessage {
    /// Initialize the actor; answered with INITIALIZED or FAILED
    Bootstrap,
    /// Close the actor; answered with CLOSED or FAILED
    Close,
    /// Flush the actor's metrics to the metrics sink
    DumpMetrics,
    /// Application payload from another actor (or the leader)
    Message {
        from: ActorKey,
        payload: serde_json::Value,
    },
}

impl ActorInputMessage {
    pub fn message(from: ActorKey, payload: serde_json::Value) -> Self {
        Self::Message { from, payload }
    }

    /// Short name used in logs
    pub fn command_name(&self) -> &'static str {
        match self {
            Self::Bootstrap => "BOOTSTRAP",
            Self::Close => "CLOSE",
            Self::DumpMetrics => "DUMP_METRICS",
            Self::Message { .. } => "MESSAGE",
        }
    }
}

/// Command for an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentCommand {
    CreateActor { config: ActorConfig },
    CloseActor { actor: ActorKey },
}

/// Agent command plus the key of the agent it is meant for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInputMessage {
    pub target: AgentKey,
    pub command: AgentCommand,
}

impl AgentInputMessage {
    pub fn create_actor(target: AgentKey, config: ActorConfig) -> Self {
        Self {
            target,
            command: AgentCommand::CreateActor { config },
        }
    }

    pub fn close_actor(target: AgentKey, actor: ActorKey) -> Self {
        Self {
            target,
            command: AgentCommand::CloseActor { actor },
        }
    }

    pub fn is_for(&self, agent: &AgentKey) -> bool {
        &self.target == agent
    }
}
