//! Shared helpers for transport integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use network::{ActorInputHandler, AgentInputHandler};
use parking_lot::Mutex;
use std::time::Duration;
use types::{ActorInputMessage, ActorKey, AgentInputMessage};

/// Poll `condition` until it holds or two seconds pass
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[derive(Default)]
pub struct RecordingActorInput {
    pub received: Mutex<Vec<(ActorKey, ActorInputMessage)>>,
}

impl RecordingActorInput {
    pub fn count(&self) -> usize {
        self.received.lock().len()
    }
}

#[async_trait]
impl ActorInputHandler for RecordingActorInput {
    async fn on_actor_input(&self, key: &ActorKey, message: ActorInputMessage) {
        self.received.lock().push((key.clone(), message));
    }
}

#[derive(Default)]
pub struct RecordingAgentInput {
    pub received: Mutex<Vec<AgentInputMessage>>,
}

impl RecordingAgentInput {
    pub fn count(&self) -> usize {
        self.received.lock().len()
    }
}

#[async_trait]
impl AgentInputHandler for RecordingAgentInput {
    async fn on_agent_input(&self, message: AgentInputMessage) {
        self.received.lock().push(message);
    }
}

pub fn payload(n: u64) -> ActorInputMessage {
    ActorInputMessage::message(ActorKey::new("test"), serde_json::json!({ "n": n }))
}
