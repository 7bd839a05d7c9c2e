//! Heartbeat-based failure detection for the message bus
//!
//! The bus has no membership of its own. Every bus client publishes a
//! heartbeat on the heartbeat topic each interval and a `Leaving` frame when
//! it closes. The monitor tracks when each peer was last heard from and
//! reports a peer as gone, exactly once per incarnation, when it leaves or
//! stays silent past the timeout.

use parking_lot::Mutex;
use registry::{ViewEvent, ViewListener};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use types::Endpoint;

/// Frame carried on the heartbeat topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HeartbeatFrame {
    Heartbeat { endpoint: Endpoint },
    Leaving { endpoint: Endpoint },
}

pub struct HeartbeatMonitor {
    local: Endpoint,
    timeout: Duration,
    last_seen: Mutex<HashMap<Endpoint, Instant>>,
    listeners: Mutex<Vec<Arc<dyn ViewListener>>>,
}

impl HeartbeatMonitor {
    pub fn new(local: Endpoint, timeout: Duration) -> Self {
        Self {
            local,
            timeout,
            last_seen: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn ViewListener>) {
        self.listeners.lock().push(listener);
    }

    /// Record a frame received at `now`
    pub fn observe(&self, frame: &HeartbeatFrame, now: Instant) {
        match frame {
            HeartbeatFrame::Heartbeat { endpoint } => {
                if endpoint == &self.local {
                    return;
                }
                let joined = self
                    .last_seen
                    .lock()
                    .insert(endpoint.clone(), now)
                    .is_none();
                if joined {
                    debug!(endpoint = %endpoint, "Peer heartbeat first seen");
                    self.emit(&ViewEvent::MemberJoined(endpoint.clone()));
                }
            }
            HeartbeatFrame::Leaving { endpoint } => {
                if self.last_seen.lock().remove(endpoint).is_some() {
                    info!(endpoint = %endpoint, "Peer left");
                    self.emit(&ViewEvent::MemberLeft(endpoint.clone()));
                }
            }
        }
    }

    /// Expire peers silent for longer than the timeout
    pub fn sweep(&self, now: Instant) -> Vec<Endpoint> {
        let expired: Vec<Endpoint> = {
            let mut last_seen = self.last_seen.lock();
            let expired: Vec<Endpoint> = last_seen
                .iter()
                .filter(|(_, seen)| now.saturating_duration_since(**seen) > self.timeout)
                .map(|(endpoint, _)| endpoint.clone())
                .collect();
            for endpoint in &expired {
                last_seen.remove(endpoint);
            }
            expired
        };

        for endpoint in &expired {
            warn!(
                endpoint = %endpoint,
                timeout_ms = self.timeout.as_millis() as u64,
                "Peer heartbeat timed out"
            );
            self.emit(&ViewEvent::MemberLeft(endpoint.clone()));
        }
        expired
    }

    pub fn live_peers(&self) -> Vec<Endpoint> {
        let mut peers: Vec<_> = self.last_seen.lock().keys().cloned().collect();
        peers.sort();
        peers
    }

    fn emit(&self, event: &ViewEvent) {
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener.on_view_event(event);
        }
    }
}

impl std::fmt::Debug for HeartbeatMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatMonitor")
            .field("local", &self.local)
            .field("timeout", &self.timeout)
            .field("peers", &self.last_seen.lock().len())
            .finish()
    }
}
