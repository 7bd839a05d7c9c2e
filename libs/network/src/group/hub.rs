//! In-process group communication hub
//!
//! Models a process-wide broadcast group with membership views and state
//! transfer. Each member owns an ordered delivery queue; the hub pushes
//! broadcasts, view changes and state-transfer traffic into those queues.
//!
//! State transfer on join works through the coordinator's own queue: the
//! joiner is added to the view first, then a state request is queued behind
//! everything the coordinator has yet to apply. The coordinator answers with
//! a snapshot reflecting exactly the traffic that preceded the join, while
//! the joiner holds back later traffic until that snapshot arrives.
//!
//! Only members that registered state holders can coordinate. A member
//! without holders neither answers nor asks for state.

use crate::error::{Result, TransportError};
use bytes::Bytes;
use parking_lot::Mutex;
use registry::ViewEvent;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};
use types::Endpoint;

/// Named state snapshots keyed by holder name
pub type GroupState = HashMap<String, Vec<u8>>;

/// Item on a member's delivery queue
#[derive(Debug, Clone)]
pub enum GroupDelivery {
    Broadcast { origin: Endpoint, payload: Bytes },
    View(ViewEvent),
    /// Ask this member (the coordinator) for its state on behalf of a joiner
    StateRequest { joiner: Endpoint },
    State(GroupState),
}

struct Member {
    endpoint: Endpoint,
    queue: mpsc::UnboundedSender<GroupDelivery>,
    holds_state: bool,
}

#[derive(Default)]
struct Group {
    /// Join order, oldest first; the oldest state holder coordinates
    members: Vec<Member>,
    awaiting_state: HashSet<Endpoint>,
}

impl Group {
    fn push(&self, endpoint: &Endpoint, delivery: GroupDelivery) {
        if let Some(member) = self.members.iter().find(|m| &m.endpoint == endpoint) {
            if member.queue.send(delivery).is_err() {
                trace!(member = %endpoint, "Delivery queue closed");
            }
        }
    }

    /// Oldest member able to answer a state request
    fn coordinator_for(&self, joiner: &Endpoint) -> Option<&Endpoint> {
        self.members
            .iter()
            .filter(|m| m.holds_state)
            .map(|m| &m.endpoint)
            .find(|e| *e != joiner && !self.awaiting_state.contains(*e))
    }

    fn view(&self) -> Vec<Endpoint> {
        self.members.iter().map(|m| m.endpoint.clone()).collect()
    }
}

/// Shared group hub; clones refer to the same set of groups
#[derive(Clone, Default)]
pub struct GroupHub {
    groups: Arc<Mutex<HashMap<String, Group>>>,
}

/// Result of joining a group
pub struct Joined {
    pub channel: GroupChannel,
    pub deliveries: mpsc::UnboundedReceiver<GroupDelivery>,
    /// Whether a state snapshot will be delivered before normal traffic
    pub awaits_state: bool,
}

impl GroupHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `endpoint` to the group's view
    ///
    /// With `holds_state` set, the joiner receives a snapshot from the oldest
    /// settled state holder, or starts empty when there is none.
    pub fn join(&self, cluster: &str, endpoint: Endpoint, holds_state: bool) -> Result<Joined> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut groups = self.groups.lock();
        let group = groups.entry(cluster.to_string()).or_default();
        if group.members.iter().any(|m| m.endpoint == endpoint) {
            return Err(TransportError::listener_setup(
                cluster,
                format!("endpoint {endpoint} already joined"),
            ));
        }

        for member in &group.members {
            let _ = member
                .queue
                .send(GroupDelivery::View(ViewEvent::MemberJoined(endpoint.clone())));
        }
        group.members.push(Member {
            endpoint: endpoint.clone(),
            queue: tx,
            holds_state,
        });
        group.push(&endpoint, GroupDelivery::View(ViewEvent::InitialView(group.view())));

        let coordinator = if holds_state {
            group.coordinator_for(&endpoint).cloned()
        } else {
            None
        };
        let awaits_state = match coordinator {
            Some(coordinator) => {
                group.awaiting_state.insert(endpoint.clone());
                group.push(
                    &coordinator,
                    GroupDelivery::StateRequest {
                        joiner: endpoint.clone(),
                    },
                );
                debug!(joiner = %endpoint, coordinator = %coordinator, "State requested");
                true
            }
            None => false,
        };

        info!(cluster, member = %endpoint, size = group.members.len(), "Member joined group");
        Ok(Joined {
            channel: GroupChannel {
                hub: self.clone(),
                cluster: cluster.to_string(),
                endpoint,
            },
            deliveries: rx,
            awaits_state,
        })
    }

    pub fn members(&self, cluster: &str) -> Vec<Endpoint> {
        self.groups
            .lock()
            .get(cluster)
            .map(Group::view)
            .unwrap_or_default()
    }

    fn broadcast(&self, cluster: &str, origin: &Endpoint, payload: Bytes) -> Result<()> {
        let groups = self.groups.lock();
        let group = groups
            .get(cluster)
            .filter(|g| g.members.iter().any(|m| &m.endpoint == origin))
            .ok_or(TransportError::Closed)?;
        for member in &group.members {
            let _ = member.queue.send(GroupDelivery::Broadcast {
                origin: origin.clone(),
                payload: payload.clone(),
            });
        }
        Ok(())
    }

    fn provide_state(&self, cluster: &str, joiner: &Endpoint, state: GroupState) {
        let mut groups = self.groups.lock();
        if let Some(group) = groups.get_mut(cluster) {
            if group.awaiting_state.remove(joiner) {
                group.push(joiner, GroupDelivery::State(state));
            }
        }
    }

    fn leave(&self, cluster: &str, endpoint: &Endpoint) {
        let mut groups = self.groups.lock();
        let Some(group) = groups.get_mut(cluster) else {
            return;
        };
        let before = group.members.len();
        group.members.retain(|m| &m.endpoint != endpoint);
        if group.members.len() == before {
            return;
        }
        group.awaiting_state.remove(endpoint);

        for member in &group.members {
            let _ = member
                .queue
                .send(GroupDelivery::View(ViewEvent::MemberLeft(endpoint.clone())));
        }

        // Requests queued at the departed coordinator are lost; re-issue them
        let waiting: Vec<Endpoint> = group
            .members
            .iter()
            .map(|m| m.endpoint.clone())
            .filter(|e| group.awaiting_state.contains(e))
            .collect();
        for joiner in waiting {
            match group.coordinator_for(&joiner).cloned() {
                Some(coordinator) => group.push(
                    &coordinator,
                    GroupDelivery::StateRequest {
                        joiner: joiner.clone(),
                    },
                ),
                None => {
                    group.awaiting_state.remove(&joiner);
                    group.push(&joiner, GroupDelivery::State(GroupState::new()));
                }
            }
        }

        info!(cluster, member = %endpoint, size = group.members.len(), "Member left group");
        if group.members.is_empty() {
            groups.remove(cluster);
        }
    }
}

impl std::fmt::Debug for GroupHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupHub")
            .field("groups", &self.groups.lock().len())
            .finish()
    }
}

/// A member's handle on its group
#[derive(Clone)]
pub struct GroupChannel {
    hub: GroupHub,
    cluster: String,
    endpoint: Endpoint,
}

impl GroupChannel {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn broadcast(&self, payload: Bytes) -> Result<()> {
        self.hub.broadcast(&self.cluster, &self.endpoint, payload)
    }

    pub fn provide_state(&self, joiner: &Endpoint, state: GroupState) {
        self.hub.provide_state(&self.cluster, joiner, state);
    }

    pub fn leave(&self) {
        self.hub.leave(&self.cluster, &self.endpoint);
    }
}
