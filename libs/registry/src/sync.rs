//! Membership and state-transfer hooks
//!
//! Transports that can report membership changes feed them to a
//! [`ViewListener`]; transports that can hand a full snapshot to a joining
//! member use a [`StateHolder`]. Both registries implement the two hooks, and
//! a transport only drives the ones it supports.

use crate::error::Result;
use types::Endpoint;

/// Membership change reported by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    /// First view seen after joining
    InitialView(Vec<Endpoint>),
    MemberJoined(Endpoint),
    MemberLeft(Endpoint),
}

impl ViewEvent {
    pub fn left(&self) -> Option<&Endpoint> {
        match self {
            ViewEvent::MemberLeft(endpoint) => Some(endpoint),
            ViewEvent::InitialView(_) | ViewEvent::MemberJoined(_) => None,
        }
    }
}

/// Reacts to membership changes
pub trait ViewListener: Send + Sync {
    fn on_view_event(&self, event: &ViewEvent);
}

/// Serializes and restores a full registry snapshot
pub trait StateHolder: Send + Sync {
    /// Stable name under which the snapshot travels
    fn state_name(&self) -> &'static str;

    fn get_state(&self) -> Result<Vec<u8>>;

    fn set_state(&self, state: &[u8]) -> Result<()>;
}
