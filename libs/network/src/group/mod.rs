//! Group-Communication Transport
//!
//! A single broadcast group per cluster carries all traffic. Membership views
//! drive disconnection handling and joining members catch up through state
//! transfer from the coordinator.

pub mod client;
pub mod hub;

pub use client::GroupClusterClient;
pub use hub::{GroupChannel, GroupDelivery, GroupHub, GroupState, Joined};
