//! # Fleet Cluster Config
//!
//! Layered configuration ([`ClusterConfig`]) and logging bootstrap
//! ([`init_logging`]) for Fleet leader and agent processes.

pub mod cluster_config;
pub mod logging;

pub use cluster_config::{
    load_config, BusSettings, ChannelNames, ClusterConfig, GroupSettings, LogFormat,
    LoggingConfig, TransportKind, DEFAULT_ENV_PREFIX,
};
pub use logging::init_logging;
