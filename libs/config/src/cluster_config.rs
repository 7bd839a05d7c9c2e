//! Cluster Configuration Module
//!
//! Loads the settings shared by every Fleet process (leader and agents):
//! which transport to use, the well-known channel names, and the tuning of
//! each transport. Sources are layered: built-in defaults, then an optional
//! TOML file, then environment variables under a prefix (`FLEET` by default,
//! nested keys separated by `__`, e.g. `FLEET_BUS__HEARTBEAT_TIMEOUT_MS`).

use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Default environment variable prefix
pub const DEFAULT_ENV_PREFIX: &str = "FLEET";

/// Top-level cluster configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ClusterConfig {
    pub transport: TransportKind,
    pub channels: ChannelNames,
    pub bus: BusSettings,
    pub group: GroupSettings,
    pub logging: LoggingConfig,
}

/// Which cluster client implementation a process uses
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Message bus with per-actor queues and per-kind topics
    #[default]
    Bus,
    /// Group channel with membership views and state transfer
    Group,
}

/// Well-known channel names
///
/// One channel per entity kind carries every lifecycle transition of that
/// kind; actor input goes to one queue per actor key.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ChannelNames {
    pub actor_registry: String,
    pub agent_registry: String,
    pub agent_input: String,
    pub heartbeat: String,
    pub actor_prefix: String,
}

impl Default for ChannelNames {
    fn default() -> Self {
        Self {
            actor_registry: "fleet.actor-registry".to_string(),
            agent_registry: "fleet.agent-registry".to_string(),
            agent_input: "fleet.agent-input".to_string(),
            heartbeat: "fleet.heartbeat".to_string(),
            actor_prefix: "fleet.actor.".to_string(),
        }
    }
}

/// Message-bus tuning
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct BusSettings {
    /// Maximum number of cached per-destination producers
    pub producer_cache_capacity: u64,
    pub heartbeat_interval_ms: u64,
    /// Silence after which a peer is declared gone
    pub heartbeat_timeout_ms: u64,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            producer_cache_capacity: 256,
            heartbeat_interval_ms: 1_000,
            heartbeat_timeout_ms: 5_000,
        }
    }
}

impl BusSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}

/// Group-channel settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct GroupSettings {
    pub cluster_name: String,
}

impl Default for GroupSettings {
    fn default() -> Self {
        Self {
            cluster_name: "fleet".to_string(),
        }
    }
}

/// Log output settings consumed by [`crate::init_logging`]
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl ClusterConfig {
    /// Load configuration with file and environment overrides
    pub fn load(path: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading cluster config: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: ClusterConfig = builder
            .build()
            .context("Failed to build cluster configuration")?
            .try_deserialize()
            .context("Failed to deserialize cluster configuration")?;

        config.validate()?;
        debug!(transport = ?config.transport, "Cluster configuration loaded");
        Ok(config)
    }

    /// Parse an inline TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: ClusterConfig =
            toml::from_str(source).context("Failed to parse cluster configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize cluster configuration")
    }

    /// Reject settings no transport can run with
    pub fn validate(&self) -> Result<()> {
        let channels = [
            ("actor_registry", &self.channels.actor_registry),
            ("agent_registry", &self.channels.agent_registry),
            ("agent_input", &self.channels.agent_input),
            ("heartbeat", &self.channels.heartbeat),
            ("actor_prefix", &self.channels.actor_prefix),
        ];
        for (field, name) in channels {
            if name.trim().is_empty() {
                bail!("channels.{field} must not be empty");
            }
        }
        for (i, (field_a, a)) in channels.iter().enumerate() {
            for (field_b, b) in &channels[i + 1..] {
                if a == b {
                    bail!("channels.{field_a} and channels.{field_b} share the name '{a}'");
                }
            }
        }

        if self.bus.producer_cache_capacity == 0 {
            bail!("bus.producer_cache_capacity must be at least 1");
        }
        if self.bus.heartbeat_interval_ms == 0 {
            bail!("bus.heartbeat_interval_ms must be positive");
        }
        if self.bus.heartbeat_timeout_ms <= self.bus.heartbeat_interval_ms {
            bail!(
                "bus.heartbeat_timeout_ms ({}) must exceed bus.heartbeat_interval_ms ({})",
                self.bus.heartbeat_timeout_ms,
                self.bus.heartbeat_interval_ms
            );
        }
        if self.group.cluster_name.trim().is_empty() {
            bail!("group.cluster_name must not be empty");
        }
        Ok(())
    }
}

/// Load from `path` with the default `FLEET` environment prefix
pub fn load_config(path: Option<&Path>) -> Result<ClusterConfig> {
    ClusterConfig::load(path, DEFAULT_ENV_PREFIX)
}
