//! Configuration for the burrow node.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use burrow_id::NodeId;
use burrow_reconcile::{
    DEFAULT_ACCOUNT_LIFETIME, DEFAULT_FORCE_TERMINATION_TIMEOUT, DEFAULT_KEEPALIVE_INTERVAL,
    DEFAULT_NODE_RECORD_LIFETIME, DEFAULT_RECONCILE_INTERVAL, DEFAULT_STATE_LIFETIME,
};
use serde::Serialize;

/// Node configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Frontend RPC listen address.
    pub listen_addr: SocketAddr,

    /// Node id used by the in-memory substrate.
    pub node_id: NodeId,

    /// Controller timings.
    pub settings: ControllerSettings,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Timings and limits handed to the controllers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerSettings {
    /// Local reconcile tick.
    #[serde(with = "secs")]
    pub reconcile_interval: Duration,

    /// Keep-alive and node publication tick.
    #[serde(with = "secs")]
    pub keepalive_interval: Duration,

    /// Unchanged account entries older than this are removed.
    #[serde(with = "secs")]
    pub state_lifetime: Duration,

    /// Accounts with no observed change for this long are tombstoned.
    #[serde(with = "secs")]
    pub account_lifetime: Duration,

    /// Peer publications older than this are forgotten.
    #[serde(with = "secs")]
    pub node_record_lifetime: Duration,

    /// Bound between the first stop and forced removal.
    #[serde(with = "secs")]
    pub force_termination_timeout: Duration,

    /// Capacity of the inbound message queue.
    pub message_queue_depth: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            state_lifetime: DEFAULT_STATE_LIFETIME,
            account_lifetime: DEFAULT_ACCOUNT_LIFETIME,
            node_record_lifetime: DEFAULT_NODE_RECORD_LIFETIME,
            force_termination_timeout: DEFAULT_FORCE_TERMINATION_TIMEOUT,
            message_queue_depth: 64,
        }
    }
}

mod secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }
}

fn env_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("BURROW_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8090".to_string())
            .parse()
            .context("BURROW_LISTEN_ADDR is not a socket address")?;

        let node_id = match std::env::var("BURROW_NODE_ID") {
            Ok(s) => NodeId::parse(&s).context("BURROW_NODE_ID is not a node id")?,
            Err(_) => NodeId::random(),
        };

        let defaults = ControllerSettings::default();
        let settings = ControllerSettings {
            reconcile_interval: env_secs("BURROW_RECONCILE_INTERVAL", defaults.reconcile_interval),
            keepalive_interval: env_secs("BURROW_KEEPALIVE_INTERVAL", defaults.keepalive_interval),
            state_lifetime: env_secs("BURROW_STATE_LIFETIME", defaults.state_lifetime),
            account_lifetime: env_secs("BURROW_ACCOUNT_LIFETIME", defaults.account_lifetime),
            node_record_lifetime: env_secs(
                "BURROW_NODE_RECORD_LIFETIME",
                defaults.node_record_lifetime,
            ),
            force_termination_timeout: env_secs(
                "BURROW_FORCE_TERMINATION_TIMEOUT",
                defaults.force_termination_timeout,
            ),
            message_queue_depth: std::env::var("BURROW_MESSAGE_QUEUE_DEPTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|depth| *depth > 0)
                .unwrap_or(defaults.message_queue_depth),
        };

        let log_level = std::env::var("BURROW_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            listen_addr,
            node_id,
            settings,
            log_level,
        })
    }
}
