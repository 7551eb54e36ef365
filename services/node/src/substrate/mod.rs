//! Overlay substrate interface.
//!
//! The substrate is the peer-to-peer layer every node joins: a DHT-style
//! KVS with tombstone deletes, direct node-to-node posts, and geographic
//! spread. It is an external collaborator; [`memory`] provides an
//! in-process network for development and tests.
//!
//! Handlers registered with the substrate run inside its callback and must
//! not call back into it. They are expected to queue work and return.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::{MemoryNetwork, MemorySubstrate};

/// Substrate failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubstrateError {
    /// The key has never been written.
    #[error("key not found: {0}")]
    NotFound(String),

    /// A write with `PROHIBIT_OVERWRITE` hit an existing key.
    #[error("key already exists: {0}")]
    ProhibitOverwrite(String),

    /// The local node is not connected.
    #[error("substrate is not connected")]
    NotConnected,

    /// The destination node is not reachable.
    #[error("node {0} is unreachable")]
    Unreachable(String),

    /// The destination has no handler for the message name.
    #[error("node {node} has no handler for '{name}'")]
    NoHandler { node: String, name: String },

    /// Connection setup failed.
    #[error("connect failed: {0}")]
    Connect(String),
}

/// Write flags for [`Substrate::kvs_set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KvsFlags(u32);

impl KvsFlags {
    pub const NONE: Self = Self(0);

    /// Reject the write if the key already exists (tombstones included).
    pub const PROHIBIT_OVERWRITE: Self = Self(1);

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// An inbound direct post.
#[derive(Debug, Clone)]
pub struct MessageRequest {
    pub source: String,
    pub payload: Vec<u8>,
}

/// An inbound spread delivery.
#[derive(Debug, Clone)]
pub struct SpreadRequest {
    pub source: String,
    pub payload: Vec<u8>,
}

/// Handler for direct posts; the return value is the reply payload.
pub type MessageHandler = Arc<dyn Fn(MessageRequest) -> Vec<u8> + Send + Sync>;

/// Handler for spread deliveries.
pub type SpreadHandler = Arc<dyn Fn(SpreadRequest) + Send + Sync>;

/// Capabilities the node consumes from the overlay.
#[async_trait]
pub trait Substrate: Send + Sync {
    async fn connect(&self, url: &str, token: &str) -> Result<(), SubstrateError>;

    async fn disconnect(&self) -> Result<(), SubstrateError>;

    fn is_connected(&self) -> bool;

    /// 32 lowercase hex chars, assigned by the substrate.
    fn local_node_id(&self) -> String;

    /// Sets the node position in radians; returns the position applied.
    async fn set_position(&self, x: f64, y: f64) -> Result<(f64, f64), SubstrateError>;

    fn last_position(&self) -> Option<(f64, f64)>;

    /// `Err(NotFound)` for a key never written, `Ok(None)` for a tombstone.
    async fn kvs_get(&self, key: &str) -> Result<Option<Vec<u8>>, SubstrateError>;

    /// Writes `value`; `None` writes a tombstone.
    async fn kvs_set(
        &self,
        key: &str,
        value: Option<Vec<u8>>,
        flags: KvsFlags,
    ) -> Result<(), SubstrateError>;

    /// Snapshot of live entries whose primary replica is this node.
    ///
    /// Returned as an owned list so callers never hold substrate state
    /// while they act on an entry.
    async fn kvs_local_data(&self) -> Result<Vec<(String, Vec<u8>)>, SubstrateError>;

    async fn messaging_post(
        &self,
        dst: &str,
        name: &str,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, SubstrateError>;

    fn messaging_set_handler(&self, name: &str, handler: MessageHandler);

    fn messaging_unset_handler(&self, name: &str);

    /// Delivers to every node within `r` meters of `(x, y)` radians.
    async fn spread_post(
        &self,
        x: f64,
        y: f64,
        r: f64,
        name: &str,
        payload: Vec<u8>,
    ) -> Result<(), SubstrateError>;

    fn spread_set_handler(&self, name: &str, handler: SpreadHandler);

    fn spread_unset_handler(&self, name: &str);
}
