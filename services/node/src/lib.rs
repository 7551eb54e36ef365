//! Burrow node library.
//!
//! A burrow node joins a peer-to-peer overlay that stores resources in a
//! shared KVS, and converges the pods assigned to it into containers on its
//! local runtime.
//!
//! ## Architecture
//!
//! ```text
//! SystemController (one session per connect)
//! ├── Manager            (local reconcile + keep-alive ticks)
//! ├── Dispatcher         (inbound messages from peers)
//! └── Controllers
//!     ├── PodController        (scheduling, migration, deletion)
//!     ├── ContainerController  (runtime sandboxes for hosted pods)
//!     ├── AccountController    (liveness of account entries)
//!     ├── NodeController       (position and peer publication)
//!     └── ObjectController     (scene objects spread to nearby peers)
//! ```
//!
//! ## Design Principles
//!
//! - The KVS is the only shared state. Every node reconciles the records
//!   whose primary replica it holds; nothing relies on a leader.
//! - A pod is hosted by exactly one node at a time (`status.running_node`).
//!   Only that node's runtime touches its containers.
//! - The overlay and the container runtime are traits ([`Substrate`],
//!   [`Cri`]); in-memory implementations ship for development and tests.
//!
//! ## Modules
//!
//! - `substrate`: overlay contract and the in-memory network
//! - `cri`: container runtime contract and the mock runtime
//! - `kvs`: typed, guarded access to resource records
//! - `messaging`: outbound driver and inbound handlers
//! - `controller`: per-resource controllers and the system session
//! - `manager`: the local reconcile loop
//! - `frontend`: JSON RPC router for the UI bridge

pub mod config;
pub mod controller;
pub mod cri;
pub mod error;
pub mod frontend;
pub mod kvs;
pub mod manager;
pub mod messaging;
pub mod substrate;

// Re-export commonly used types
pub use config::{Config, ControllerSettings};
pub use controller::{Controllers, SystemController};
pub use cri::{Cri, MockCri};
pub use error::{Error, Result};
pub use kvs::Kvs;
pub use manager::Manager;
pub use substrate::{MemoryNetwork, MemorySubstrate, Substrate};
