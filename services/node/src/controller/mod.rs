//! Resource controllers.
//!
//! Each controller owns one resource kind. Those that garbage-collect their
//! records expose `reconcile_local`, called by the [`Manager`](crate::manager::Manager)
//! for every record whose primary replica is on this node.

pub mod account;
pub mod container;
pub mod node;
pub mod object;
pub mod pod;
pub mod system;

use std::sync::Arc;

pub use account::AccountController;
pub use container::{ContainerController, ContainerInfo};
pub use node::NodeController;
pub use object::ObjectController;
pub use pod::{ApplicationDigest, PodController};
pub use system::{ConnectInfo, SystemController, SystemInfo};

/// What the local loop should do with a record after reconciling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Keep,
    /// Tombstone the key.
    Delete,
}

/// The controllers of one connected session.
#[derive(Clone)]
pub struct Controllers {
    pub pods: Arc<PodController>,
    pub containers: Arc<ContainerController>,
    pub accounts: Arc<AccountController>,
    pub nodes: Arc<NodeController>,
    pub objects: Arc<ObjectController>,
}
