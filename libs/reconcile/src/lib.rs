//! Reconciliation loop primitives.
//!
//! Helpers shared by the node controllers that converge KVS records to
//! local runtime state. Key concepts:
//!
//! - **Progress guard**: at most one local operation per key at a time
//!   ([`UniqueSet`]).
//! - **Observation**: liveness is inferred from whether a writer keeps
//!   changing a timestamp, not from the timestamp value itself, so clocks
//!   on different nodes never need to agree ([`ObservationLog`]).
//! - **Deadlines**: a stop request that does not converge is escalated
//!   after a bound ([`StopDeadlines`]).
//!
//! # Invariants
//!
//! - Guards are released on drop, including on early return or panic
//! - Observation ages are measured with the monotonic tokio clock
//! - Nothing here touches the network or the runtime

mod deadline;
mod observe;
mod unique;

use std::time::Duration;

pub use deadline::StopDeadlines;
pub use observe::ObservationLog;
pub use unique::{UniqueGuard, UniqueSet};

/// Default local reconcile interval.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(3);

/// Default keep-alive and node publication interval.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// An account entry whose timestamp stays unchanged this long is stale.
pub const DEFAULT_STATE_LIFETIME: Duration = Duration::from_secs(180);

/// An account with no observed change for this long is tombstoned.
pub const DEFAULT_ACCOUNT_LIFETIME: Duration = Duration::from_secs(600);

/// Peer publications older than this are dropped from the node list.
pub const DEFAULT_NODE_RECORD_LIFETIME: Duration = Duration::from_secs(90);

/// Bound between the first stop request and forced removal.
pub const DEFAULT_FORCE_TERMINATION_TIMEOUT: Duration = Duration::from_secs(30);
