//! # burrow-id
//!
//! Identifier types shared by every burrow node.
//!
//! ## Design Principles
//!
//! - Ids seed KVS keys, so their string form is a cross-node contract
//! - Parsing is strict; formatting is canonical (lowercase)
//! - Ids are typed to prevent mixing node ids with resource uuids
//!
//! ## Formats
//!
//! | Type | Format | Example |
//! |---|---|---|
//! | [`NodeId`] | 32 lowercase hex chars (128 bit) | `0123456789abcdef0123456789abcdef` |
//! | [`PodUuid`], [`ObjectUuid`] | RFC-4122 hyphenated uuid | `5c7f0a6e-3d1b-4c2a-9a51-0f3c3b5d7e21` |
//! | [`AccountUuid`] | lowercase hex of `sha256(name)` | `2bd806c9...` |
//!
//! Records share the uuid of the pod they checkpoint, so there is no
//! separate record id type.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export uuid for consumers that need raw uuid operations
pub use uuid::Uuid;
