//! # burrow-api
//!
//! Resource models shared by every burrow node.
//!
//! ## Design Principles
//!
//! - JSON field names and KVS keys are cross-node contracts; they never change
//! - Every resource exposes a total `validate()` returning the first violated rule
//! - Models keep ids as strings so a corrupt record still decodes and can be
//!   reaped instead of silently dropped
//!
//! ## Resources
//!
//! | Resource | KVS key | Uuid |
//! |---|---|---|
//! | [`Account`] | `account/<sha256(name)>` | derived from the name |
//! | [`Pod`] | `pod/<uuid>` | random v4 |
//! | [`Record`] | `record/<uuid>` | same as its pod |
//! | [`Object`] | `object/<uuid>` | random v4 |

mod account;
mod error;
mod geo;
mod key;
mod message;
mod meta;
mod object;
mod pod;
mod record;
pub mod time;

pub use account::*;
pub use error::ValidationError;
pub use geo::Vector3;
pub use key::{KeyError, ResourceKey};
pub use message::*;
pub use meta::{ObjectMeta, ResourceType};
pub use object::*;
pub use pod::*;
pub use record::*;

/// A KVS resource with a fixed type tag and a total validator.
pub trait Resource: serde::Serialize + serde::de::DeserializeOwned + Send + Sync {
    /// Type tag stored in `meta.type` and used as the key prefix.
    const TYPE: ResourceType;

    fn meta(&self) -> &ObjectMeta;

    fn validate(&self) -> Result<(), ValidationError>;

    /// The KVS key this resource is stored under.
    fn key(&self) -> ResourceKey {
        ResourceKey::new(Self::TYPE, self.meta().uuid.clone())
    }
}
