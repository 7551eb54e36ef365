//! Node error taxonomy.

use burrow_api::ValidationError;
use thiserror::Error;

use crate::cri::CriError;
use crate::kvs::KvsError;
use crate::messaging::MessagingError;
use crate::substrate::SubstrateError;

/// Errors surfaced by controllers and the frontend.
#[derive(Debug, Error)]
pub enum Error {
    /// A record or request failed its invariants.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The KVS key is absent or tombstoned.
    #[error("not found: {0}")]
    NotFound(String),

    /// Create hit an existing key.
    #[error("already exists: {0}")]
    OverwriteRejected(String),

    /// The substrate call failed; the next tick retries.
    #[error("substrate unavailable: {0}")]
    SubstrateUnavailable(#[source] SubstrateError),

    /// A container runtime call failed.
    #[error("runtime error: {0}")]
    Runtime(#[from] CriError),

    /// The pod names a scheduler this node does not implement.
    #[error("unsupported scheduler '{0}'")]
    UnsupportedScheduler(String),

    /// The runtime disagrees with the recorded pod status.
    #[error("sandbox mismatch for pod {pod_uuid}: {reason}")]
    SandboxMismatch { pod_uuid: String, reason: String },

    /// A caller supplied an unusable argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The node has not joined the overlay.
    #[error("not connected")]
    NotConnected,

    /// An outbound message could not be delivered.
    #[error(transparent)]
    Messaging(#[from] MessagingError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<SubstrateError> for Error {
    fn from(err: SubstrateError) -> Self {
        match err {
            SubstrateError::NotFound(key) => Self::NotFound(key),
            SubstrateError::ProhibitOverwrite(key) => Self::OverwriteRejected(key),
            SubstrateError::NotConnected => Self::NotConnected,
            other => Self::SubstrateUnavailable(other),
        }
    }
}

impl From<KvsError> for Error {
    fn from(err: KvsError) -> Self {
        match err {
            KvsError::KeyNotFound(key) | KvsError::Conflict(key) => Self::NotFound(key),
            KvsError::Overwrite(key) => Self::OverwriteRejected(key),
            KvsError::Substrate { source, .. } => source.into(),
            KvsError::Invalid(e) => Self::Validation(e),
            KvsError::Codec { key, source } => {
                Self::Validation(ValidationError::invalid(key, source))
            }
        }
    }
}
