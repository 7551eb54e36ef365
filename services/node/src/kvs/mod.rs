//! Typed KVS adapters.
//!
//! Every resource lives under one key, `<type>/<uuid>`. The substrate has no
//! real delete, so deletion writes a tombstone (`None`). Records that fail to
//! decode or validate on read are tombstoned on the spot and reported as
//! absent.
//!
//! All operations on a key hold that key in a process-wide [`UniqueSet`] for
//! their whole duration, so local callers never interleave on one key.

use std::marker::PhantomData;
use std::sync::Arc;

use burrow_api::{Account, Object, Pod, Record, Resource, ResourceKey, ValidationError};
use burrow_id::AccountUuid;
use burrow_reconcile::UniqueSet;
use thiserror::Error;
use tracing::{debug, warn};

use crate::substrate::{KvsFlags, Substrate, SubstrateError};

/// KVS adapter failures.
#[derive(Debug, Error)]
pub enum KvsError {
    /// Update of a key that was never written.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Create of a key that already exists.
    #[error("key already exists: {0}")]
    Overwrite(String),

    /// Update of a key that has been tombstoned.
    #[error("key was deleted: {0}")]
    Conflict(String),

    #[error("substrate error on {key}: {source}")]
    Substrate {
        key: String,
        #[source]
        source: SubstrateError,
    },

    /// The value failed validation before a write.
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("malformed record at {key}: {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Shared handle to the overlay KVS.
#[derive(Clone)]
pub struct Kvs {
    substrate: Arc<dyn Substrate>,
    guard: Arc<UniqueSet<String>>,
}

impl Kvs {
    pub fn new(substrate: Arc<dyn Substrate>) -> Self {
        Self {
            substrate,
            guard: Arc::new(UniqueSet::new()),
        }
    }

    pub fn pods(&self) -> PodKvs {
        self.adapter()
    }

    pub fn accounts(&self) -> AccountKvs {
        self.adapter()
    }

    pub fn records(&self) -> RecordKvs {
        self.adapter()
    }

    pub fn objects(&self) -> ObjectKvs {
        self.adapter()
    }

    fn adapter<T: Resource>(&self) -> KvsAdapter<T> {
        KvsAdapter {
            substrate: Arc::clone(&self.substrate),
            guard: Arc::clone(&self.guard),
            _resource: PhantomData,
        }
    }

    /// Tombstones a raw key.
    pub async fn tombstone(&self, key: &str) -> Result<(), KvsError> {
        let _guard = self.guard.acquire(key.to_string()).await;
        write(self.substrate.as_ref(), key, None, KvsFlags::NONE).await
    }

    /// Snapshot of live entries whose primary replica is this node.
    pub async fn local_data(&self) -> Result<Vec<(String, Vec<u8>)>, SubstrateError> {
        self.substrate.kvs_local_data().await
    }
}

pub type PodKvs = KvsAdapter<Pod>;
pub type AccountKvs = KvsAdapter<Account>;
pub type RecordKvs = KvsAdapter<Record>;
pub type ObjectKvs = KvsAdapter<Object>;

/// Typed access to one resource kind.
pub struct KvsAdapter<T> {
    substrate: Arc<dyn Substrate>,
    guard: Arc<UniqueSet<String>>,
    _resource: PhantomData<fn() -> T>,
}

impl<T> Clone for KvsAdapter<T> {
    fn clone(&self) -> Self {
        Self {
            substrate: Arc::clone(&self.substrate),
            guard: Arc::clone(&self.guard),
            _resource: PhantomData,
        }
    }
}

/// Parses and validates raw record bytes stored at `key`.
///
/// A record whose own key differs from `key` is invalid.
pub fn decode<T: Resource>(key: &str, raw: &[u8]) -> Result<T, KvsError> {
    let value: T = serde_json::from_slice(raw).map_err(|source| KvsError::Codec {
        key: key.to_string(),
        source,
    })?;
    value.validate()?;
    let own_key = value.key().to_string();
    if own_key != key {
        return Err(ValidationError::invalid(
            "meta.uuid",
            format!("record for {own_key} is stored at {key}"),
        )
        .into());
    }
    Ok(value)
}

fn encode<T: Resource>(key: &str, value: &T) -> Result<Vec<u8>, KvsError> {
    value.validate()?;
    serde_json::to_vec(value).map_err(|source| KvsError::Codec {
        key: key.to_string(),
        source,
    })
}

async fn write(
    substrate: &dyn Substrate,
    key: &str,
    value: Option<Vec<u8>>,
    flags: KvsFlags,
) -> Result<(), KvsError> {
    substrate
        .kvs_set(key, value, flags)
        .await
        .map_err(|source| match source {
            SubstrateError::ProhibitOverwrite(key) => KvsError::Overwrite(key),
            source => KvsError::Substrate {
                key: key.to_string(),
                source,
            },
        })
}

impl<T: Resource> KvsAdapter<T> {
    pub fn key(uuid: &str) -> String {
        ResourceKey::new(T::TYPE, uuid).to_string()
    }

    /// `None` when the key is absent, tombstoned, or held an invalid record.
    pub async fn get(&self, uuid: &str) -> Result<Option<T>, KvsError> {
        let key = Self::key(uuid);
        let _guard = self.guard.acquire(key.clone()).await;
        self.read(&key).await
    }

    /// Writes a new record; fails if the key exists, tombstones included.
    pub async fn create(&self, value: &T) -> Result<(), KvsError> {
        let key = value.key().to_string();
        let raw = encode(&key, value)?;
        let _guard = self.guard.acquire(key.clone()).await;
        write(
            self.substrate.as_ref(),
            &key,
            Some(raw),
            KvsFlags::PROHIBIT_OVERWRITE,
        )
        .await
    }

    /// Overwrites an existing live record.
    pub async fn update(&self, value: &T) -> Result<(), KvsError> {
        let key = value.key().to_string();
        let raw = encode(&key, value)?;
        let _guard = self.guard.acquire(key.clone()).await;
        match self.substrate.kvs_get(&key).await {
            Ok(Some(_)) => {}
            Ok(None) => return Err(KvsError::Conflict(key)),
            Err(SubstrateError::NotFound(_)) => return Err(KvsError::KeyNotFound(key)),
            Err(source) => return Err(KvsError::Substrate { key, source }),
        }
        write(self.substrate.as_ref(), &key, Some(raw), KvsFlags::NONE).await
    }

    /// Writes the record whether or not the key exists.
    pub async fn set(&self, value: &T) -> Result<(), KvsError> {
        let key = value.key().to_string();
        let raw = encode(&key, value)?;
        let _guard = self.guard.acquire(key.clone()).await;
        write(self.substrate.as_ref(), &key, Some(raw), KvsFlags::NONE).await
    }

    /// Read-modify-write under a single hold of the key.
    ///
    /// `f` receives the current record (`None` if absent) and returns the
    /// record to write, or `None` to leave the key untouched. Returns what
    /// was written.
    pub async fn modify<F>(&self, uuid: &str, f: F) -> Result<Option<T>, KvsError>
    where
        F: FnOnce(Option<T>) -> Option<T> + Send,
    {
        let key = Self::key(uuid);
        let _guard = self.guard.acquire(key.clone()).await;
        let current = self.read(&key).await?;
        let Some(next) = f(current) else {
            return Ok(None);
        };
        let raw = encode(&key, &next)?;
        write(self.substrate.as_ref(), &key, Some(raw), KvsFlags::NONE).await?;
        Ok(Some(next))
    }

    /// Writes `next` only if the stored record still equals `expected`.
    ///
    /// Returns `false`, writing nothing, when the record changed or is gone.
    pub async fn replace(&self, expected: &T, next: &T) -> Result<bool, KvsError>
    where
        T: PartialEq + Clone,
    {
        let written = self
            .modify(&expected.meta().uuid, |current| {
                (current.as_ref() == Some(expected)).then(|| next.clone())
            })
            .await?;
        Ok(written.is_some())
    }

    /// Tombstones the record.
    pub async fn delete(&self, uuid: &str) -> Result<(), KvsError> {
        let key = Self::key(uuid);
        let _guard = self.guard.acquire(key.clone()).await;
        write(self.substrate.as_ref(), &key, None, KvsFlags::NONE).await
    }

    async fn read(&self, key: &str) -> Result<Option<T>, KvsError> {
        let raw = match self.substrate.kvs_get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) | Err(SubstrateError::NotFound(_)) => return Ok(None),
            Err(source) => {
                return Err(KvsError::Substrate {
                    key: key.to_string(),
                    source,
                })
            }
        };

        match decode(key, &raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key = %key, error = %e, "Tombstoning invalid record");
                write(self.substrate.as_ref(), key, None, KvsFlags::NONE).await?;
                debug!(key = %key, "Tombstone written");
                Ok(None)
            }
        }
    }
}

impl KvsAdapter<Pod> {
    /// Writes `pod.status` over the stored pod while `host` still runs it.
    ///
    /// Meta and spec come from the stored record, so a deletion or migration
    /// requested since `pod` was read is kept. Returns the written pod, or
    /// `None` when the pod is gone or hosted elsewhere.
    pub async fn update_status(&self, pod: &Pod, host: &str) -> Result<Option<Pod>, KvsError> {
        self.modify(&pod.meta.uuid, |current| {
            current
                .filter(|stored| stored.status.running_node == host)
                .map(|mut stored| {
                    stored.status = pod.status.clone();
                    stored
                })
        })
        .await
    }
}

impl KvsAdapter<Account> {
    pub async fn get_by_name(&self, name: &str) -> Result<Option<Account>, KvsError> {
        self.get(AccountUuid::from_name(name).as_str()).await
    }
}
