//! In-process overlay network.
//!
//! A [`MemoryNetwork`] is shared by any number of [`MemorySubstrate`]
//! endpoints. It keeps one KVS for everybody and places each key's primary
//! replica on one connected node, so every endpoint sees its own slice of
//! the data from `kvs_local_data`, as on the real overlay.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::{
    KvsFlags, MessageHandler, MessageRequest, SpreadHandler, SpreadRequest, Substrate,
    SubstrateError,
};

/// Mean earth radius used for spread distances.
const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

#[derive(Default)]
struct Endpoint {
    connected: bool,
    position: Option<(f64, f64)>,
    message_handlers: HashMap<String, MessageHandler>,
    spread_handlers: HashMap<String, SpreadHandler>,
}

#[derive(Default)]
struct NetworkState {
    /// `None` values are tombstones.
    kvs: HashMap<String, Option<Vec<u8>>>,
    endpoints: BTreeMap<String, Endpoint>,
}

impl NetworkState {
    /// Connected node holding the primary replica of `key`.
    fn primary_of(&self, key: &str) -> Option<&str> {
        let connected: Vec<&str> = self
            .endpoints
            .iter()
            .filter(|(_, e)| e.connected)
            .map(|(id, _)| id.as_str())
            .collect();
        if connected.is_empty() {
            return None;
        }

        let digest = Sha256::digest(key.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        let slot = u64::from_be_bytes(prefix) % connected.len() as u64;
        connected.get(slot as usize).copied()
    }
}

/// Shared state of an in-process overlay.
#[derive(Default)]
pub struct MemoryNetwork {
    state: Mutex<NetworkState>,
}

impl std::fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryNetwork")
            .field("keys", &state.kvs.len())
            .field("endpoints", &state.endpoints.len())
            .finish()
    }
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Raw view of a key: `None` if never written, `Some(None)` if
    /// tombstoned.
    pub fn peek(&self, key: &str) -> Option<Option<Vec<u8>>> {
        self.lock().kvs.get(key).cloned()
    }

    /// Writes raw bytes, bypassing every check.
    pub fn inject(&self, key: &str, value: Option<Vec<u8>>) {
        self.lock().kvs.insert(key.to_string(), value);
    }

    /// Node currently holding the primary replica of `key`.
    pub fn primary_of(&self, key: &str) -> Option<String> {
        self.lock().primary_of(key).map(str::to_string)
    }
}

/// One node's view of a [`MemoryNetwork`].
pub struct MemorySubstrate {
    network: Arc<MemoryNetwork>,
    node_id: String,
}

impl std::fmt::Debug for MemorySubstrate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySubstrate")
            .field("node_id", &self.node_id)
            .finish()
    }
}

impl MemorySubstrate {
    /// Registers a disconnected endpoint with `node_id` on `network`.
    pub fn new(network: Arc<MemoryNetwork>, node_id: impl Into<String>) -> Self {
        let node_id = node_id.into();
        network
            .lock()
            .endpoints
            .entry(node_id.clone())
            .or_default();
        Self { network, node_id }
    }

    fn require_connected(&self, state: &NetworkState) -> Result<(), SubstrateError> {
        match state.endpoints.get(&self.node_id) {
            Some(endpoint) if endpoint.connected => Ok(()),
            _ => Err(SubstrateError::NotConnected),
        }
    }

    fn with_endpoint<R>(&self, f: impl FnOnce(&mut Endpoint) -> R) -> R {
        let mut state = self.network.lock();
        f(state.endpoints.entry(self.node_id.clone()).or_default())
    }
}

/// Great-circle distance between two `(lon, lat)` points in radians.
fn haversine_meters(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lon1, lat1) = a;
    let (lon2, lat2) = b;
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
}

#[async_trait]
impl Substrate for MemorySubstrate {
    async fn connect(&self, url: &str, _token: &str) -> Result<(), SubstrateError> {
        self.with_endpoint(|e| e.connected = true);
        info!(node_id = %self.node_id, url = %url, "[MEMORY] Connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SubstrateError> {
        self.with_endpoint(|e| {
            e.connected = false;
            e.message_handlers.clear();
            e.spread_handlers.clear();
        });
        info!(node_id = %self.node_id, "[MEMORY] Disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.with_endpoint(|e| e.connected)
    }

    fn local_node_id(&self) -> String {
        self.node_id.clone()
    }

    async fn set_position(&self, x: f64, y: f64) -> Result<(f64, f64), SubstrateError> {
        self.with_endpoint(|e| e.position = Some((x, y)));
        Ok((x, y))
    }

    fn last_position(&self) -> Option<(f64, f64)> {
        self.with_endpoint(|e| e.position)
    }

    async fn kvs_get(&self, key: &str) -> Result<Option<Vec<u8>>, SubstrateError> {
        let state = self.network.lock();
        self.require_connected(&state)?;
        state
            .kvs
            .get(key)
            .cloned()
            .ok_or_else(|| SubstrateError::NotFound(key.to_string()))
    }

    async fn kvs_set(
        &self,
        key: &str,
        value: Option<Vec<u8>>,
        flags: KvsFlags,
    ) -> Result<(), SubstrateError> {
        let mut state = self.network.lock();
        self.require_connected(&state)?;
        if flags.contains(KvsFlags::PROHIBIT_OVERWRITE) && state.kvs.contains_key(key) {
            return Err(SubstrateError::ProhibitOverwrite(key.to_string()));
        }
        state.kvs.insert(key.to_string(), value);
        Ok(())
    }

    async fn kvs_local_data(&self) -> Result<Vec<(String, Vec<u8>)>, SubstrateError> {
        let state = self.network.lock();
        self.require_connected(&state)?;
        let mut local: Vec<(String, Vec<u8>)> = state
            .kvs
            .iter()
            .filter(|(key, _)| state.primary_of(key) == Some(self.node_id.as_str()))
            .filter_map(|(key, value)| value.clone().map(|v| (key.clone(), v)))
            .collect();
        local.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(local)
    }

    async fn messaging_post(
        &self,
        dst: &str,
        name: &str,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, SubstrateError> {
        let handler = {
            let state = self.network.lock();
            self.require_connected(&state)?;
            let endpoint = state
                .endpoints
                .get(dst)
                .filter(|e| e.connected)
                .ok_or_else(|| SubstrateError::Unreachable(dst.to_string()))?;
            endpoint
                .message_handlers
                .get(name)
                .cloned()
                .ok_or_else(|| SubstrateError::NoHandler {
                    node: dst.to_string(),
                    name: name.to_string(),
                })?
        };

        debug!(src = %self.node_id, dst = %dst, name = %name, "[MEMORY] Post");
        Ok(handler(MessageRequest {
            source: self.node_id.clone(),
            payload,
        }))
    }

    fn messaging_set_handler(&self, name: &str, handler: MessageHandler) {
        self.with_endpoint(|e| {
            e.message_handlers.insert(name.to_string(), handler);
        });
    }

    fn messaging_unset_handler(&self, name: &str) {
        self.with_endpoint(|e| {
            e.message_handlers.remove(name);
        });
    }

    async fn spread_post(
        &self,
        x: f64,
        y: f64,
        r: f64,
        name: &str,
        payload: Vec<u8>,
    ) -> Result<(), SubstrateError> {
        let receivers: Vec<SpreadHandler> = {
            let state = self.network.lock();
            self.require_connected(&state)?;
            state
                .endpoints
                .iter()
                .filter(|(id, e)| *id != &self.node_id && e.connected)
                .filter(|(_, e)| {
                    e.position
                        .is_some_and(|pos| haversine_meters((x, y), pos) <= r)
                })
                .filter_map(|(_, e)| e.spread_handlers.get(name).cloned())
                .collect()
        };

        debug!(
            src = %self.node_id,
            name = %name,
            receivers = receivers.len(),
            "[MEMORY] Spread"
        );
        for handler in receivers {
            handler(SpreadRequest {
                source: self.node_id.clone(),
                payload: payload.clone(),
            });
        }
        Ok(())
    }

    fn spread_set_handler(&self, name: &str, handler: SpreadHandler) {
        self.with_endpoint(|e| {
            e.spread_handlers.insert(name.to_string(), handler);
        });
    }

    fn spread_unset_handler(&self, name: &str) {
        self.with_endpoint(|e| {
            e.spread_handlers.remove(name);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    async fn pair() -> (Arc<MemoryNetwork>, MemorySubstrate, MemorySubstrate) {
        let network = MemoryNetwork::new();
        let a = MemorySubstrate::new(Arc::clone(&network), A);
        let b = MemorySubstrate::new(Arc::clone(&network), B);
        a.connect("memory://", "").await.unwrap();
        b.connect("memory://", "").await.unwrap();
        (network, a, b)
    }

    #[tokio::test]
    async fn tombstone_vs_not_found() {
        let (_net, a, _b) = pair().await;
        assert_eq!(
            a.kvs_get("pod/x").await,
            Err(SubstrateError::NotFound("pod/x".into()))
        );
        a.kvs_set("pod/x", None, KvsFlags::NONE).await.unwrap();
        assert_eq!(a.kvs_get("pod/x").await, Ok(None));
    }

    #[tokio::test]
    async fn prohibit_overwrite() {
        let (_net, a, b) = pair().await;
        a.kvs_set("k", Some(b"1".to_vec()), KvsFlags::PROHIBIT_OVERWRITE)
            .await
            .unwrap();
        assert_eq!(
            b.kvs_set("k", Some(b"2".to_vec()), KvsFlags::PROHIBIT_OVERWRITE)
                .await,
            Err(SubstrateError::ProhibitOverwrite("k".into()))
        );
        b.kvs_set("k", Some(b"2".to_vec()), KvsFlags::NONE)
            .await
            .unwrap();
        assert_eq!(a.kvs_get("k").await, Ok(Some(b"2".to_vec())));
    }

    #[tokio::test]
    async fn local_data_partitions_keys() {
        let (net, a, b) = pair().await;
        for i in 0..32 {
            let key = format!("pod/{i}");
            a.kvs_set(&key, Some(vec![i]), KvsFlags::NONE).await.unwrap();
        }
        a.kvs_set("pod/dead", None, KvsFlags::NONE).await.unwrap();

        let on_a = a.kvs_local_data().await.unwrap();
        let on_b = b.kvs_local_data().await.unwrap();
        assert_eq!(on_a.len() + on_b.len(), 32);
        for (key, _) in &on_a {
            assert_eq!(net.primary_of(key).as_deref(), Some(A));
        }
    }

    #[tokio::test]
    async fn disconnected_node_is_unreachable() {
        let (_net, a, b) = pair().await;
        b.disconnect().await.unwrap();
        assert_eq!(
            a.messaging_post(B, "x", vec![]).await,
            Err(SubstrateError::Unreachable(B.into()))
        );
        assert_eq!(b.kvs_get("k").await, Err(SubstrateError::NotConnected));
    }

    #[tokio::test]
    async fn post_reaches_handler() {
        let (_net, a, b) = pair().await;
        b.messaging_set_handler(
            "echo",
            Arc::new(|req: MessageRequest| {
                let mut reply = req.source.into_bytes();
                reply.extend(req.payload);
                reply
            }),
        );
        let reply = a.messaging_post(B, "echo", b"!".to_vec()).await.unwrap();
        assert_eq!(reply, format!("{A}!").into_bytes());

        assert!(matches!(
            a.messaging_post(B, "other", vec![]).await,
            Err(SubstrateError::NoHandler { .. })
        ));
    }

    #[tokio::test]
    async fn spread_respects_radius() {
        let (_net, a, b) = pair().await;
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = Arc::clone(&hits);
            b.spread_set_handler(
                "hello",
                Arc::new(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        // Tokyo and Yokohama are roughly 29 km apart.
        let tokyo = (139.767_f64.to_radians(), 35.681_f64.to_radians());
        let yokohama = (139.638_f64.to_radians(), 35.443_f64.to_radians());
        b.set_position(yokohama.0, yokohama.1).await.unwrap();

        a.spread_post(tokyo.0, tokyo.1, 10_000.0, "hello", vec![])
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        a.spread_post(tokyo.0, tokyo.1, 50_000.0, "hello", vec![])
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn haversine_known_distance() {
        let d = haversine_meters(
            (139.767_f64.to_radians(), 35.681_f64.to_radians()),
            (139.638_f64.to_radians(), 35.443_f64.to_radians()),
        );
        assert!((20_000.0..35_000.0).contains(&d), "{d}");
    }
}
