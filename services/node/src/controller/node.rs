//! Node controller: presence over the geographic overlay.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use burrow_api::{time, AccountNodeState, NodeType, PublishNode, Vector3};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::ControllerSettings;
use crate::error::{Error, Result};
use crate::messaging::MessagingDriver;
use crate::substrate::Substrate;

#[derive(Debug, Clone)]
struct Peer {
    last_seen: Instant,
    state: PublishNode,
}

#[derive(Debug, Default)]
struct Inner {
    peers: HashMap<String, Peer>,
    /// Spread radius in meters; zero keeps the node private.
    publicity: f64,
    position: Option<Vector3>,
}

pub struct NodeController {
    node_id: String,
    name: String,
    account: String,
    node_type: NodeType,
    substrate: Arc<dyn Substrate>,
    messaging: MessagingDriver,
    record_lifetime: Duration,
    inner: Mutex<Inner>,
}

impl NodeController {
    pub fn new(
        substrate: Arc<dyn Substrate>,
        account: impl Into<String>,
        name: impl Into<String>,
        node_type: NodeType,
        settings: &ControllerSettings,
    ) -> Self {
        Self {
            node_id: substrate.local_node_id(),
            name: name.into(),
            account: account.into(),
            node_type,
            messaging: MessagingDriver::new(Arc::clone(&substrate)),
            substrate,
            record_lifetime: settings.node_record_lifetime,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub fn position(&self) -> Option<Vector3> {
        self.lock().position
    }

    pub fn publicity(&self) -> f64 {
        self.lock().publicity
    }

    /// Moves the node to `latitude`/`longitude` in degrees.
    pub async fn set_position(
        &self,
        latitude: f64,
        longitude: f64,
        altitude: Option<f64>,
    ) -> Result<Vector3> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(Error::InvalidArgument(format!(
                "latitude {latitude} is out of range"
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(Error::InvalidArgument(format!(
                "longitude {longitude} is out of range"
            )));
        }
        let altitude = altitude.unwrap_or_default();
        if !altitude.is_finite() {
            return Err(Error::InvalidArgument("altitude is not finite".to_string()));
        }

        self.substrate
            .set_position(longitude.to_radians(), latitude.to_radians())
            .await?;
        let position = Vector3::new(longitude, latitude, altitude);
        self.lock().position = Some(position);
        info!(latitude, longitude, altitude, "Node position set");
        Ok(position)
    }

    /// Sets the spread radius in meters; zero stops publication.
    pub fn set_publicity(&self, r: f64) -> Result<()> {
        if !r.is_finite() || r < 0.0 {
            return Err(Error::InvalidArgument(format!("publicity {r} is invalid")));
        }
        self.lock().publicity = r;
        info!(publicity = r, "Node publicity set");
        Ok(())
    }

    /// Peers heard from recently, ordered by id.
    pub fn list_node(&self) -> Vec<PublishNode> {
        let inner = self.lock();
        let mut nodes: Vec<PublishNode> = inner.peers.values().map(|p| p.state.clone()).collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    pub fn receive_publishing_node(&self, state: PublishNode) {
        if state.id == self.node_id {
            return;
        }
        debug!(node_id = %state.id, name = %state.name, "Peer published");
        self.lock().peers.insert(
            state.id.clone(),
            Peer {
                last_seen: Instant::now(),
                state,
            },
        );
    }

    /// This node's entry for its account record.
    pub fn node_state(&self) -> AccountNodeState {
        AccountNodeState {
            name: self.name.clone(),
            timestamp: time::now(),
            node_type: self.node_type,
            position: self.position(),
        }
    }

    /// Sweeps expired peers, then publishes this node.
    pub async fn tick(&self) -> Result<()> {
        self.cleanup();
        self.publish().await
    }

    fn cleanup(&self) {
        let now = Instant::now();
        let lifetime = self.record_lifetime;
        let mut inner = self.lock();
        let before = inner.peers.len();
        inner
            .peers
            .retain(|_, peer| now.saturating_duration_since(peer.last_seen) <= lifetime);
        let expired = before - inner.peers.len();
        if expired > 0 {
            debug!(expired, "Forgot silent peers");
        }
    }

    async fn publish(&self) -> Result<()> {
        let (publicity, position) = {
            let inner = self.lock();
            (inner.publicity, inner.position)
        };
        let Some(position) = position.filter(|_| publicity > 0.0) else {
            debug!("Node is private, skipping publication");
            return Ok(());
        };

        let message = PublishNode {
            id: self.node_id.clone(),
            name: self.name.clone(),
            account: self.account.clone(),
            node_type: self.node_type,
            position,
        };
        self.messaging.publish_node(publicity, &message).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{install_handlers, InboundMessage};
    use crate::substrate::{MemoryNetwork, MemorySubstrate};
    use tokio::sync::mpsc;

    const A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    async fn node(network: &Arc<MemoryNetwork>, id: &str) -> NodeController {
        let substrate = Arc::new(MemorySubstrate::new(Arc::clone(network), id));
        substrate.connect("memory://", "").await.unwrap();
        NodeController::new(
            substrate,
            "alice",
            format!("node-{}", &id[..4]),
            NodeType::Pc,
            &ControllerSettings::default(),
        )
    }

    fn peer(id: &str) -> PublishNode {
        PublishNode {
            id: id.to_string(),
            name: "peer".to_string(),
            account: "bob".to_string(),
            node_type: NodeType::Mobile,
            position: Vector3::new(139.7, 35.7, 0.0),
        }
    }

    #[tokio::test]
    async fn test_position_is_validated() {
        let network = MemoryNetwork::new();
        let a = node(&network, A).await;

        assert!(matches!(
            a.set_position(91.0, 0.0, None).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            a.set_position(0.0, -180.5, None).await,
            Err(Error::InvalidArgument(_))
        ));

        let position = a.set_position(35.7, 139.7, Some(10.0)).await.unwrap();
        assert_eq!(position, Vector3::new(139.7, 35.7, 10.0));
        let (x, y) = a.substrate.last_position().unwrap();
        assert!((x - 139.7_f64.to_radians()).abs() < 1e-12);
        assert!((y - 35.7_f64.to_radians()).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_publicity_must_be_non_negative() {
        let network = MemoryNetwork::new();
        let a = node(&network, A).await;
        assert!(a.set_publicity(-1.0).is_err());
        assert!(a.set_publicity(f64::NAN).is_err());
        a.set_publicity(1000.0).unwrap();
        assert_eq!(a.publicity(), 1000.0);
    }

    #[tokio::test]
    async fn test_publication_reaches_nearby_peer() {
        let network = MemoryNetwork::new();
        let a = node(&network, A).await;
        let b = node(&network, B).await;
        let (tx, mut rx) = mpsc::channel(4);
        install_handlers(b.substrate.as_ref(), tx);

        // Private until both position and publicity are set.
        a.tick().await.unwrap();
        assert!(rx.try_recv().is_err());

        a.set_position(35.6812, 139.7671, None).await.unwrap();
        a.tick().await.unwrap();
        assert!(rx.try_recv().is_err());

        b.set_position(35.6586, 139.7454, None).await.unwrap();
        a.set_publicity(10_000.0).unwrap();
        a.tick().await.unwrap();

        let InboundMessage::PublishNode(state) = rx.try_recv().unwrap() else {
            panic!("expected a publishNode message");
        };
        assert_eq!(state.id, A);
        assert_eq!(state.account, "alice");
        assert_eq!(state.node_type, NodeType::Pc);

        b.receive_publishing_node(state);
        assert_eq!(b.list_node().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peers_expire() {
        let network = MemoryNetwork::new();
        let a = node(&network, A).await;
        a.receive_publishing_node(peer(B));
        a.receive_publishing_node(peer(A));
        assert_eq!(a.list_node().len(), 1);

        tokio::time::advance(Duration::from_secs(60)).await;
        a.tick().await.unwrap();
        assert_eq!(a.list_node().len(), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        a.tick().await.unwrap();
        assert!(a.list_node().is_empty());
    }

    #[tokio::test]
    async fn test_node_state_carries_position() {
        let network = MemoryNetwork::new();
        let a = node(&network, A).await;
        assert!(a.node_state().position.is_none());
        a.set_position(35.7, 139.7, None).await.unwrap();
        let state = a.node_state();
        assert_eq!(state.name, "node-aaaa");
        assert_eq!(state.position, Some(Vector3::new(139.7, 35.7, 0.0)));
    }
}
