//! Object controller: scene entities created by pods and announced to
//! nearby nodes.
//!
//! An announcement only carries the uuid; the receiver looks the object up
//! and shows or hides it accordingly. The holder of an object's primary
//! replica re-announces it every reconcile pass, and announcements not
//! refreshed within the node record lifetime are forgotten.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use burrow_api::{Object, ObjectMeta, ObjectSpec, ResourceType, SpreadObject};
use burrow_id::ObjectUuid;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::node::NodeController;
use super::Disposition;
use crate::config::ControllerSettings;
use crate::error::{Error, Result};
use crate::kvs::{self, ObjectKvs, PodKvs};
use crate::messaging::MessagingDriver;

pub struct ObjectController {
    node_id: String,
    objects: ObjectKvs,
    pods: PodKvs,
    nodes: Arc<NodeController>,
    messaging: MessagingDriver,
    lifetime: Duration,
    /// Objects announced to this node and when they were last announced.
    visible: Mutex<BTreeMap<String, Instant>>,
}

impl ObjectController {
    pub fn new(
        node_id: impl Into<String>,
        objects: ObjectKvs,
        pods: PodKvs,
        nodes: Arc<NodeController>,
        messaging: MessagingDriver,
        settings: &ControllerSettings,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            objects,
            pods,
            nodes,
            messaging,
            lifetime: settings.node_record_lifetime,
            visible: Mutex::new(BTreeMap::new()),
        }
    }

    /// Stores a new object owned by the owner of `pod_uuid`.
    pub async fn create(&self, name: &str, pod_uuid: &str, spec: ObjectSpec) -> Result<Object> {
        let pod = self
            .pods
            .get(pod_uuid)
            .await?
            .ok_or_else(|| Error::NotFound(PodKvs::key(pod_uuid)))?;

        let object = Object {
            meta: ObjectMeta::new(
                ResourceType::Object,
                name,
                pod.meta.owner,
                self.node_id.clone(),
                ObjectUuid::new().to_string(),
            ),
            spec,
        };
        self.objects.create(&object).await?;
        info!(object_uuid = %object.meta.uuid, pod_uuid = %pod_uuid, "Object created");
        self.spread(&object).await;
        Ok(object)
    }

    pub async fn update(&self, object: &Object) -> Result<()> {
        self.objects.update(object).await?;
        self.spread(object).await;
        Ok(())
    }

    pub async fn get(&self, uuid: &str) -> Result<Object> {
        self.objects
            .get(uuid)
            .await?
            .ok_or_else(|| Error::NotFound(ObjectKvs::key(uuid)))
    }

    /// Tombstones the object and announces the removal.
    pub async fn delete(&self, uuid: &str) -> Result<()> {
        let object = self.objects.get(uuid).await?;
        self.objects.delete(uuid).await?;
        self.visible().remove(uuid);
        info!(object_uuid = %uuid, "Object deleted");
        if let Some(object) = object {
            self.spread(&object).await;
        }
        Ok(())
    }

    /// Shows an announced object, or hides it when it no longer exists.
    pub async fn receive_spread_event(&self, uuid: &str) -> Result<()> {
        let exists = self.objects.get(uuid).await?.is_some();
        let mut visible = self.visible();
        if exists {
            debug!(object_uuid = %uuid, "Object announced");
            visible.insert(uuid.to_string(), Instant::now());
        } else if visible.remove(uuid).is_some() {
            debug!(object_uuid = %uuid, "Announced object is gone");
        }
        Ok(())
    }

    pub fn list_visible(&self) -> Vec<String> {
        self.visible().keys().cloned().collect()
    }

    /// Forgets objects not announced within the lifetime.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let lifetime = self.lifetime;
        let mut visible = self.visible();
        let before = visible.len();
        visible.retain(|_, seen| now.saturating_duration_since(*seen) <= lifetime);
        let expired = before - visible.len();
        if expired > 0 {
            debug!(expired, "Forgot stale objects");
        }
    }

    /// Reaps invalid object records and re-announces live ones.
    pub async fn reconcile_local(&self, key: &str, raw: &[u8]) -> Result<Disposition> {
        match kvs::decode::<Object>(key, raw) {
            Ok(object) => {
                self.spread(&object).await;
                Ok(Disposition::Keep)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Reaping invalid object record");
                Ok(Disposition::Delete)
            }
        }
    }

    fn visible(&self) -> MutexGuard<'_, BTreeMap<String, Instant>> {
        self.visible.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Announces the object around its own position, or the node's.
    async fn spread(&self, object: &Object) {
        let r = self.nodes.publicity();
        let Some(position) = object.spec.position.or_else(|| self.nodes.position()) else {
            debug!(object_uuid = %object.meta.uuid, "No position, object not spread");
            return;
        };
        if r <= 0.0 {
            return;
        }

        let message = SpreadObject {
            uuid: object.meta.uuid.clone(),
        };
        if let Err(e) = self.messaging.spread_object(position, r, &message).await {
            warn!(object_uuid = %object.meta.uuid, error = %e, "Failed to spread object");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerSettings;
    use crate::kvs::Kvs;
    use crate::messaging::{install_handlers, InboundMessage};
    use crate::substrate::{MemoryNetwork, MemorySubstrate, Substrate};
    use burrow_api::{
        ContainerSpec, NodeType, Pod, PodSpec, PodStatus, RestartPolicy, Vector3,
    };
    use tokio::sync::mpsc;

    const A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    const U: &str = "6f1c2a7e-3b0d-4c1e-9f55-0a8b7c6d5e41";

    async fn harness(network: &Arc<MemoryNetwork>) -> (ObjectController, Kvs) {
        let a: Arc<dyn Substrate> = Arc::new(MemorySubstrate::new(Arc::clone(network), A));
        a.connect("memory://", "").await.unwrap();
        let kvs = Kvs::new(Arc::clone(&a));
        let nodes = Arc::new(NodeController::new(
            Arc::clone(&a),
            "alice",
            "n1",
            NodeType::Pc,
            &ControllerSettings::default(),
        ));
        let controller = ObjectController::new(
            A,
            kvs.objects(),
            kvs.pods(),
            nodes,
            MessagingDriver::new(a),
            &ControllerSettings::default(),
        );
        (controller, kvs)
    }

    async fn pod(kvs: &Kvs) {
        let pod = Pod {
            meta: ObjectMeta::new(ResourceType::Pod, "hello", "alice", A, U),
            spec: PodSpec {
                containers: vec![ContainerSpec {
                    name: "c1".to_string(),
                    image: "https://host/a.wasm".to_string(),
                    runtime: vec!["go:1.20".to_string()],
                    restart_policy: RestartPolicy::Disable,
                    ..Default::default()
                }],
                ..Default::default()
            },
            status: PodStatus::waiting(1),
        };
        kvs.pods().create(&pod).await.unwrap();
    }

    #[tokio::test]
    async fn test_object_lifecycle() {
        let network = MemoryNetwork::new();
        let (controller, kvs) = harness(&network).await;
        pod(&kvs).await;

        let object = controller
            .create("sign", U, ObjectSpec::default())
            .await
            .unwrap();
        assert_eq!(object.meta.owner, "alice");
        assert_eq!(controller.get(&object.meta.uuid).await.unwrap(), object);

        let mut moved = object.clone();
        moved.spec.position = Some(Vector3::new(139.7, 35.7, 0.0));
        controller.update(&moved).await.unwrap();
        assert_eq!(
            controller.get(&object.meta.uuid).await.unwrap().spec.position,
            moved.spec.position
        );

        controller.delete(&object.meta.uuid).await.unwrap();
        assert!(matches!(
            controller.get(&object.meta.uuid).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_requires_pod() {
        let network = MemoryNetwork::new();
        let (controller, _kvs) = harness(&network).await;
        let err = controller
            .create("sign", U, ObjectSpec::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_object_is_spread_to_peers() {
        let network = MemoryNetwork::new();
        let (controller, kvs) = harness(&network).await;
        pod(&kvs).await;

        let b = MemorySubstrate::new(Arc::clone(&network), B);
        b.connect("memory://", "").await.unwrap();
        b.set_position(139.7_f64.to_radians(), 35.7_f64.to_radians())
            .await
            .unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        install_handlers(&b, tx);

        controller.nodes.set_position(35.7, 139.7, None).await.unwrap();
        controller.nodes.set_publicity(1000.0).unwrap();
        let object = controller
            .create("sign", U, ObjectSpec::default())
            .await
            .unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            InboundMessage::SpreadObject(SpreadObject {
                uuid: object.meta.uuid.clone()
            })
        );
    }

    #[tokio::test]
    async fn test_visible_set_follows_the_store() {
        let network = MemoryNetwork::new();
        let (controller, kvs) = harness(&network).await;
        pod(&kvs).await;
        let first = controller.create("a", U, ObjectSpec::default()).await.unwrap();
        let second = controller.create("b", U, ObjectSpec::default()).await.unwrap();

        controller.receive_spread_event(&second.meta.uuid).await.unwrap();
        controller.receive_spread_event(&first.meta.uuid).await.unwrap();
        controller.receive_spread_event(&first.meta.uuid).await.unwrap();
        controller.receive_spread_event("missing").await.unwrap();
        let mut expected = vec![first.meta.uuid.clone(), second.meta.uuid.clone()];
        expected.sort();
        assert_eq!(controller.list_visible(), expected);

        // Removal elsewhere is learned from the next announcement.
        kvs.objects().delete(&first.meta.uuid).await.unwrap();
        controller.receive_spread_event(&first.meta.uuid).await.unwrap();
        assert_eq!(controller.list_visible(), vec![second.meta.uuid.clone()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrefreshed_objects_expire() {
        let network = MemoryNetwork::new();
        let (controller, kvs) = harness(&network).await;
        pod(&kvs).await;
        let object = controller.create("a", U, ObjectSpec::default()).await.unwrap();
        controller.receive_spread_event(&object.meta.uuid).await.unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        controller.cleanup();
        assert_eq!(controller.list_visible().len(), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        controller.cleanup();
        assert!(controller.list_visible().is_empty());
    }

    #[tokio::test]
    async fn test_live_object_is_reannounced() {
        let network = MemoryNetwork::new();
        let (controller, kvs) = harness(&network).await;
        pod(&kvs).await;

        let b = MemorySubstrate::new(Arc::clone(&network), B);
        b.connect("memory://", "").await.unwrap();
        b.set_position(139.7_f64.to_radians(), 35.7_f64.to_radians())
            .await
            .unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        install_handlers(&b, tx);

        let object = controller.create("sign", U, ObjectSpec::default()).await.unwrap();
        assert!(rx.try_recv().is_err());

        controller.nodes.set_position(35.7, 139.7, None).await.unwrap();
        controller.nodes.set_publicity(1000.0).unwrap();
        let key = ObjectKvs::key(&object.meta.uuid);
        let raw = network.peek(&key).flatten().unwrap();
        assert_eq!(
            controller.reconcile_local(&key, &raw).await.unwrap(),
            Disposition::Keep
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            InboundMessage::SpreadObject(SpreadObject {
                uuid: object.meta.uuid.clone()
            })
        );
    }
}
