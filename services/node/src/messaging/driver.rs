//! Outbound messages.

use std::sync::Arc;

use burrow_api::{
    PublishNode, ReconcileContainer, SpreadObject, Vector3, MESSAGE_PUBLISH_NODE,
    MESSAGE_RECONCILE_CONTAINER, MESSAGE_SPREAD_OBJECT,
};
use serde::Serialize;
use tracing::debug;

use super::MessagingError;
use crate::substrate::Substrate;

/// Sends typed messages over the substrate.
#[derive(Clone)]
pub struct MessagingDriver {
    substrate: Arc<dyn Substrate>,
}

fn encode<M: Serialize>(name: &'static str, message: &M) -> Result<Vec<u8>, MessagingError> {
    serde_json::to_vec(message).map_err(|source| MessagingError::Encode { name, source })
}

impl MessagingDriver {
    pub fn new(substrate: Arc<dyn Substrate>) -> Self {
        Self { substrate }
    }

    /// Asks `dst` to converge its runtime for `pod_uuid`.
    ///
    /// Delivery is at most once; the next reconcile tick sends again.
    pub async fn reconcile_container(&self, dst: &str, pod_uuid: &str) -> Result<(), MessagingError> {
        let payload = encode(
            MESSAGE_RECONCILE_CONTAINER,
            &ReconcileContainer {
                pod_uuid: pod_uuid.to_string(),
            },
        )?;
        debug!(dst = %dst, pod_uuid = %pod_uuid, "Posting reconcileContainer");
        self.substrate
            .messaging_post(dst, MESSAGE_RECONCILE_CONTAINER, payload)
            .await
            .map(|_| ())
            .map_err(|source| MessagingError::Post {
                dst: dst.to_string(),
                name: MESSAGE_RECONCILE_CONTAINER,
                source,
            })
    }

    /// Spreads this node's presence to nodes within `r` meters.
    pub async fn publish_node(&self, r: f64, message: &PublishNode) -> Result<(), MessagingError> {
        let payload = encode(MESSAGE_PUBLISH_NODE, message)?;
        self.spread(message.position, r, MESSAGE_PUBLISH_NODE, payload)
            .await
    }

    /// Announces an object to nodes within `r` meters of `position`.
    pub async fn spread_object(
        &self,
        position: Vector3,
        r: f64,
        message: &SpreadObject,
    ) -> Result<(), MessagingError> {
        let payload = encode(MESSAGE_SPREAD_OBJECT, message)?;
        self.spread(position, r, MESSAGE_SPREAD_OBJECT, payload)
            .await
    }

    async fn spread(
        &self,
        position: Vector3,
        r: f64,
        name: &'static str,
        payload: Vec<u8>,
    ) -> Result<(), MessagingError> {
        let (x, y) = position.to_radians();
        self.substrate
            .spread_post(x, y, r, name, payload)
            .await
            .map_err(|source| MessagingError::Spread { name, source })
    }
}
