//! Inbound messages.

use std::sync::Arc;

use burrow_api::{
    PublishNode, ReconcileContainer, SpreadObject, MESSAGE_PUBLISH_NODE,
    MESSAGE_RECONCILE_CONTAINER, MESSAGE_SPREAD_OBJECT,
};
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use crate::controller::{ContainerController, NodeController, ObjectController};
use crate::error::Result;
use crate::substrate::{MessageRequest, SpreadRequest, Substrate};

/// A decoded inbound message waiting to be handled.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    ReconcileContainer(ReconcileContainer),
    PublishNode(PublishNode),
    SpreadObject(SpreadObject),
}

fn decode<M: DeserializeOwned>(name: &str, source: &str, payload: &[u8]) -> Option<M> {
    match serde_json::from_slice(payload) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!(name = %name, source = %source, error = %e, "Dropping malformed message");
            None
        }
    }
}

fn enqueue(tx: &mpsc::Sender<InboundMessage>, message: InboundMessage) {
    if let Err(e) = tx.try_send(message) {
        // The sender retries on its next tick.
        warn!(error = %e, "Inbound queue unavailable, dropping message");
    }
}

/// Registers handlers that decode and queue inbound messages.
pub fn install_handlers(substrate: &dyn Substrate, tx: mpsc::Sender<InboundMessage>) {
    let reconcile_tx = tx.clone();
    substrate.messaging_set_handler(
        MESSAGE_RECONCILE_CONTAINER,
        Arc::new(move |request: MessageRequest| {
            if let Some(message) =
                decode(MESSAGE_RECONCILE_CONTAINER, &request.source, &request.payload)
            {
                enqueue(&reconcile_tx, InboundMessage::ReconcileContainer(message));
            }
            Vec::new()
        }),
    );

    let publish_tx = tx.clone();
    substrate.spread_set_handler(
        MESSAGE_PUBLISH_NODE,
        Arc::new(move |request: SpreadRequest| {
            if let Some(message) = decode(MESSAGE_PUBLISH_NODE, &request.source, &request.payload)
            {
                enqueue(&publish_tx, InboundMessage::PublishNode(message));
            }
        }),
    );

    substrate.spread_set_handler(
        MESSAGE_SPREAD_OBJECT,
        Arc::new(move |request: SpreadRequest| {
            if let Some(message) = decode(MESSAGE_SPREAD_OBJECT, &request.source, &request.payload)
            {
                enqueue(&tx, InboundMessage::SpreadObject(message));
            }
        }),
    );
}

pub fn uninstall_handlers(substrate: &dyn Substrate) {
    substrate.messaging_unset_handler(MESSAGE_RECONCILE_CONTAINER);
    substrate.spread_unset_handler(MESSAGE_PUBLISH_NODE);
    substrate.spread_unset_handler(MESSAGE_SPREAD_OBJECT);
}

/// Routes queued messages to the controllers.
#[derive(Clone)]
pub struct Dispatcher {
    pub containers: Arc<ContainerController>,
    pub nodes: Arc<NodeController>,
    pub objects: Arc<ObjectController>,
}

/// Container reconciles started by the dispatcher, each yielding its pod.
pub type Reconciles = JoinSet<(String, Result<()>)>;

impl Dispatcher {
    /// Handles one message.
    ///
    /// Container reconciles run on `reconciles` so a slow runtime does not
    /// stall the queue.
    pub async fn handle(&self, message: InboundMessage, reconciles: &mut Reconciles) {
        match message {
            InboundMessage::ReconcileContainer(ReconcileContainer { pod_uuid }) => {
                let containers = Arc::clone(&self.containers);
                reconciles.spawn(async move {
                    let result = containers.reconcile(&pod_uuid).await;
                    (pod_uuid, result)
                });
            }
            InboundMessage::PublishNode(state) => {
                self.nodes.receive_publishing_node(state);
            }
            InboundMessage::SpreadObject(SpreadObject { uuid }) => {
                if let Err(e) = self.objects.receive_spread_event(&uuid).await {
                    warn!(object_uuid = %uuid, error = %e, "Failed to apply object announcement");
                }
            }
        }
    }
}

fn reap(joined: std::result::Result<(String, Result<()>), JoinError>) {
    match joined {
        Ok((_, Ok(()))) => {}
        Ok((pod_uuid, Err(e))) => {
            warn!(pod_uuid = %pod_uuid, error = %e, "Container reconcile failed");
        }
        Err(e) if e.is_cancelled() => {}
        Err(e) => warn!(error = %e, "Container reconcile panicked"),
    }
}

/// Handles inbound messages until shutdown or until every sender is gone.
///
/// Container reconciles still in flight at that point are aborted; the next
/// prompt after reconnecting picks them up again.
pub async fn run_dispatcher(
    dispatcher: Dispatcher,
    mut rx: mpsc::Receiver<InboundMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Message dispatcher started");
    let mut reconciles = Reconciles::new();
    loop {
        tokio::select! {
            message = rx.recv() => {
                let Some(message) = message else {
                    debug!("Inbound queue closed");
                    break;
                };
                dispatcher.handle(message, &mut reconciles).await;
            }
            Some(joined) = reconciles.join_next(), if !reconciles.is_empty() => {
                reap(joined);
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    if !reconciles.is_empty() {
        info!(in_flight = reconciles.len(), "Aborting container reconciles");
    }
    reconciles.shutdown().await;
    info!("Message dispatcher stopped");
}
