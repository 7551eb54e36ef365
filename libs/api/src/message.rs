//! Inter-node message payloads.

use serde::{Deserialize, Serialize};

use crate::{NodeType, Vector3};

/// Direct post asking the hosting node to converge a pod's containers.
pub const MESSAGE_RECONCILE_CONTAINER: &str = "reconcileContainer";

/// Spread announcing a node to peers around its position.
pub const MESSAGE_PUBLISH_NODE: &str = "publishNode";

/// Spread announcing an object to peers around its position.
pub const MESSAGE_SPREAD_OBJECT: &str = "spreadObject";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileContainer {
    pub pod_uuid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishNode {
    pub id: String,
    pub name: String,
    pub account: String,
    pub node_type: NodeType,
    pub position: Vector3,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpreadObject {
    pub uuid: String,
}
