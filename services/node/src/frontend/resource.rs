//! `resource/*` calls: node placement and pod management.

use std::collections::BTreeSet;

use axum::{
    extract::{rejection::JsonRejection, State},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use burrow_api::{PodSpec, PublishNode, Vector3};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{error::ApiError, AppState, RequestContext};
use crate::controller::ApplicationDigest;
use crate::Error;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/setNodePosition", post(set_node_position))
        .route("/setNodePublicity", post(set_node_publicity))
        .route("/listNode", post(list_node))
        .route("/createPod", post(create_pod))
        .route("/listPod", post(list_pod))
        .route("/migratePod", post(migrate_pod))
        .route("/deletePod", post(delete_pod))
        .route("/cleanupPod", post(cleanup_pod))
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Position in degrees; altitude in meters.
#[derive(Debug, Deserialize)]
pub struct SetNodePositionRequest {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct SetNodePositionResponse {
    pub position: Vector3,
}

#[derive(Debug, Deserialize)]
pub struct SetNodePublicityRequest {
    /// Spread radius in meters.
    pub r: f64,
}

#[derive(Debug, Serialize)]
pub struct ListNodeResponse {
    pub nodes: Vec<PublishNode>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePodRequest {
    pub name: String,
    pub spec: PodSpec,
}

#[derive(Debug, Serialize)]
pub struct CreatePodResponse {
    pub digest: ApplicationDigest,
}

#[derive(Debug, Serialize)]
pub struct ListPodResponse {
    pub digests: Vec<ApplicationDigest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigratePodRequest {
    pub uuid: String,
    pub target_node: String,
}

#[derive(Debug, Deserialize)]
pub struct PodRequest {
    pub uuid: String,
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /resource/setNodePosition
async fn set_node_position(
    State(system): State<AppState>,
    ctx: RequestContext,
    payload: Result<Json<SetNodePositionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = ctx.body(payload)?;
    let position = system
        .set_position(req.latitude, req.longitude, req.altitude)
        .await
        .map_err(|e| ctx.fail("setNodePosition", e))?;
    Ok(Json(SetNodePositionResponse { position }))
}

/// POST /resource/setNodePublicity
async fn set_node_publicity(
    State(system): State<AppState>,
    ctx: RequestContext,
    payload: Result<Json<SetNodePublicityRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = ctx.body(payload)?;
    let controllers = system
        .controllers()
        .await
        .map_err(|e| ctx.fail("setNodePublicity", e))?;
    controllers
        .nodes
        .set_publicity(req.r)
        .map_err(|e| ctx.fail("setNodePublicity", e))?;
    Ok(Json(json!({})))
}

/// POST /resource/listNode
async fn list_node(
    State(system): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, ApiError> {
    let controllers = system
        .controllers()
        .await
        .map_err(|e| ctx.fail("listNode", e))?;
    Ok(Json(ListNodeResponse {
        nodes: controllers.nodes.list_node(),
    }))
}

/// POST /resource/createPod
///
/// The pod is owned by the session account and created by this node.
async fn create_pod(
    State(system): State<AppState>,
    ctx: RequestContext,
    payload: Result<Json<CreatePodRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = ctx.body(payload)?;
    let controllers = system
        .controllers()
        .await
        .map_err(|e| ctx.fail("createPod", e))?;
    let account = system
        .get_account()
        .await
        .ok_or_else(|| ctx.fail("createPod", Error::NotConnected))?;

    let digest = controllers
        .pods
        .create(&req.name, &account, &system.get_node(), req.spec)
        .await
        .map_err(|e| ctx.fail("createPod", e))?;
    Ok(Json(CreatePodResponse { digest }))
}

/// POST /resource/listPod
///
/// Pods recorded under the session account plus those hosted here.
async fn list_pod(
    State(system): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, ApiError> {
    let controllers = system
        .controllers()
        .await
        .map_err(|e| ctx.fail("listPod", e))?;
    let account = system
        .get_account()
        .await
        .ok_or_else(|| ctx.fail("listPod", Error::NotConnected))?;

    let mut uuids: BTreeSet<String> = controllers
        .accounts
        .get_pod_state(&account)
        .await
        .map_err(|e| ctx.fail("listPod", e))?
        .into_keys()
        .collect();
    uuids.extend(
        controllers
            .containers
            .get_container_infos()
            .await
            .into_iter()
            .map(|info| info.pod_uuid),
    );

    let mut digests = Vec::with_capacity(uuids.len());
    for uuid in uuids {
        match controllers.pods.get(&uuid).await {
            Ok(pod) => digests.push(ApplicationDigest::from(&pod)),
            Err(Error::NotFound(_)) => debug!(pod_uuid = %uuid, "Listed pod is gone"),
            Err(e) => return Err(ctx.fail("listPod", e)),
        }
    }
    Ok(Json(ListPodResponse { digests }))
}

/// POST /resource/migratePod
async fn migrate_pod(
    State(system): State<AppState>,
    ctx: RequestContext,
    payload: Result<Json<MigratePodRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = ctx.body(payload)?;
    let controllers = system
        .controllers()
        .await
        .map_err(|e| ctx.fail("migratePod", e))?;
    controllers
        .pods
        .migrate(&req.uuid, &req.target_node)
        .await
        .map_err(|e| ctx.fail("migratePod", e))?;
    Ok(Json(json!({})))
}

/// POST /resource/deletePod
async fn delete_pod(
    State(system): State<AppState>,
    ctx: RequestContext,
    payload: Result<Json<PodRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = ctx.body(payload)?;
    let controllers = system
        .controllers()
        .await
        .map_err(|e| ctx.fail("deletePod", e))?;
    controllers
        .pods
        .delete(&req.uuid)
        .await
        .map_err(|e| ctx.fail("deletePod", e))?;
    Ok(Json(json!({})))
}

/// POST /resource/cleanupPod
///
/// Drops a pod whose containers are all `Unknown`.
async fn cleanup_pod(
    State(system): State<AppState>,
    ctx: RequestContext,
    payload: Result<Json<PodRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = ctx.body(payload)?;
    let controllers = system
        .controllers()
        .await
        .map_err(|e| ctx.fail("cleanupPod", e))?;
    controllers
        .pods
        .cleanup(&req.uuid)
        .await
        .map_err(|e| ctx.fail("cleanupPod", e))?;
    Ok(Json(json!({})))
}
