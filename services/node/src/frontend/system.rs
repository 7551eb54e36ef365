//! `system/*` calls: session lifecycle and node information.

use axum::{
    extract::{rejection::JsonRejection, State},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::{error::ApiError, AppState, RequestContext};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/connect", post(connect))
        .route("/disconnect", post(disconnect))
        .route("/info", post(info))
        .route("/config", post(config))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    /// Seed URL of the overlay.
    pub url: String,
    pub account: String,
    #[serde(default)]
    pub token: String,
    pub node_name: String,
    /// `Mobile`, `SmallDevice`, `PC`, `Server`, `Grass` or `Other`.
    pub node_type: String,
}

/// POST /system/connect
async fn connect(
    State(system): State<AppState>,
    ctx: RequestContext,
    payload: Result<Json<ConnectRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = ctx.body(payload)?;
    let info = system
        .connect(
            &req.url,
            &req.account,
            &req.token,
            &req.node_name,
            &req.node_type,
        )
        .await
        .map_err(|e| ctx.fail("connect", e))?;
    Ok(Json(info))
}

/// POST /system/disconnect
async fn disconnect(
    State(system): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, ApiError> {
    system
        .disconnect()
        .await
        .map_err(|e| ctx.fail("disconnect", e))?;
    Ok(Json(json!({})))
}

/// POST /system/info
async fn info(State(system): State<AppState>) -> impl IntoResponse {
    Json(system.info().await)
}

/// POST /system/config
async fn config(State(system): State<AppState>) -> impl IntoResponse {
    Json(system.settings().clone())
}
