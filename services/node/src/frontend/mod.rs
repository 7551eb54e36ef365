//! Frontend RPC router.
//!
//! Every call is a `POST` with a JSON body and a JSON reply. Failures are
//! rendered as `application/problem+json`.

pub mod error;
mod resource;
mod system;

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, FromRequestParts},
    http::{header, request::Parts, HeaderName, Method},
    Json, Router,
};
use serde::de::DeserializeOwned;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::controller::SystemController;
use error::ApiError;

pub use error::ProblemDetails;

/// State shared by every handler.
pub type AppState = Arc<SystemController>;

const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Create the frontend router with all routes and middleware.
pub fn create_router(system: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .allow_origin(Any);

    Router::new()
        .nest("/system", system::routes())
        .nest("/resource", resource::routes())
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(REQUEST_ID_HEADER))
        .layer(SetRequestIdLayer::new(REQUEST_ID_HEADER, MakeRequestUuid))
        .layer(cors)
        .with_state(system)
}

// =============================================================================
// Request context
// =============================================================================

#[derive(Debug, Clone)]
pub(crate) struct RequestContext {
    pub request_id: String,
}

impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = parts
            .headers
            .get(&REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        Ok(Self { request_id })
    }
}

impl RequestContext {
    /// Unwraps a JSON body, reporting malformed input as a problem.
    pub fn body<T: DeserializeOwned>(
        &self,
        payload: Result<Json<T>, JsonRejection>,
    ) -> Result<T, ApiError> {
        payload.map(|Json(body)| body).map_err(|rejection| {
            ApiError::bad_request("invalid_body", rejection.body_text())
                .with_request_id(self.request_id.clone())
        })
    }

    /// Converts a controller error, logging it with the request id.
    pub fn fail(&self, operation: &'static str, err: crate::Error) -> ApiError {
        tracing::warn!(request_id = %self.request_id, operation, error = %err, "Frontend call failed");
        ApiError::from(err).with_request_id(self.request_id.clone())
    }
}
