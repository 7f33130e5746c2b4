use axum::{http::StatusCode, middleware, routing::get, Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::{
    middleware::{active_measure_middleware, make_span_with_request_id, request_id_middleware},
    state::AppState,
};

pub mod auth;
pub mod server;
pub mod service;

/// Body of every write or control call
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Outcome {
    pub ok: bool,
}

impl From<bool> for Outcome {
    fn from(ok: bool) -> Self {
        Self { ok }
    }
}

/// Creates the application router with all routes
pub fn create_router(state: AppState) -> Router {
    let measure = state.server.measure().clone();

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_routes())
        .layer(middleware::from_fn_with_state(measure, active_measure_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// API routes under /api/v1
fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/service", service::routes())
        .nest("/server", server::routes())
}

/// Health check endpoint
async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}
