use axum::{
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use super::{auth::AdminServer, Outcome};
use crate::{
    config::ServerConfig,
    error::{AppError, AppResult},
    state::AppState,
};

/// Administrative control of the power server, mounted under `/api/v1/server`
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(status))
        .route("/ping", get(ping))
        .route("/start", post(start))
        .route("/pause", post(pause))
        .route("/resume", post(resume))
        .route("/stop", post(stop))
        .route("/retrain", post(retrain))
        .route("/shutdown", post(shutdown))
        .route("/config", get(get_config).put(set_config))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub started: bool,
    pub paused: bool,
    pub running: bool,
    pub active: i64,
}

async fn status(AdminServer(server): AdminServer) -> Json<StatusResponse> {
    Json(StatusResponse {
        started: server.is_started().await,
        paused: server.is_paused().await,
        running: server.is_running().await,
        active: server.measure().value(),
    })
}

async fn ping(AdminServer(server): AdminServer) -> Json<Outcome> {
    Json(Outcome::from(server.ping().await))
}

async fn start(AdminServer(server): AdminServer) -> Json<Outcome> {
    Json(Outcome::from(server.start().await))
}

async fn pause(AdminServer(server): AdminServer) -> Json<Outcome> {
    Json(Outcome::from(server.pause().await))
}

async fn resume(AdminServer(server): AdminServer) -> Json<Outcome> {
    Json(Outcome::from(server.resume().await))
}

async fn stop(AdminServer(server): AdminServer) -> Json<Outcome> {
    Json(Outcome::from(server.stop().await))
}

async fn retrain(AdminServer(server): AdminServer) -> Json<Outcome> {
    Json(Outcome::from(server.retrain().await))
}

async fn shutdown(AdminServer(server): AdminServer) -> Json<Outcome> {
    Json(Outcome::from(server.shutdown().await))
}

async fn get_config(AdminServer(server): AdminServer) -> AppResult<Json<ServerConfig>> {
    server
        .config()
        .await
        .map(Json)
        .ok_or_else(|| AppError::Unavailable("Server has been shut down".into()))
}

async fn set_config(
    AdminServer(server): AdminServer,
    Json(config): Json<ServerConfig>,
) -> Json<Outcome> {
    Json(Outcome::from(server.set_config(config).await))
}
