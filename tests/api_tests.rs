use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use recserve::{
    config::ServerConfig, routes::create_router, server::PowerServer, services::ItemMeanFactory,
    state::AppState,
};

async fn create_test_app() -> (tempfile::TempDir, Arc<PowerServer>, Router) {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        store_uri: format!("file:{}", dir.path().display()),
        parser: "scanner".to_string(),
        ..ServerConfig::default()
    };
    let server = Arc::new(PowerServer::new(config, Arc::new(ItemMeanFactory)));
    assert!(server.start().await);
    let app = create_router(AppState::new(server.clone()));
    (dir, server, app)
}

fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-account", "admin")
        .header("x-password", "admin");
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn test_health_check() {
    let (_dir, _server, app) = create_test_app().await;
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_missing_credentials_are_rejected() {
    let (_dir, _server, app) = create_test_app().await;
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/service/ids/users")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_wrong_password_is_rejected() {
    let (_dir, _server, app) = create_test_app().await;
    let request = Request::builder()
        .uri("/api/v1/server/status")
        .header("x-account", "admin")
        .header("x-password", "nope")
        .body(Body::empty())
        .unwrap();

    let (status, body) = call(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");
}

#[tokio::test]
async fn test_rating_write_then_read() {
    let (_dir, _server, app) = create_test_app().await;

    let triple = json!({ "user_id": 1, "item_id": 10, "rating": { "value": 4.0 } });
    let (status, body) = call(&app, request(Method::PUT, "/api/v1/service/ratings", Some(triple))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    let (status, body) = call(&app, request(Method::GET, "/api/v1/service/ratings/1/10", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"], 4.0);

    let (_, body) = call(&app, request(Method::GET, "/api/v1/service/ids/items", None)).await;
    assert_eq!(body, json!([10]));

    let (_, body) = call(&app, request(Method::DELETE, "/api/v1/service/ratings/1/10", None)).await;
    assert_eq!(body["ok"], true);

    let (status, _) = call(&app, request(Method::GET, "/api/v1/service/ratings/1/10", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_profile_kind_is_bad_request() {
    let (_dir, _server, app) = create_test_app().await;
    let (status, _) = call(&app, request(Method::GET, "/api/v1/service/ids/movies", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_external_record_round_trip() {
    let (_dir, _server, app) = create_test_app().await;

    let profile = json!({ "itemid": 7 });
    let (_, body) = call(&app, request(Method::PUT, "/api/v1/service/profiles/items", Some(profile))).await;
    assert_eq!(body["ok"], true);

    let external = json!({ "unit": "movies", "attribute": "movie_id", "value": "tt0133093" });
    let (_, body) = call(
        &app,
        request(Method::PUT, "/api/v1/service/externals/items/7", Some(external.clone())),
    )
    .await;
    assert_eq!(body["ok"], true);

    let (status, body) = call(&app, request(Method::GET, "/api/v1/service/externals/items/7", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, external);

    let incomplete = json!({ "unit": "movies", "attribute": "", "value": "x" });
    let (status, body) = call(
        &app,
        request(Method::PUT, "/api/v1/service/externals/items/7", Some(incomplete)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], false);

    let (_, body) = call(&app, request(Method::GET, "/api/v1/service/externals/items/7", None)).await;
    assert_eq!(body, external);
}

#[tokio::test]
async fn test_recommend_after_retrain() {
    let (_dir, _server, app) = create_test_app().await;

    for (user, item, value) in [(1, 10, 5.0), (2, 10, 4.0), (2, 20, 2.0), (3, 30, 3.0)] {
        let triple = json!({ "user_id": user, "item_id": item, "rating": { "value": value } });
        let (_, body) = call(&app, request(Method::PUT, "/api/v1/service/ratings", Some(triple))).await;
        assert_eq!(body["ok"], true);
    }

    let (_, body) = call(&app, request(Method::POST, "/api/v1/server/retrain", None)).await;
    assert_eq!(body["ok"], true);

    let (status, body) = call(&app, request(Method::GET, "/api/v1/service/recommend/1?max=1", None)).await;
    assert_eq!(status, StatusCode::OK);
    let ratings = body["ratings"].as_object().unwrap();
    assert_eq!(ratings.len(), 1);
    assert!(ratings.contains_key("30"));
}

#[tokio::test]
async fn test_server_status_and_stop() {
    let (_dir, _server, app) = create_test_app().await;

    let (status, body) = call(&app, request(Method::GET, "/api/v1/server/status", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["started"], true);
    assert_eq!(body["paused"], false);
    assert_eq!(body["running"], true);
    // the status call itself is in flight
    assert_eq!(body["active"], 1);

    let (_, body) = call(&app, request(Method::POST, "/api/v1/server/stop", None)).await;
    assert_eq!(body["ok"], true);

    let (status, _) = call(&app, request(Method::GET, "/api/v1/service/ids/users", None)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_config_can_only_change_while_stopped() {
    let (_dir, _server, app) = create_test_app().await;

    let (_, config) = call(&app, request(Method::GET, "/api/v1/server/config", None)).await;
    assert_eq!(config["parser"], "scanner");

    let (_, body) = call(&app, request(Method::PUT, "/api/v1/server/config", Some(config.clone()))).await;
    assert_eq!(body["ok"], false);

    call(&app, request(Method::POST, "/api/v1/server/stop", None)).await;
    let (_, body) = call(&app, request(Method::PUT, "/api/v1/server/config", Some(config))).await;
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn test_evaluator_lookup_by_name() {
    let (_dir, _server, app) = create_test_app().await;

    let (_, names) = call(&app, request(Method::GET, "/api/v1/service/evaluators", None)).await;
    let names: Vec<String> = serde_json::from_value(names).unwrap();
    assert!(names.contains(&"rmse".to_string()));

    let (status, body) = call(&app, request(Method::GET, "/api/v1/service/evaluators/rmse", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "rmse");

    let (status, _) = call(&app, request(Method::GET, "/api/v1/service/evaluators/nope", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
