//! RPC surface of the live service, mounted under `/api/v1/service`

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::{auth::AccessService, Outcome};
use crate::{
    error::{AppError, AppResult},
    models::{
        AttributeList, ExternalRecord, Nominal, Profile, ProfileKind, Rating, RatingTriple,
        RatingVector, Value,
    },
    services::recommender::{AlgDesc, RecommendParam},
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/desc", get(desc))
        .route("/estimate", post(estimate))
        .route("/recommend", post(recommend))
        .route("/recommend/:user", get(recommend_user))
        .route("/ids/:kind", get(ids))
        .route("/ratings", put(update_rating))
        .route("/ratings/:user/:item", get(get_rating).delete(delete_rating))
        .route(
            "/rating_vectors/:kind/:id",
            get(get_rating_vector)
                .put(update_rating_vector)
                .delete(delete_rating_vector),
        )
        .route("/profiles/:kind", put(update_profile))
        .route("/profiles/:kind/:id", get(get_profile).delete(delete_profile))
        .route("/attributes/:kind", get(attributes))
        .route("/nominals", post(insert_nominal).delete(delete_nominal))
        .route(
            "/externals/:kind/:id",
            get(get_external)
                .put(update_external)
                .delete(delete_external),
        )
        .route("/snapshot", get(snapshot))
        .route("/evaluators", get(evaluators))
        .route("/evaluators/:name", get(evaluator))
}

/// `users` or `items` path segment
fn parse_kind(segment: &str) -> AppResult<ProfileKind> {
    match segment {
        "users" | "user" => Ok(ProfileKind::User),
        "items" | "item" => Ok(ProfileKind::Item),
        other => Err(AppError::InvalidInput(format!("Unknown profile kind: {}", other))),
    }
}

async fn desc(AccessService(service): AccessService) -> AppResult<Json<AlgDesc>> {
    service
        .desc()
        .await
        .map(Json)
        .ok_or_else(|| AppError::Unavailable("No active recommender".into()))
}

#[derive(Debug, Deserialize)]
pub struct EstimateRequest {
    pub param: RecommendParam,
    pub item_ids: Vec<i64>,
}

async fn estimate(
    AccessService(service): AccessService,
    Json(request): Json<EstimateRequest>,
) -> Json<Option<RatingVector>> {
    Json(service.estimate(&request.param, &request.item_ids).await)
}

#[derive(Debug, Deserialize)]
pub struct RecommendRequest {
    pub param: RecommendParam,
    #[serde(default)]
    pub max: usize,
}

async fn recommend(
    AccessService(service): AccessService,
    Json(request): Json<RecommendRequest>,
) -> Json<Option<RatingVector>> {
    Json(service.recommend(&request.param, request.max).await)
}

#[derive(Debug, Deserialize)]
pub struct MaxQuery {
    #[serde(default)]
    pub max: usize,
}

async fn recommend_user(
    AccessService(service): AccessService,
    Path(user): Path<i64>,
    Query(query): Query<MaxQuery>,
) -> Json<Option<RatingVector>> {
    Json(service.recommend_user(user, query.max).await)
}

async fn ids(AccessService(service): AccessService, Path(kind): Path<String>) -> AppResult<Json<Vec<i64>>> {
    Ok(Json(service.ids(parse_kind(&kind)?).await))
}

async fn get_rating(
    AccessService(service): AccessService,
    Path((user, item)): Path<(i64, i64)>,
) -> AppResult<Json<Rating>> {
    service
        .rating(user, item)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Rating of user {} on item {}", user, item)))
}

async fn update_rating(
    AccessService(service): AccessService,
    Json(triple): Json<RatingTriple>,
) -> Json<Outcome> {
    Json(Outcome::from(service.update_rating(&triple).await))
}

async fn delete_rating(
    AccessService(service): AccessService,
    Path((user, item)): Path<(i64, i64)>,
) -> Json<Outcome> {
    Json(Outcome::from(service.delete_rating(user, item).await))
}

async fn get_rating_vector(
    AccessService(service): AccessService,
    Path((kind, id)): Path<(String, i64)>,
) -> AppResult<Json<RatingVector>> {
    service
        .rating_vector(parse_kind(&kind)?, id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Ratings of {} {}", kind, id)))
}

/// Body is `counterpart id -> rating`
async fn update_rating_vector(
    AccessService(service): AccessService,
    Path((kind, id)): Path<(String, i64)>,
    Json(ratings): Json<BTreeMap<i64, Rating>>,
) -> AppResult<Json<Outcome>> {
    let mut vector = RatingVector::new(id);
    for (counterpart, rating) in ratings {
        vector.put(counterpart, rating);
    }
    let ok = service.update_rating_vector(parse_kind(&kind)?, &vector).await;
    Ok(Json(Outcome::from(ok)))
}

async fn delete_rating_vector(
    AccessService(service): AccessService,
    Path((kind, id)): Path<(String, i64)>,
) -> AppResult<Json<Outcome>> {
    let ok = service.delete_rating_vector(parse_kind(&kind)?, id).await;
    Ok(Json(Outcome::from(ok)))
}

async fn get_profile(
    AccessService(service): AccessService,
    Path((kind, id)): Path<(String, i64)>,
) -> AppResult<Json<Profile>> {
    service
        .profile(parse_kind(&kind)?, id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Profile of {} {}", kind, id)))
}

/// Body is `attribute name -> value`; names the unit does not have are ignored
async fn update_profile(
    AccessService(service): AccessService,
    Path(kind): Path<String>,
    Json(values): Json<BTreeMap<String, Value>>,
) -> AppResult<Json<Outcome>> {
    let kind = parse_kind(&kind)?;
    let attributes = service
        .attributes(kind)
        .await
        .ok_or_else(|| AppError::Schema(format!("No attributes for {:?} profiles", kind)))?;
    let profile = Profile::from_map(Arc::new(attributes), &values);
    Ok(Json(Outcome::from(service.update_profile(kind, &profile).await)))
}

async fn delete_profile(
    AccessService(service): AccessService,
    Path((kind, id)): Path<(String, i64)>,
) -> AppResult<Json<Outcome>> {
    let ok = service.delete_profile(parse_kind(&kind)?, id).await;
    Ok(Json(Outcome::from(ok)))
}

async fn attributes(
    AccessService(service): AccessService,
    Path(kind): Path<String>,
) -> AppResult<Json<AttributeList>> {
    service
        .attributes(parse_kind(&kind)?)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Attributes of {}", kind)))
}

#[derive(Debug, Deserialize)]
pub struct NominalRequest {
    pub unit: String,
    pub attribute: String,
    #[serde(flatten)]
    pub nominal: Nominal,
}

async fn insert_nominal(
    AccessService(service): AccessService,
    Json(request): Json<NominalRequest>,
) -> Json<Outcome> {
    let ok = service
        .insert_nominal(&request.unit, &request.attribute, &request.nominal)
        .await;
    Json(Outcome::from(ok))
}

#[derive(Debug, Deserialize)]
pub struct NominalQuery {
    pub unit: String,
    pub attribute: Option<String>,
}

async fn delete_nominal(
    AccessService(service): AccessService,
    Query(query): Query<NominalQuery>,
) -> Json<Outcome> {
    let ok = service
        .delete_nominal(&query.unit, query.attribute.as_deref())
        .await;
    Json(Outcome::from(ok))
}

async fn get_external(
    AccessService(service): AccessService,
    Path((kind, id)): Path<(String, i64)>,
) -> AppResult<Json<ExternalRecord>> {
    service
        .external_record(parse_kind(&kind)?, id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("External record of {} {}", kind, id)))
}

async fn update_external(
    AccessService(service): AccessService,
    Path((kind, id)): Path<(String, i64)>,
    Json(external): Json<ExternalRecord>,
) -> AppResult<Json<Outcome>> {
    let kind = parse_kind(&kind)?;
    if !external.is_valid() {
        tracing::warn!(kind = ?kind, id, "Incomplete external record ignored");
        return Ok(Json(Outcome::from(false)));
    }
    let ok = service
        .update_external_record(kind, id, external)
        .await;
    Ok(Json(Outcome::from(ok)))
}

async fn delete_external(
    AccessService(service): AccessService,
    Path((kind, id)): Path<(String, i64)>,
) -> AppResult<Json<Outcome>> {
    let ok = service.delete_external_record(parse_kind(&kind)?, id).await;
    Ok(Json(Outcome::from(ok)))
}

#[derive(Debug, Serialize)]
pub struct SnapshotResponse {
    pub users: Vec<i64>,
    pub items: Vec<i64>,
    pub ratings: Vec<RatingTriple>,
}

async fn snapshot(AccessService(service): AccessService) -> AppResult<Json<SnapshotResponse>> {
    let snapshot = service
        .snapshot()
        .await
        .ok_or_else(|| AppError::Unavailable("No active dataset".into()))?;

    let ratings = snapshot
        .rating_vectors(ProfileKind::User)
        .flat_map(|vector| {
            vector
                .iter()
                .map(move |(item, rating)| RatingTriple::new(vector.id, item, rating.clone()))
        })
        .collect();
    Ok(Json(SnapshotResponse {
        users: snapshot.ids(ProfileKind::User),
        items: snapshot.ids(ProfileKind::Item),
        ratings,
    }))
}

async fn evaluators(AccessService(service): AccessService) -> Json<Vec<String>> {
    Json(service.evaluator_names())
}

async fn evaluator(
    AccessService(service): AccessService,
    Path(name): Path<String>,
) -> AppResult<Json<String>> {
    service
        .evaluator(&name)
        .map(|evaluator| Json(evaluator.name().to_string()))
        .ok_or_else(|| AppError::NotFound(format!("Evaluator {}", name)))
}
