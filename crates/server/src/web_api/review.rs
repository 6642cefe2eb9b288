//! Review workflow routes

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use takeoff_core::{
    Geometry, HistoryEntry, Measurement, MeasurementId, PageId, ProjectId, ReviewSummary,
};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub reviewer: String,
    #[serde(default)]
    pub notes: Option<String>,
}

pub async fn approve(
    State(state): State<AppState>,
    Path(id): Path<MeasurementId>,
    Json(req): Json<ApproveRequest>,
) -> ApiResult<Json<Measurement>> {
    let measurement = state
        .takeoff
        .write()
        .await
        .approve(id, &req.reviewer, req.notes)?
        .clone();
    state.persist().await?;

    tracing::info!(measurement_id = %id, reviewer = %req.reviewer, "Measurement approved");
    Ok(Json(measurement))
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reviewer: String,
    #[serde(default)]
    pub reason: String,
}

pub async fn reject(
    State(state): State<AppState>,
    Path(id): Path<MeasurementId>,
    Json(req): Json<RejectRequest>,
) -> ApiResult<Json<Measurement>> {
    let measurement = state
        .takeoff
        .write()
        .await
        .reject(id, &req.reviewer, &req.reason)?
        .clone();
    state.persist().await?;

    tracing::info!(measurement_id = %id, reviewer = %req.reviewer, "Measurement rejected");
    Ok(Json(measurement))
}

#[derive(Debug, Deserialize)]
pub struct ModifyRequest {
    pub reviewer: String,
    pub geometry: Geometry,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

pub async fn modify(
    State(state): State<AppState>,
    Path(id): Path<MeasurementId>,
    Json(req): Json<ModifyRequest>,
) -> ApiResult<Json<Measurement>> {
    let measurement = state
        .takeoff
        .write()
        .await
        .modify(id, &req.reviewer, req.geometry, req.notes, req.expected_version)?
        .clone();
    state.persist().await?;

    tracing::info!(measurement_id = %id, reviewer = %req.reviewer, "Measurement modified in review");
    Ok(Json(measurement))
}

#[derive(Debug, Default, Deserialize)]
pub struct AutoAcceptRequest {
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub reviewer: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AutoAcceptResponse {
    pub approved_count: usize,
}

pub async fn auto_accept(
    State(state): State<AppState>,
    Path(project_id): Path<ProjectId>,
    Json(req): Json<AutoAcceptRequest>,
) -> ApiResult<Json<AutoAcceptResponse>> {
    let approved_count = state.takeoff.write().await.auto_accept(
        project_id,
        req.threshold,
        req.reviewer.as_deref(),
    )?;
    state.persist().await?;

    tracing::info!(project_id = %project_id, approved_count, "Auto-accept finished");
    Ok(Json(AutoAcceptResponse { approved_count }))
}

#[derive(Debug, Default, Deserialize)]
pub struct NextUnreviewedQuery {
    #[serde(default)]
    pub after_id: Option<MeasurementId>,
}

/// `{"measurement": null}` once the page has nothing left to review
pub async fn next_unreviewed(
    State(state): State<AppState>,
    Path(page_id): Path<PageId>,
    Query(query): Query<NextUnreviewedQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let takeoff = state.takeoff.read().await;
    let next = takeoff.next_unreviewed(page_id, query.after_id)?;
    Ok(Json(json!({ "measurement": next })))
}

pub async fn history(
    State(state): State<AppState>,
    Path(id): Path<MeasurementId>,
) -> ApiResult<Json<Vec<HistoryEntry>>> {
    let takeoff = state.takeoff.read().await;
    let entries = takeoff.history(id)?;
    Ok(Json(entries.into_iter().cloned().collect()))
}

pub async fn summary(
    State(state): State<AppState>,
    Path(page_id): Path<PageId>,
) -> ApiResult<Json<ReviewSummary>> {
    let takeoff = state.takeoff.read().await;
    Ok(Json(takeoff.review_summary(page_id)?))
}
