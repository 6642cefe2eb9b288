//! Measurement CRUD, recalculation and geometry adjustment routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use takeoff_core::{
    Adjustment, AdjustmentOutcome, ConditionId, Geometry, Measurement, MeasurementId,
    MeasurementUpdate, NewMeasurement, PageId,
};

use super::pages::BatchResponse;
use super::actor_or_default;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateMeasurementRequest {
    pub page_id: PageId,
    pub geometry: Geometry,
    #[serde(default)]
    pub notes: Option<String>,
    /// Present when the geometry came from a detector
    #[serde(default)]
    pub ai_confidence: Option<f64>,
    #[serde(default)]
    pub actor: Option<String>,
}

pub async fn create_measurement(
    State(state): State<AppState>,
    Path(condition_id): Path<ConditionId>,
    Json(req): Json<CreateMeasurementRequest>,
) -> ApiResult<(StatusCode, Json<Measurement>)> {
    let mut new = NewMeasurement::new(req.page_id, condition_id, req.geometry).with_notes(req.notes);
    if let Some(confidence) = req.ai_confidence {
        new = new.ai_generated(confidence, None);
    }

    let actor = actor_or_default(&req.actor);
    let measurement = state
        .takeoff
        .write()
        .await
        .create_measurement(new, actor)?
        .clone();
    state.persist().await?;

    tracing::info!(
        measurement_id = %measurement.id(),
        condition_id = %condition_id,
        quantity = measurement.quantity(),
        uncalibrated = measurement.is_uncalibrated(),
        "Measurement created"
    );
    Ok((StatusCode::CREATED, Json(measurement)))
}

pub async fn get_measurement(
    State(state): State<AppState>,
    Path(id): Path<MeasurementId>,
) -> ApiResult<Json<Measurement>> {
    let takeoff = state.takeoff.read().await;
    Ok(Json(takeoff.measurement(id)?.clone()))
}

#[derive(Debug, Deserialize)]
pub struct UpdateMeasurementRequest {
    #[serde(flatten)]
    pub update: MeasurementUpdate,
    #[serde(default)]
    pub actor: Option<String>,
}

pub async fn update_measurement(
    State(state): State<AppState>,
    Path(id): Path<MeasurementId>,
    Json(req): Json<UpdateMeasurementRequest>,
) -> ApiResult<Json<Measurement>> {
    let actor = actor_or_default(&req.actor);
    let measurement = state
        .takeoff
        .write()
        .await
        .update_measurement(id, req.update, actor)?
        .clone();
    state.persist().await?;
    Ok(Json(measurement))
}

pub async fn delete_measurement(
    State(state): State<AppState>,
    Path(id): Path<MeasurementId>,
) -> ApiResult<StatusCode> {
    state.takeoff.write().await.delete_measurement(id)?;
    state.persist().await?;

    tracing::info!(measurement_id = %id, "Measurement deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn recalculate(
    State(state): State<AppState>,
    Path(id): Path<MeasurementId>,
) -> ApiResult<Json<Measurement>> {
    let measurement = state.takeoff.write().await.recalculate(id)?.clone();
    state.persist().await?;
    Ok(Json(measurement))
}

pub async fn recalculate_condition(
    State(state): State<AppState>,
    Path(condition_id): Path<ConditionId>,
) -> ApiResult<Json<BatchResponse>> {
    let outcome = state
        .takeoff
        .write()
        .await
        .recalculate_condition(condition_id)?;
    state.persist().await?;

    if outcome.failed_count > 0 {
        tracing::warn!(
            condition_id = %condition_id,
            failed = outcome.failed_count,
            "Condition recalculation partially failed"
        );
    }
    Ok(Json(outcome.into()))
}

pub async fn list_for_page(
    State(state): State<AppState>,
    Path(page_id): Path<PageId>,
) -> ApiResult<Json<Vec<Measurement>>> {
    let takeoff = state.takeoff.read().await;
    let measurements = takeoff.measurements_for_page(page_id)?;
    Ok(Json(measurements.into_iter().cloned().collect()))
}

/// Measurements computed against an older page scale
pub async fn list_stale(
    State(state): State<AppState>,
    Path(page_id): Path<PageId>,
) -> ApiResult<Json<Vec<Measurement>>> {
    let takeoff = state.takeoff.read().await;
    let measurements = takeoff.stale_measurements(page_id)?;
    Ok(Json(measurements.into_iter().cloned().collect()))
}

/// Body of an adjustment: `{operation, params}` plus optional concurrency
/// and attribution fields
#[derive(Debug, Deserialize)]
pub struct AdjustRequest {
    #[serde(flatten)]
    pub adjustment: Adjustment,
    #[serde(default)]
    pub expected_version: Option<u64>,
    #[serde(default)]
    pub actor: Option<String>,
}

pub async fn adjust(
    State(state): State<AppState>,
    Path(id): Path<MeasurementId>,
    Json(req): Json<AdjustRequest>,
) -> ApiResult<Json<AdjustmentOutcome>> {
    let actor = actor_or_default(&req.actor);
    let outcome = state
        .takeoff
        .write()
        .await
        .adjust(id, &req.adjustment, actor, req.expected_version)?;
    state.persist().await?;

    tracing::info!(
        measurement_id = %id,
        operation = req.adjustment.name(),
        created = ?outcome.created.as_ref().map(|m| m.id()),
        removed = ?outcome.removed,
        "Measurement adjusted"
    );
    Ok(Json(outcome))
}
