//! Project, page and condition routes

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use takeoff_core::{
    Condition, ConditionId, ConditionStyle, ConditionUpdate, MeasurementType, Page, PageId,
    Project, ProjectId,
};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
}

pub async fn create_project(
    State(state): State<AppState>,
    Json(req): Json<CreateProjectRequest>,
) -> ApiResult<(StatusCode, Json<Project>)> {
    let project = {
        let mut takeoff = state.takeoff.write().await;
        let id = takeoff.create_project(req.name);
        takeoff.catalog().project(id)?.clone()
    };
    state.persist().await?;

    tracing::info!(project_id = %project.id, name = %project.name, "Project created");
    Ok((StatusCode::CREATED, Json(project)))
}

#[derive(Debug, Deserialize)]
pub struct CreatePageRequest {
    pub name: String,
    #[serde(default = "first_page")]
    pub page_number: u32,
    pub width: u32,
    pub height: u32,
    /// Falls back to the configured default
    #[serde(default)]
    pub dpi: Option<f64>,
}

fn first_page() -> u32 {
    1
}

pub async fn create_page(
    State(state): State<AppState>,
    Path(project_id): Path<ProjectId>,
    Json(req): Json<CreatePageRequest>,
) -> ApiResult<(StatusCode, Json<Page>)> {
    let page = {
        let mut takeoff = state.takeoff.write().await;
        let dpi = req.dpi.unwrap_or(takeoff.config().default_dpi);
        let page = Page::new(project_id, req.name, req.page_number, req.width, req.height, dpi);
        takeoff.add_page(page)?.clone()
    };
    state.persist().await?;

    tracing::info!(page_id = %page.id, project_id = %project_id, dpi = page.dpi, "Page added");
    Ok((StatusCode::CREATED, Json(page)))
}

pub async fn get_page(
    State(state): State<AppState>,
    Path(page_id): Path<PageId>,
) -> ApiResult<Json<Page>> {
    let takeoff = state.takeoff.read().await;
    Ok(Json(takeoff.page(page_id)?.clone()))
}

/// Delete a page together with its measurements and auto-count sessions
pub async fn delete_page(
    State(state): State<AppState>,
    Path(page_id): Path<PageId>,
) -> ApiResult<StatusCode> {
    state.takeoff.write().await.delete_page(page_id)?;
    state.persist().await?;

    tracing::info!(page_id = %page_id, "Page deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Store the rendered page image handed to the detectors
pub async fn upload_page_image(
    State(state): State<AppState>,
    Path(page_id): Path<PageId>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    state.takeoff.read().await.page(page_id)?;
    let storage = state
        .storage
        .clone()
        .ok_or_else(|| ApiError::Internal("no page image storage configured".to_string()))?;

    let size = body.len();
    tokio::task::spawn_blocking(move || storage.save_page_image(page_id, &body))
        .await
        .map_err(|e| ApiError::Internal(format!("image task failed: {e}")))??;

    tracing::debug!(page_id = %page_id, bytes = size, "Page image stored");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct CreateConditionRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub measurement_type: MeasurementType,
    pub unit: String,
    #[serde(default)]
    pub depth_inches: Option<f64>,
    #[serde(default)]
    pub style: Option<ConditionStyle>,
}

pub async fn create_condition(
    State(state): State<AppState>,
    Path(project_id): Path<ProjectId>,
    Json(req): Json<CreateConditionRequest>,
) -> ApiResult<(StatusCode, Json<Condition>)> {
    let mut condition = Condition::new(project_id, req.name, req.measurement_type, req.unit);
    condition.description = req.description;
    condition.depth_inches = req.depth_inches;
    if let Some(style) = req.style {
        condition.style = style;
    }

    let condition = state
        .takeoff
        .write()
        .await
        .add_condition(condition)?
        .clone();
    state.persist().await?;

    tracing::info!(
        condition_id = %condition.id,
        measurement_type = %condition.measurement_type,
        "Condition created"
    );
    Ok((StatusCode::CREATED, Json(condition)))
}

pub async fn update_condition(
    State(state): State<AppState>,
    Path(condition_id): Path<ConditionId>,
    Json(update): Json<ConditionUpdate>,
) -> ApiResult<Json<Condition>> {
    let condition = state
        .takeoff
        .write()
        .await
        .update_condition(condition_id, update)?
        .clone();
    state.persist().await?;
    Ok(Json(condition))
}

pub async fn delete_condition(
    State(state): State<AppState>,
    Path(condition_id): Path<ConditionId>,
) -> ApiResult<StatusCode> {
    state.takeoff.write().await.delete_condition(condition_id)?;
    state.persist().await?;

    tracing::info!(condition_id = %condition_id, "Condition deleted");
    Ok(StatusCode::NO_CONTENT)
}
