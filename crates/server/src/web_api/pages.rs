//! Scale calibration and page-wide recalculation routes
//!
//! Detection runs in the background: the POST marks the page as detecting and
//! returns 202, a spawned task calls the detector on the blocking pool under
//! the configured timeout and commits the outcome. Callers poll
//! `scale-detection-status`.

use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use takeoff_core::{
    BatchOutcome, BoundingBox, CalibrationOutcome, CalibrationState, MeasurementId, Page, PageId,
    PixelPoint, ScaleDetectionInput, ScaleDetectionMethod, TakeoffError, TakeoffResult,
};

use crate::error::ApiResult;
use crate::state::AppState;

/// Recalculation counts with an overall status
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResponse {
    pub status: &'static str,
    pub recalculated_count: usize,
    pub failed_count: usize,
    pub failed_ids: Vec<MeasurementId>,
}

impl From<BatchOutcome> for BatchResponse {
    fn from(outcome: BatchOutcome) -> Self {
        Self {
            status: outcome.status(),
            recalculated_count: outcome.recalculated_count,
            failed_count: outcome.failed_count,
            failed_ids: outcome.failed_ids,
        }
    }
}

pub async fn detect_scale(
    State(state): State<AppState>,
    Path(page_id): Path<PageId>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let timeout = {
        let mut takeoff = state.takeoff.write().await;
        takeoff.begin_scale_detection(page_id)?;
        takeoff.config().detection_timeout
    };

    tokio::spawn(run_scale_detection(state.clone(), page_id, timeout));

    tracing::info!(page_id = %page_id, "Scale detection started");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": "processing", "page_id": page_id })),
    ))
}

/// Call the detector and commit whatever it produced
pub(crate) async fn run_scale_detection(state: AppState, page_id: PageId, timeout: Duration) {
    let detector = state.scale_detector.clone();
    let images = state.images.clone();
    let call = tokio::task::spawn_blocking(move || -> TakeoffResult<ScaleDetectionInput> {
        let image = images.page_image(page_id)?;
        detector.detect_scale(&image)
    });

    let result = match tokio::time::timeout(timeout, call).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(TakeoffError::DetectionFailure(format!(
            "detector task failed: {join_error}"
        ))),
        Err(_) => Err(TakeoffError::DetectionFailure(format!(
            "scale detection timed out after {}s",
            timeout.as_secs_f64()
        ))),
    };

    {
        let mut takeoff = state.takeoff.write().await;
        let committed = match result {
            Ok(input) => takeoff.complete_scale_detection(page_id, &input).map(|outcome| {
                tracing::info!(
                    page_id = %page_id,
                    scale_ratio = ?outcome.page.scale_ratio,
                    recalculated = outcome.recalculation.recalculated_count,
                    failed = outcome.recalculation.failed_count,
                    "Scale detection committed"
                );
            }),
            Err(error) => takeoff
                .fail_scale_detection(page_id, &error.to_string())
                .map(|_| ()),
        };

        match committed {
            Ok(()) => {}
            Err(TakeoffError::CalibrationRegressionRejected { reason, .. }) => {
                tracing::info!(page_id = %page_id, reason = %reason, "Detected scale not applied");
            }
            Err(error) => {
                tracing::warn!(page_id = %page_id, error = %error, "Scale detection finished without a calibration");
            }
        }
    }

    if let Err(error) = state.persist().await {
        tracing::error!(page_id = %page_id, error = %error, "Failed to persist detection result");
    }
}

#[derive(Debug, Serialize)]
pub struct DetectionDetail {
    pub state: CalibrationState,
    pub method: ScaleDetectionMethod,
    pub confidence: Option<f64>,
    pub bounding_box: Option<BoundingBox>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ScaleDetectionStatus {
    /// `processing` while a detector call is outstanding, `complete` otherwise
    pub status: &'static str,
    pub scale_text: Option<String>,
    pub scale_value: Option<f64>,
    pub calibrated: bool,
    pub detection: DetectionDetail,
}

impl From<&Page> for ScaleDetectionStatus {
    fn from(page: &Page) -> Self {
        let record = page.calibration_record.as_ref();
        Self {
            status: if page.calibration_state == CalibrationState::Detecting {
                "processing"
            } else {
                "complete"
            },
            scale_text: record.and_then(|r| r.source_text.clone()),
            scale_value: page.scale_ratio,
            calibrated: page.scale_calibrated,
            detection: DetectionDetail {
                state: page.calibration_state,
                method: page.scale_detection_method,
                confidence: record.map(|r| r.confidence),
                bounding_box: record.and_then(|r| r.bounding_box),
                error: page.last_detection_error.clone(),
            },
        }
    }
}

pub async fn scale_detection_status(
    State(state): State<AppState>,
    Path(page_id): Path<PageId>,
) -> ApiResult<Json<ScaleDetectionStatus>> {
    let takeoff = state.takeoff.read().await;
    Ok(Json(ScaleDetectionStatus::from(takeoff.page(page_id)?)))
}

#[derive(Debug, Deserialize)]
pub struct CalibrateRequest {
    pub start: PixelPoint,
    pub end: PixelPoint,
    pub known_distance: f64,
    pub unit: String,
}

/// Manual two-point calibration
pub async fn calibrate(
    State(state): State<AppState>,
    Path(page_id): Path<PageId>,
    Json(req): Json<CalibrateRequest>,
) -> ApiResult<Json<CalibrationOutcome>> {
    let outcome = state.takeoff.write().await.calibrate_manual(
        page_id,
        req.start,
        req.end,
        req.known_distance,
        &req.unit,
    )?;
    state.persist().await?;

    tracing::info!(
        page_id = %page_id,
        scale_ratio = ?outcome.page.scale_ratio,
        recalculated = outcome.recalculation.recalculated_count,
        "Page calibrated manually"
    );
    Ok(Json(outcome))
}

pub async fn reset_calibration(
    State(state): State<AppState>,
    Path(page_id): Path<PageId>,
) -> ApiResult<Json<Page>> {
    let page = state
        .takeoff
        .write()
        .await
        .reset_calibration(page_id)?
        .clone();
    state.persist().await?;

    tracing::info!(page_id = %page_id, "Calibration reset");
    Ok(Json(page))
}

pub async fn recalculate_page(
    State(state): State<AppState>,
    Path(page_id): Path<PageId>,
) -> ApiResult<Json<BatchResponse>> {
    let outcome = state.takeoff.write().await.recalculate_page(page_id)?;
    state.persist().await?;

    if outcome.failed_count > 0 {
        tracing::warn!(
            page_id = %page_id,
            failed = outcome.failed_count,
            "Page recalculation partially failed"
        );
    }
    Ok(Json(outcome.into()))
}
