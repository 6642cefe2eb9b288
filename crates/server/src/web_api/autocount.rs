//! Auto-count routes
//!
//! Starting a session validates the request and returns 202 with the running
//! session; the detector call happens in the background like scale detection.

use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use takeoff_core::{
    AutoCountDetection, AutoCountRequest, AutoCountSession, BoundingBox, ConditionId,
    CountCandidate, DetectionId, DetectionMethod, MeasurementId, PageId, SessionId, TakeoffError,
    TakeoffResult,
};

use super::actor_or_default;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StartAutoCountRequest {
    pub condition_id: ConditionId,
    pub template_bounding_box: BoundingBox,
    #[serde(default)]
    pub confidence_threshold: Option<f64>,
    #[serde(default)]
    pub scale_tolerance: Option<f64>,
    #[serde(default)]
    pub rotation_tolerance: Option<f64>,
    #[serde(default)]
    pub detection_method: DetectionMethod,
    #[serde(default)]
    pub provider: Option<String>,
}

impl StartAutoCountRequest {
    fn into_request(self, page_id: PageId) -> AutoCountRequest {
        let mut request = AutoCountRequest::new(page_id, self.condition_id, self.template_bounding_box)
            .with_detection_method(self.detection_method, self.provider);
        if let Some(threshold) = self.confidence_threshold {
            request = request.with_confidence_threshold(threshold);
        }
        if let Some(tolerance) = self.scale_tolerance {
            request.scale_tolerance = tolerance;
        }
        if let Some(tolerance) = self.rotation_tolerance {
            request.rotation_tolerance = tolerance;
        }
        request
    }
}

pub async fn start(
    State(state): State<AppState>,
    Path(page_id): Path<PageId>,
    Json(req): Json<StartAutoCountRequest>,
) -> ApiResult<(StatusCode, Json<AutoCountSession>)> {
    let (session, timeout) = {
        let mut takeoff = state.takeoff.write().await;
        let timeout = takeoff.config().detection_timeout;
        let session = takeoff.begin_auto_count(req.into_request(page_id))?.clone();
        (session, timeout)
    };
    state.persist().await?;

    tokio::spawn(run_auto_count(state.clone(), session.clone(), timeout));

    tracing::info!(
        session_id = %session.id,
        page_id = %page_id,
        method = ?session.detection_method,
        "Auto-count session started"
    );
    Ok((StatusCode::ACCEPTED, Json(session)))
}

/// Call the count detector and record its candidates on the session
pub(crate) async fn run_auto_count(state: AppState, session: AutoCountSession, timeout: Duration) {
    let detector = state.count_detector.clone();
    let images = state.images.clone();
    let page_id = session.page_id;
    let request = session.count_request();
    let call = tokio::task::spawn_blocking(move || -> TakeoffResult<Vec<CountCandidate>> {
        let image = images.page_image(page_id)?;
        detector.detect(&image, &request)
    });

    let result = match tokio::time::timeout(timeout, call).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(TakeoffError::DetectionFailure(format!(
            "detector task failed: {join_error}"
        ))),
        Err(_) => Err(TakeoffError::DetectionFailure(format!(
            "auto-count timed out after {}s",
            timeout.as_secs_f64()
        ))),
    };

    {
        let mut takeoff = state.takeoff.write().await;
        let recorded = match result {
            Ok(candidates) => {
                let received = candidates.len();
                let completed = takeoff
                    .complete_auto_count(session.id, candidates)
                    .map(|_| ());
                if completed.is_ok() {
                    let kept = takeoff
                        .auto_count_detections(session.id)
                        .map(|d| d.len())
                        .unwrap_or_default();
                    tracing::info!(
                        session_id = %session.id,
                        received,
                        kept,
                        "Auto-count session completed"
                    );
                }
                completed
            }
            Err(error) => takeoff
                .fail_auto_count(session.id, &error.to_string())
                .map(|_| ()),
        };

        if let Err(error) = recorded {
            tracing::warn!(session_id = %session.id, error = %error, "Auto-count result not recorded");
        }
    }

    if let Err(error) = state.persist().await {
        tracing::error!(session_id = %session.id, error = %error, "Failed to persist auto-count result");
    }
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session: AutoCountSession,
    pub detections: Vec<AutoCountDetection>,
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<Json<SessionResponse>> {
    let takeoff = state.takeoff.read().await;
    let session = takeoff.auto_count_session(session_id)?.clone();
    let detections = takeoff
        .auto_count_detections(session_id)?
        .into_iter()
        .cloned()
        .collect();
    Ok(Json(SessionResponse {
        session,
        detections,
    }))
}

pub async fn confirm(
    State(state): State<AppState>,
    Path(detection_id): Path<DetectionId>,
) -> ApiResult<Json<AutoCountDetection>> {
    let detection = state
        .takeoff
        .write()
        .await
        .confirm_detection(detection_id)?
        .clone();
    state.persist().await?;
    Ok(Json(detection))
}

pub async fn reject(
    State(state): State<AppState>,
    Path(detection_id): Path<DetectionId>,
) -> ApiResult<Json<AutoCountDetection>> {
    let detection = state
        .takeoff
        .write()
        .await
        .reject_detection(detection_id)?
        .clone();
    state.persist().await?;
    Ok(Json(detection))
}

#[derive(Debug, Deserialize)]
pub struct BulkConfirmRequest {
    pub threshold: f64,
}

#[derive(Debug, Serialize)]
pub struct BulkConfirmResponse {
    pub confirmed_count: usize,
}

pub async fn bulk_confirm(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Json(req): Json<BulkConfirmRequest>,
) -> ApiResult<Json<BulkConfirmResponse>> {
    let confirmed_count = state
        .takeoff
        .write()
        .await
        .bulk_confirm(session_id, req.threshold)?;
    state.persist().await?;

    tracing::info!(session_id = %session_id, confirmed_count, "Detections bulk-confirmed");
    Ok(Json(BulkConfirmResponse { confirmed_count }))
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateMeasurementsRequest {
    #[serde(default)]
    pub actor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateMeasurementsResponse {
    pub created_count: usize,
    pub measurement_ids: Vec<MeasurementId>,
}

/// Materialize confirmed detections as count measurements
pub async fn create_measurements(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    body: Option<Json<CreateMeasurementsRequest>>,
) -> ApiResult<Json<CreateMeasurementsResponse>> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let actor = actor_or_default(&req.actor);
    let measurement_ids = state
        .takeoff
        .write()
        .await
        .create_measurements_from_session(session_id, actor)?;
    state.persist().await?;

    tracing::info!(
        session_id = %session_id,
        created = measurement_ids.len(),
        "Measurements created from detections"
    );
    Ok(Json(CreateMeasurementsResponse {
        created_count: measurement_ids.len(),
        measurement_ids,
    }))
}
