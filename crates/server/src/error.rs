//! HTTP error mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use takeoff_core::TakeoffError;
use takeoff_storage::StorageError;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Takeoff(#[from] TakeoffError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Background task died before producing a result
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Takeoff(error) => takeoff_status(error),
            ApiError::Storage(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Takeoff(error) => takeoff_code(error),
            ApiError::Storage(_) => "STORAGE_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

fn takeoff_status(error: &TakeoffError) -> StatusCode {
    use TakeoffError::*;

    match error {
        InvalidGeometry(_)
        | UnsupportedGeometry { .. }
        | MissingDepth(_)
        | IncompatibleGeometry(_)
        | InvalidAdjustment(_)
        | ReviewReasonRequired(_)
        | InvalidParameter { .. } => StatusCode::BAD_REQUEST,
        CalibrationRegressionRejected { .. }
        | InvalidReviewTransition { .. }
        | VersionConflict { .. }
        | ConditionLocked(_) => StatusCode::CONFLICT,
        MissingScale(_) => StatusCode::UNPROCESSABLE_ENTITY,
        DetectionFailure(_) => StatusCode::BAD_GATEWAY,
        ProjectNotFound(_)
        | PageNotFound(_)
        | ConditionNotFound(_)
        | MeasurementNotFound(_)
        | SessionNotFound(_)
        | DetectionNotFound(_) => StatusCode::NOT_FOUND,
    }
}

fn takeoff_code(error: &TakeoffError) -> &'static str {
    use TakeoffError::*;

    match error {
        InvalidGeometry(_) => "INVALID_GEOMETRY",
        UnsupportedGeometry { .. } => "UNSUPPORTED_GEOMETRY",
        MissingScale(_) => "MISSING_SCALE",
        MissingDepth(_) => "MISSING_DEPTH",
        CalibrationRegressionRejected { .. } => "CALIBRATION_REGRESSION_REJECTED",
        DetectionFailure(_) => "DETECTION_FAILURE",
        IncompatibleGeometry(_) => "INCOMPATIBLE_GEOMETRY",
        InvalidAdjustment(_) => "INVALID_ADJUSTMENT",
        ReviewReasonRequired(_) => "REVIEW_REASON_REQUIRED",
        InvalidReviewTransition { .. } => "INVALID_REVIEW_TRANSITION",
        VersionConflict { .. } => "VERSION_CONFLICT",
        ConditionLocked(_) => "CONDITION_LOCKED",
        InvalidParameter { .. } => "INVALID_PARAMETER",
        ProjectNotFound(_)
        | PageNotFound(_)
        | ConditionNotFound(_)
        | MeasurementNotFound(_)
        | SessionNotFound(_)
        | DetectionNotFound(_) => "NOT_FOUND",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_code = self.error_code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(status = %status, error_code, message = %message, "Request error");
        } else {
            tracing::warn!(status = %status, error_code, message = %message, "Request rejected");
        }

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (TakeoffError::PageNotFound(Uuid::nil()), StatusCode::NOT_FOUND),
            (TakeoffError::InvalidGeometry("x".into()), StatusCode::BAD_REQUEST),
            (TakeoffError::MissingScale(Uuid::nil()), StatusCode::UNPROCESSABLE_ENTITY),
            (
                TakeoffError::VersionConflict {
                    id: Uuid::nil(),
                    expected: 1,
                    actual: 2,
                },
                StatusCode::CONFLICT,
            ),
            (TakeoffError::DetectionFailure("timeout".into()), StatusCode::BAD_GATEWAY),
        ];

        for (error, status) in cases {
            assert_eq!(ApiError::from(error).into_response().status(), status);
        }
    }

    #[test]
    fn test_error_codes() {
        let error = ApiError::from(TakeoffError::ConditionLocked(Uuid::nil()));
        assert_eq!(error.error_code(), "CONDITION_LOCKED");
        assert_eq!(ApiError::Internal("boom".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
