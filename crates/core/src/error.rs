//! Error taxonomy for the takeoff core
//!
//! Every fallible core operation returns [`TakeoffResult`]. Batch operations
//! never surface these directly; they capture them per item instead.

use crate::autocount::{DetectionId, SessionId};
use crate::catalog::{ConditionId, PageId, ProjectId};
use crate::measurement::MeasurementId;

/// Result type for takeoff operations
pub type TakeoffResult<T> = Result<T, TakeoffError>;

/// Errors raised by the takeoff core
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TakeoffError {
    /// Degenerate or malformed geometry, rejected at construction
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// The geometry type cannot produce the requested quantity
    #[error("{measurement_type} quantities cannot be computed from {geometry_type} geometry")]
    UnsupportedGeometry {
        measurement_type: String,
        geometry_type: String,
    },

    /// Quantity requested before the page was calibrated
    #[error("page {0} has no scale calibration")]
    MissingScale(PageId),

    /// Volume condition without depth or thickness
    #[error("condition {0} is a volume condition without a depth")]
    MissingDepth(ConditionId),

    /// Automated detection discarded by the preservation policy
    #[error("calibration for page {page_id} kept: {reason}")]
    CalibrationRegressionRejected { page_id: PageId, reason: String },

    /// External detector failed, timed out or returned garbage
    #[error("detection failed: {0}")]
    DetectionFailure(String),

    /// Join/trim/extend misuse across geometry types
    #[error("incompatible geometry: {0}")]
    IncompatibleGeometry(String),

    /// Adjustment parameters that cannot be applied
    #[error("invalid adjustment: {0}")]
    InvalidAdjustment(String),

    /// Rejection without a reason
    #[error("a reason is required to reject measurement {0}")]
    ReviewReasonRequired(MeasurementId),

    /// Review state machine violation
    #[error("measurement {id} cannot be {action} while {status}")]
    InvalidReviewTransition {
        id: MeasurementId,
        action: String,
        status: String,
    },

    /// Optimistic concurrency check failed
    #[error("measurement {id} is at version {actual}, expected {expected}")]
    VersionConflict {
        id: MeasurementId,
        expected: u64,
        actual: u64,
    },

    /// Quantity-defining condition fields edited while measurements reference it
    #[error("condition {0} is referenced by measurements; only name, description and style can change")]
    ConditionLocked(ConditionId),

    /// Out-of-range parameter (thresholds, grid sizes, distances)
    #[error("invalid parameter {name}: {message}")]
    InvalidParameter { name: String, message: String },

    #[error("project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error("page not found: {0}")]
    PageNotFound(PageId),

    #[error("condition not found: {0}")]
    ConditionNotFound(ConditionId),

    #[error("measurement not found: {0}")]
    MeasurementNotFound(MeasurementId),

    #[error("auto-count session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("auto-count detection not found: {0}")]
    DetectionNotFound(DetectionId),
}

impl TakeoffError {
    pub(crate) fn invalid_parameter(name: &str, message: impl Into<String>) -> Self {
        TakeoffError::InvalidParameter {
            name: name.to_string(),
            message: message.into(),
        }
    }

    /// Whether this error names a missing entity
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TakeoffError::ProjectNotFound(_)
                | TakeoffError::PageNotFound(_)
                | TakeoffError::ConditionNotFound(_)
                | TakeoffError::MeasurementNotFound(_)
                | TakeoffError::SessionNotFound(_)
                | TakeoffError::DetectionNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = TakeoffError::InvalidGeometry("line needs two distinct points".into());
        assert_eq!(
            error.to_string(),
            "invalid geometry: line needs two distinct points"
        );

        let error = TakeoffError::UnsupportedGeometry {
            measurement_type: "area".into(),
            geometry_type: "line".into(),
        };
        assert_eq!(
            error.to_string(),
            "area quantities cannot be computed from line geometry"
        );
    }

    #[test]
    fn test_not_found_classification() {
        assert!(TakeoffError::PageNotFound(uuid::Uuid::nil()).is_not_found());
        assert!(!TakeoffError::MissingScale(uuid::Uuid::nil()).is_not_found());
    }
}
