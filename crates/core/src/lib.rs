//! Takeoff Core Library
//!
//! Scale calibration, geometry-to-quantity computation, geometry editing,
//! detection-assisted counting and the review workflow for construction
//! takeoff.

pub mod adjustment;
pub mod autocount;
pub mod calibration;
pub mod catalog;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod geometry;
pub mod history;
pub mod measurement;
pub mod review;
pub mod scale_detection;
pub mod takeoff;

pub use adjustment::{Adjustment, AdjustmentOutcome};
pub use autocount::{
    AutoCountDetection, AutoCountEngine, AutoCountRequest, AutoCountSession, DetectionId,
    DetectionMethod, DetectionStatus, SessionId, SessionStatus,
};
pub use calibration::{BboxSource, CalibrationRecord, CalibrationState, ScaleDetectionMethod};
pub use catalog::{
    Catalog, Condition, ConditionId, ConditionStyle, ConditionUpdate, MeasurementType, Page,
    PageId, Project, ProjectId,
};
pub use collaborators::{
    CountCandidate, CountDetector, CountRequest, ImageStore, OcrResult, ScaleDetectionInput,
    ScaleDetector, TextBlock, VisionScaleCandidate,
};
pub use config::TakeoffConfig;
pub use error::{TakeoffError, TakeoffResult};
pub use geometry::{BoundingBox, Geometry, GeometryType, PixelPoint};
pub use history::{HistoryAction, HistoryEntry};
pub use measurement::{
    BatchOutcome, Measurement, MeasurementId, MeasurementStore, MeasurementUpdate,
    NewMeasurement, ReviewStatus,
};
pub use review::ReviewSummary;
pub use scale_detection::DetectedScale;
pub use takeoff::{CalibrationOutcome, Takeoff, TakeoffSnapshot};
