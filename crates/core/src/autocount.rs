//! Detection-assisted auto-counting
//!
//! A session runs a count detector over a page using a template region the
//! user drew around one symbol. Candidates come back as pending detections;
//! a reviewer confirms or rejects them (individually or in bulk above a
//! threshold) and confirmed detections are materialised into point
//! measurements.

use crate::catalog::{Catalog, ConditionId, MeasurementType, PageId};
use crate::collaborators::{CountCandidate, CountDetector, CountRequest};
use crate::config::TakeoffConfig;
use crate::error::{TakeoffError, TakeoffResult};
use crate::geometry::{BoundingBox, Geometry};
use crate::measurement::{check_unit_interval, MeasurementId, MeasurementStore, NewMeasurement};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Unique identifier for auto-count sessions
pub type SessionId = uuid::Uuid;

/// Unique identifier for auto-count detections
pub type DetectionId = uuid::Uuid;

/// Which external detector a session uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    #[default]
    TemplateMatching,
    VisionModel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
    Pending,
    Confirmed,
    Rejected,
}

fn default_confidence_threshold() -> f64 {
    0.7
}

fn default_scale_tolerance() -> f64 {
    0.1
}

fn default_rotation_tolerance() -> f64 {
    15.0
}

/// Parameters for a new session
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AutoCountRequest {
    pub page_id: PageId,
    pub condition_id: ConditionId,
    pub template_bounding_box: BoundingBox,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Relative size variation accepted by the detector
    #[serde(default = "default_scale_tolerance")]
    pub scale_tolerance: f64,
    /// Rotation accepted by the detector, in degrees
    #[serde(default = "default_rotation_tolerance")]
    pub rotation_tolerance: f64,
    #[serde(default)]
    pub detection_method: DetectionMethod,
    #[serde(default)]
    pub provider: Option<String>,
}

impl AutoCountRequest {
    pub fn new(page_id: PageId, condition_id: ConditionId, template_bounding_box: BoundingBox) -> Self {
        Self {
            page_id,
            condition_id,
            template_bounding_box,
            confidence_threshold: default_confidence_threshold(),
            scale_tolerance: default_scale_tolerance(),
            rotation_tolerance: default_rotation_tolerance(),
            detection_method: DetectionMethod::default(),
            provider: None,
        }
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_detection_method(mut self, method: DetectionMethod, provider: Option<String>) -> Self {
        self.detection_method = method;
        self.provider = provider;
        self
    }
}

/// One detection run
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AutoCountSession {
    pub id: SessionId,
    pub page_id: PageId,
    pub condition_id: ConditionId,
    pub template_bounding_box: BoundingBox,
    pub confidence_threshold: f64,
    pub scale_tolerance: f64,
    pub rotation_tolerance: f64,
    pub detection_method: DetectionMethod,
    pub provider: Option<String>,
    pub status: SessionStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AutoCountSession {
    /// The request handed to the count detector
    pub fn count_request(&self) -> CountRequest {
        CountRequest {
            template_bounding_box: self.template_bounding_box,
            confidence_threshold: self.confidence_threshold,
            scale_tolerance: self.scale_tolerance,
            rotation_tolerance: self.rotation_tolerance,
            detection_method: self.detection_method,
            provider: self.provider.clone(),
        }
    }
}

/// One candidate match
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AutoCountDetection {
    pub id: DetectionId,
    pub session_id: SessionId,
    pub bounding_box: BoundingBox,
    pub confidence: f64,
    pub status: DetectionStatus,
    /// Set once materialised
    pub measurement_id: Option<MeasurementId>,
}

/// Keep confident, non-overlapping candidates, strongest first
///
/// Drops candidates below `threshold`, the template itself (and anything
/// overlapping it above `iou_threshold`) and weaker candidates overlapping a
/// kept one. At most `max` survive.
pub fn select_candidates(
    template: &BoundingBox,
    candidates: Vec<CountCandidate>,
    threshold: f64,
    iou_threshold: f64,
    max: usize,
) -> Vec<CountCandidate> {
    let mut candidates: Vec<_> = candidates
        .into_iter()
        .filter(|c| c.bounding_box.is_valid())
        .filter(|c| (0.0..=1.0).contains(&c.confidence) && c.confidence >= threshold)
        .filter(|c| c.bounding_box.iou(template) <= iou_threshold)
        .collect();
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<CountCandidate> = Vec::new();
    for candidate in candidates {
        if kept.len() >= max {
            break;
        }
        let overlaps = kept
            .iter()
            .any(|k| k.bounding_box.iou(&candidate.bounding_box) > iou_threshold);
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

/// Owner of auto-count sessions and their detections
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct AutoCountEngine {
    sessions: HashMap<SessionId, AutoCountSession>,
    detections: HashMap<DetectionId, AutoCountDetection>,
    /// Detection ids per session, strongest first
    by_session: HashMap<SessionId, Vec<DetectionId>>,
}

impl AutoCountEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a request and open a `running` session
    pub fn begin_session(
        &mut self,
        catalog: &Catalog,
        request: AutoCountRequest,
    ) -> TakeoffResult<&AutoCountSession> {
        let page = catalog.page(request.page_id)?;
        let condition = catalog.condition(request.condition_id)?;
        if condition.measurement_type != MeasurementType::Count {
            return Err(TakeoffError::invalid_parameter(
                "condition_id",
                format!("auto-count needs a count condition, {} is {}", condition.name, condition.measurement_type),
            ));
        }
        if condition.project_id != page.project_id {
            return Err(TakeoffError::invalid_parameter(
                "condition_id",
                "condition belongs to a different project than the page",
            ));
        }
        check_unit_interval("confidence_threshold", request.confidence_threshold)?;
        check_unit_interval("scale_tolerance", request.scale_tolerance)?;
        if !(request.rotation_tolerance.is_finite() && (0.0..=180.0).contains(&request.rotation_tolerance)) {
            return Err(TakeoffError::invalid_parameter(
                "rotation_tolerance",
                format!("must be within [0, 180] degrees, got {}", request.rotation_tolerance),
            ));
        }
        if !request.template_bounding_box.is_valid() {
            return Err(TakeoffError::invalid_parameter(
                "template_bounding_box",
                "must have finite coordinates and a positive size",
            ));
        }

        let session = AutoCountSession {
            id: SessionId::new_v4(),
            page_id: request.page_id,
            condition_id: request.condition_id,
            template_bounding_box: request.template_bounding_box,
            confidence_threshold: request.confidence_threshold,
            scale_tolerance: request.scale_tolerance,
            rotation_tolerance: request.rotation_tolerance,
            detection_method: request.detection_method,
            provider: request.provider,
            status: SessionStatus::Running,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        let id = session.id;
        tracing::info!(
            session_id = %id,
            page_id = %session.page_id,
            method = ?session.detection_method,
            "auto-count session started"
        );
        self.sessions.insert(id, session);
        self.by_session.insert(id, Vec::new());
        self.session(id)
    }

    fn running_session_mut(&mut self, id: SessionId) -> TakeoffResult<&mut AutoCountSession> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(TakeoffError::SessionNotFound(id))?;
        if session.status != SessionStatus::Running {
            return Err(TakeoffError::invalid_parameter(
                "session_id",
                format!("session {} is not running", id),
            ));
        }
        Ok(session)
    }

    /// Store the detector's candidates and complete the session
    pub fn complete_session(
        &mut self,
        id: SessionId,
        candidates: Vec<CountCandidate>,
        config: &TakeoffConfig,
    ) -> TakeoffResult<&AutoCountSession> {
        let session = self.running_session_mut(id)?;
        let received = candidates.len();
        let kept = select_candidates(
            &session.template_bounding_box,
            candidates,
            session.confidence_threshold,
            config.nms_iou_threshold,
            config.max_candidates,
        );
        session.status = SessionStatus::Completed;
        session.completed_at = Some(Utc::now());

        let ids = self.by_session.entry(id).or_default();
        for candidate in kept {
            let detection = AutoCountDetection {
                id: DetectionId::new_v4(),
                session_id: id,
                bounding_box: candidate.bounding_box,
                confidence: candidate.confidence,
                status: DetectionStatus::Pending,
                measurement_id: None,
            };
            ids.push(detection.id);
            self.detections.insert(detection.id, detection);
        }

        tracing::info!(
            session_id = %id,
            received,
            kept = ids.len(),
            "auto-count session completed"
        );
        self.session(id)
    }

    /// Record a detector failure or timeout
    pub fn fail_session(&mut self, id: SessionId, error: &str) -> TakeoffResult<&AutoCountSession> {
        let session = self.running_session_mut(id)?;
        session.status = SessionStatus::Failed;
        session.error = Some(error.to_string());
        session.completed_at = Some(Utc::now());
        tracing::warn!(session_id = %id, error, "auto-count session failed");
        self.session(id)
    }

    /// Run a whole session against a blocking detector
    ///
    /// Detector errors fail the session rather than the call.
    pub fn start_session(
        &mut self,
        catalog: &Catalog,
        request: AutoCountRequest,
        detector: &dyn CountDetector,
        image: &[u8],
        config: &TakeoffConfig,
    ) -> TakeoffResult<&AutoCountSession> {
        let session = self.begin_session(catalog, request)?;
        let id = session.id;
        let count_request = session.count_request();

        match detector.detect(image, &count_request) {
            Ok(candidates) => self.complete_session(id, candidates, config),
            Err(error) => self.fail_session(id, &error.to_string()),
        }
    }

    pub fn session(&self, id: SessionId) -> TakeoffResult<&AutoCountSession> {
        self.sessions.get(&id).ok_or(TakeoffError::SessionNotFound(id))
    }

    pub fn detection(&self, id: DetectionId) -> TakeoffResult<&AutoCountDetection> {
        self.detections
            .get(&id)
            .ok_or(TakeoffError::DetectionNotFound(id))
    }

    /// Detections of a session, strongest first
    pub fn detections(&self, session_id: SessionId) -> TakeoffResult<Vec<&AutoCountDetection>> {
        let ids = self
            .by_session
            .get(&session_id)
            .ok_or(TakeoffError::SessionNotFound(session_id))?;
        Ok(ids.iter().filter_map(|id| self.detections.get(id)).collect())
    }

    pub fn confirm(&mut self, id: DetectionId) -> TakeoffResult<&AutoCountDetection> {
        let detection = self
            .detections
            .get_mut(&id)
            .ok_or(TakeoffError::DetectionNotFound(id))?;
        detection.status = DetectionStatus::Confirmed;
        self.detection(id)
    }

    /// Reject a detection that has not been materialised yet
    pub fn reject(&mut self, id: DetectionId) -> TakeoffResult<&AutoCountDetection> {
        let detection = self
            .detections
            .get_mut(&id)
            .ok_or(TakeoffError::DetectionNotFound(id))?;
        if let Some(measurement_id) = detection.measurement_id {
            return Err(TakeoffError::invalid_parameter(
                "detection_id",
                format!("detection already became measurement {}", measurement_id),
            ));
        }
        detection.status = DetectionStatus::Rejected;
        self.detection(id)
    }

    /// Confirm every pending detection at or above `threshold`
    ///
    /// Never rejects; the rest stay pending. Returns the number confirmed.
    pub fn bulk_confirm(&mut self, session_id: SessionId, threshold: f64) -> TakeoffResult<usize> {
        check_unit_interval("threshold", threshold)?;
        let ids = self
            .by_session
            .get(&session_id)
            .ok_or(TakeoffError::SessionNotFound(session_id))?;

        let mut confirmed = 0;
        for id in ids {
            if let Some(detection) = self.detections.get_mut(id) {
                if detection.status == DetectionStatus::Pending && detection.confidence >= threshold {
                    detection.status = DetectionStatus::Confirmed;
                    confirmed += 1;
                }
            }
        }
        tracing::info!(session_id = %session_id, threshold, confirmed, "bulk confirm");
        Ok(confirmed)
    }

    /// Turn confirmed detections into point measurements
    ///
    /// Idempotent: detections already materialised are skipped. Returns the
    /// ids of the measurements created by this call.
    pub fn create_measurements(
        &mut self,
        session_id: SessionId,
        store: &mut MeasurementStore,
        catalog: &Catalog,
        actor: &str,
    ) -> TakeoffResult<Vec<MeasurementId>> {
        let session = self.session(session_id)?;
        let (page_id, condition_id) = (session.page_id, session.condition_id);
        let ids = self.by_session.get(&session_id).cloned().unwrap_or_default();

        let mut created = Vec::new();
        for id in ids {
            let Some(detection) = self.detections.get_mut(&id) else {
                continue;
            };
            if detection.status != DetectionStatus::Confirmed || detection.measurement_id.is_some() {
                continue;
            }

            let new = NewMeasurement::new(
                page_id,
                condition_id,
                Geometry::point(detection.bounding_box.center())?,
            )
            .ai_generated(detection.confidence, Some(detection.id));
            let measurement_id = store.create(catalog, new, actor)?.id();
            detection.measurement_id = Some(measurement_id);
            created.push(measurement_id);
        }

        tracing::info!(session_id = %session_id, created = created.len(), "detections materialised");
        Ok(created)
    }

    /// Drop sessions (and their detections) for a page
    pub(crate) fn remove_for_page(&mut self, page_id: PageId) {
        self.remove_where(|s| s.page_id == page_id);
    }

    /// Drop sessions (and their detections) for a condition
    pub(crate) fn remove_for_condition(&mut self, condition_id: ConditionId) {
        self.remove_where(|s| s.condition_id == condition_id);
    }

    fn remove_where(&mut self, matches: impl Fn(&AutoCountSession) -> bool) {
        let doomed: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| matches(s))
            .map(|s| s.id)
            .collect();
        for id in doomed {
            self.sessions.remove(&id);
            for detection_id in self.by_session.remove(&id).unwrap_or_default() {
                self.detections.remove(&detection_id);
            }
        }
    }
}
