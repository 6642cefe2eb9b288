//! Orchestration over the takeoff services
//!
//! [`Takeoff`] owns the catalog, measurements and auto-count state and wires
//! the services together. It is the caller that turns "the page was
//! recalibrated" into "every measurement on the page was recalculated".

use crate::adjustment::{self, Adjustment, AdjustmentOutcome};
use crate::autocount::{AutoCountDetection, AutoCountEngine, AutoCountRequest, AutoCountSession, DetectionId, SessionId};
use crate::calibration;
use crate::catalog::{Catalog, Condition, ConditionId, ConditionUpdate, Page, PageId, ProjectId};
use crate::collaborators::{CountCandidate, CountDetector, ScaleDetectionInput, ScaleDetector};
use crate::config::TakeoffConfig;
use crate::error::TakeoffResult;
use crate::geometry::{Geometry, PixelPoint};
use crate::history::HistoryEntry;
use crate::measurement::{BatchOutcome, Measurement, MeasurementId, MeasurementStore, MeasurementUpdate, NewMeasurement};
use crate::review::{self, ReviewSummary};

/// Persistent state of a takeoff
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct TakeoffSnapshot {
    pub catalog: Catalog,
    pub measurements: MeasurementStore,
    pub autocount: AutoCountEngine,
}

/// Result of a committed calibration
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CalibrationOutcome {
    pub page: Page,
    pub recalculation: BatchOutcome,
}

/// The takeoff services behind one owner
#[derive(Debug, Default, Clone)]
pub struct Takeoff {
    catalog: Catalog,
    measurements: MeasurementStore,
    autocount: AutoCountEngine,
    config: TakeoffConfig,
}

impl Takeoff {
    pub fn new(config: TakeoffConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn from_snapshot(snapshot: TakeoffSnapshot, config: TakeoffConfig) -> Self {
        Self {
            catalog: snapshot.catalog,
            measurements: snapshot.measurements,
            autocount: snapshot.autocount,
            config,
        }
    }

    pub fn snapshot(&self) -> TakeoffSnapshot {
        TakeoffSnapshot {
            catalog: self.catalog.clone(),
            measurements: self.measurements.clone(),
            autocount: self.autocount.clone(),
        }
    }

    pub fn config(&self) -> &TakeoffConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn measurements(&self) -> &MeasurementStore {
        &self.measurements
    }

    pub fn autocount(&self) -> &AutoCountEngine {
        &self.autocount
    }

    // Catalog

    pub fn create_project(&mut self, name: impl Into<String>) -> ProjectId {
        self.catalog.add_project(name)
    }

    pub fn add_page(&mut self, page: Page) -> TakeoffResult<&Page> {
        let id = self.catalog.add_page(page)?;
        self.catalog.page(id)
    }

    pub fn page(&self, id: PageId) -> TakeoffResult<&Page> {
        self.catalog.page(id)
    }

    /// Delete a page with its measurements and auto-count sessions
    pub fn delete_page(&mut self, id: PageId) -> TakeoffResult<Page> {
        let page = self.catalog.remove_page(id)?;
        let removed = self.measurements.remove_for_page(id);
        self.autocount.remove_for_page(id);
        tracing::info!(page_id = %id, measurements = removed.len(), "page deleted");
        Ok(page)
    }

    pub fn add_condition(&mut self, condition: Condition) -> TakeoffResult<&Condition> {
        let id = self.catalog.add_condition(condition)?;
        self.catalog.condition(id)
    }

    pub fn update_condition(&mut self, id: ConditionId, update: ConditionUpdate) -> TakeoffResult<&Condition> {
        let referenced = self.measurements.is_condition_referenced(id);
        self.catalog.update_condition(id, update, referenced)
    }

    /// Delete a condition with its measurements and auto-count sessions
    pub fn delete_condition(&mut self, id: ConditionId) -> TakeoffResult<Condition> {
        let condition = self.catalog.remove_condition(id)?;
        let removed = self.measurements.remove_for_condition(id);
        self.autocount.remove_for_condition(id);
        tracing::info!(condition_id = %id, measurements = removed.len(), "condition deleted");
        Ok(condition)
    }

    // Measurements

    pub fn create_measurement(&mut self, new: NewMeasurement, actor: &str) -> TakeoffResult<&Measurement> {
        self.measurements.create(&self.catalog, new, actor)
    }

    pub fn measurement(&self, id: MeasurementId) -> TakeoffResult<&Measurement> {
        self.measurements.get(id)
    }

    pub fn update_measurement(
        &mut self,
        id: MeasurementId,
        update: MeasurementUpdate,
        actor: &str,
    ) -> TakeoffResult<&Measurement> {
        self.measurements.update(&self.catalog, id, update, actor)
    }

    pub fn delete_measurement(&mut self, id: MeasurementId) -> TakeoffResult<Measurement> {
        self.measurements.delete(id)
    }

    pub fn recalculate(&mut self, id: MeasurementId) -> TakeoffResult<&Measurement> {
        self.measurements.recalculate(&self.catalog, id)
    }

    pub fn recalculate_batch(&mut self, ids: &[MeasurementId]) -> BatchOutcome {
        self.measurements.recalculate_batch(&self.catalog, ids)
    }

    pub fn recalculate_page(&mut self, page_id: PageId) -> TakeoffResult<BatchOutcome> {
        self.measurements.recalculate_page(&self.catalog, page_id)
    }

    pub fn recalculate_condition(&mut self, condition_id: ConditionId) -> TakeoffResult<BatchOutcome> {
        self.measurements
            .recalculate_condition(&self.catalog, condition_id)
    }

    pub fn measurements_for_page(&self, page_id: PageId) -> TakeoffResult<Vec<&Measurement>> {
        self.catalog.page(page_id)?;
        Ok(self.measurements.for_page(page_id))
    }

    pub fn stale_measurements(&self, page_id: PageId) -> TakeoffResult<Vec<&Measurement>> {
        let page = self.catalog.page(page_id)?;
        Ok(self.measurements.stale_for_page(page))
    }

    // Calibration

    /// Manually calibrate a page and recalculate it
    pub fn calibrate_manual(
        &mut self,
        page_id: PageId,
        start: PixelPoint,
        end: PixelPoint,
        known_distance: f64,
        unit: &str,
    ) -> TakeoffResult<CalibrationOutcome> {
        let page = self.catalog.page_mut(page_id)?;
        calibration::calibrate_manual(page, start, end, known_distance, unit)?;
        self.after_calibration(page_id)
    }

    /// Mark a page as detecting before handing it to a detector
    pub fn begin_scale_detection(&mut self, page_id: PageId) -> TakeoffResult<&Page> {
        calibration::begin_detection(self.catalog.page_mut(page_id)?);
        self.catalog.page(page_id)
    }

    /// Commit detector output and recalculate the page
    ///
    /// A result discarded by the preservation policy returns
    /// `CalibrationRegressionRejected`; measurements are left alone.
    pub fn complete_scale_detection(
        &mut self,
        page_id: PageId,
        input: &ScaleDetectionInput,
    ) -> TakeoffResult<CalibrationOutcome> {
        calibration::apply_detection(self.catalog.page_mut(page_id)?, input)?;
        self.after_calibration(page_id)
    }

    /// Record a detector error or timeout
    pub fn fail_scale_detection(&mut self, page_id: PageId, message: &str) -> TakeoffResult<&Page> {
        calibration::fail_detection(self.catalog.page_mut(page_id)?, message);
        self.catalog.page(page_id)
    }

    /// Run detection synchronously against a blocking detector
    pub fn detect_scale(
        &mut self,
        page_id: PageId,
        detector: &dyn ScaleDetector,
        image: &[u8],
    ) -> TakeoffResult<CalibrationOutcome> {
        self.begin_scale_detection(page_id)?;
        match detector.detect_scale(image) {
            Ok(input) => self.complete_scale_detection(page_id, &input),
            Err(error) => {
                self.fail_scale_detection(page_id, &error.to_string())?;
                Err(error)
            }
        }
    }

    /// Clear a page's calibration; its measurements become stale
    pub fn reset_calibration(&mut self, page_id: PageId) -> TakeoffResult<&Page> {
        calibration::reset_calibration(self.catalog.page_mut(page_id)?);
        self.catalog.page(page_id)
    }

    fn after_calibration(&mut self, page_id: PageId) -> TakeoffResult<CalibrationOutcome> {
        let recalculation = self.measurements.recalculate_page(&self.catalog, page_id)?;
        Ok(CalibrationOutcome {
            page: self.catalog.page(page_id)?.clone(),
            recalculation,
        })
    }

    // Adjustments

    pub fn adjust(
        &mut self,
        id: MeasurementId,
        adjustment: &Adjustment,
        actor: &str,
        expected_version: Option<u64>,
    ) -> TakeoffResult<AdjustmentOutcome> {
        adjustment::adjust(
            &mut self.measurements,
            &self.catalog,
            &self.config,
            id,
            adjustment,
            actor,
            expected_version,
        )
    }

    // Review

    pub fn approve(&mut self, id: MeasurementId, reviewer: &str, notes: Option<String>) -> TakeoffResult<&Measurement> {
        review::approve(&mut self.measurements, id, reviewer, notes)
    }

    pub fn reject(&mut self, id: MeasurementId, reviewer: &str, reason: &str) -> TakeoffResult<&Measurement> {
        review::reject(&mut self.measurements, id, reviewer, reason)
    }

    pub fn modify(
        &mut self,
        id: MeasurementId,
        reviewer: &str,
        geometry: Geometry,
        notes: Option<String>,
        expected_version: Option<u64>,
    ) -> TakeoffResult<&Measurement> {
        review::modify(
            &mut self.measurements,
            &self.catalog,
            id,
            reviewer,
            geometry,
            notes,
            expected_version,
        )
    }

    pub fn auto_accept(
        &mut self,
        project_id: ProjectId,
        threshold: Option<f64>,
        reviewer: Option<&str>,
    ) -> TakeoffResult<usize> {
        review::auto_accept(
            &mut self.measurements,
            &self.catalog,
            &self.config,
            project_id,
            threshold,
            reviewer,
        )
    }

    pub fn next_unreviewed(
        &self,
        page_id: PageId,
        after_id: Option<MeasurementId>,
    ) -> TakeoffResult<Option<&Measurement>> {
        self.catalog.page(page_id)?;
        Ok(review::next_unreviewed(&self.measurements, page_id, after_id))
    }

    pub fn history(&self, id: MeasurementId) -> TakeoffResult<Vec<&HistoryEntry>> {
        review::history(&self.measurements, id)
    }

    pub fn review_summary(&self, page_id: PageId) -> TakeoffResult<ReviewSummary> {
        self.catalog.page(page_id)?;
        Ok(review::review_summary(&self.measurements, page_id))
    }

    // Auto-count

    pub fn begin_auto_count(&mut self, request: AutoCountRequest) -> TakeoffResult<&AutoCountSession> {
        self.autocount.begin_session(&self.catalog, request)
    }

    pub fn complete_auto_count(
        &mut self,
        session_id: SessionId,
        candidates: Vec<CountCandidate>,
    ) -> TakeoffResult<&AutoCountSession> {
        self.autocount
            .complete_session(session_id, candidates, &self.config)
    }

    pub fn fail_auto_count(&mut self, session_id: SessionId, error: &str) -> TakeoffResult<&AutoCountSession> {
        self.autocount.fail_session(session_id, error)
    }

    pub fn start_auto_count(
        &mut self,
        request: AutoCountRequest,
        detector: &dyn CountDetector,
        image: &[u8],
    ) -> TakeoffResult<&AutoCountSession> {
        self.autocount
            .start_session(&self.catalog, request, detector, image, &self.config)
    }

    pub fn auto_count_session(&self, id: SessionId) -> TakeoffResult<&AutoCountSession> {
        self.autocount.session(id)
    }

    pub fn auto_count_detections(&self, session_id: SessionId) -> TakeoffResult<Vec<&AutoCountDetection>> {
        self.autocount.detections(session_id)
    }

    pub fn confirm_detection(&mut self, id: DetectionId) -> TakeoffResult<&AutoCountDetection> {
        self.autocount.confirm(id)
    }

    pub fn reject_detection(&mut self, id: DetectionId) -> TakeoffResult<&AutoCountDetection> {
        self.autocount.reject(id)
    }

    pub fn bulk_confirm(&mut self, session_id: SessionId, threshold: f64) -> TakeoffResult<usize> {
        self.autocount.bulk_confirm(session_id, threshold)
    }

    pub fn create_measurements_from_session(
        &mut self,
        session_id: SessionId,
        actor: &str,
    ) -> TakeoffResult<Vec<MeasurementId>> {
        self.autocount
            .create_measurements(session_id, &mut self.measurements, &self.catalog, actor)
    }
}

impl From<TakeoffSnapshot> for Takeoff {
    fn from(snapshot: TakeoffSnapshot) -> Self {
        Takeoff::from_snapshot(snapshot, TakeoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MeasurementType;
    use crate::collaborators::VisionScaleCandidate;
    use crate::error::TakeoffError;
    use crate::geometry::BoundingBox;

    fn p(x: f64, y: f64) -> PixelPoint {
        PixelPoint::new(x, y)
    }

    fn setup() -> (Takeoff, PageId, ConditionId) {
        let mut takeoff = Takeoff::new(TakeoffConfig::default());
        let project_id = takeoff.create_project("Warehouse");
        let page_id = takeoff
            .add_page(Page::new(project_id, "A-101", 1, 3300, 2550, 150.0))
            .unwrap()
            .id;
        let condition_id = takeoff
            .add_condition(Condition::new(project_id, "Walls", MeasurementType::Linear, "LF"))
            .unwrap()
            .id;
        (takeoff, page_id, condition_id)
    }

    struct NotationDetector(&'static str, Option<BoundingBox>);

    impl ScaleDetector for NotationDetector {
        fn detect_scale(&self, _image: &[u8]) -> TakeoffResult<ScaleDetectionInput> {
            Ok(ScaleDetectionInput {
                ocr: None,
                vision: Some(VisionScaleCandidate {
                    text: self.0.to_string(),
                    bounding_box: self.1,
                    confidence: 0.9,
                    compression_scale_factor: 1.0,
                }),
            })
        }
    }

    #[test]
    fn test_calibration_recalculates_uncalibrated_measurements() {
        let (mut takeoff, page_id, condition_id) = setup();
        let line = Geometry::line(p(0.0, 0.0), p(75.0, 0.0)).unwrap();
        let id = takeoff
            .create_measurement(NewMeasurement::new(page_id, condition_id, line), "estimator")
            .unwrap()
            .id();
        assert!(takeoff.measurement(id).unwrap().is_uncalibrated());

        let outcome = takeoff
            .detect_scale(
                page_id,
                &NotationDetector("1/4\" = 1'-0\"", Some(BoundingBox::new(5.0, 5.0, 60.0, 10.0))),
                b"png",
            )
            .unwrap();
        assert_eq!(outcome.recalculation.recalculated_count, 1);

        let m = takeoff.measurement(id).unwrap();
        assert!(!m.is_uncalibrated());
        assert!((m.quantity() - 2.0).abs() < 1e-9);
        assert!(takeoff.stale_measurements(page_id).unwrap().is_empty());
    }

    #[test]
    fn test_discarded_detection_leaves_quantities() {
        let (mut takeoff, page_id, condition_id) = setup();
        takeoff
            .calibrate_manual(page_id, p(0.0, 0.0), p(100.0, 0.0), 10.0, "ft")
            .unwrap();
        let id = takeoff
            .create_measurement(
                NewMeasurement::new(page_id, condition_id, Geometry::line(p(0.0, 0.0), p(50.0, 0.0)).unwrap()),
                "estimator",
            )
            .unwrap()
            .id();

        let result = takeoff.detect_scale(page_id, &NotationDetector("1\" = 20'", None), b"png");
        assert!(matches!(
            result,
            Err(TakeoffError::CalibrationRegressionRejected { .. })
        ));
        assert_eq!(takeoff.measurement(id).unwrap().quantity(), 5.0);
    }

    #[test]
    fn test_delete_page_cascades() {
        let (mut takeoff, page_id, condition_id) = setup();
        let id = takeoff
            .create_measurement(
                NewMeasurement::new(page_id, condition_id, Geometry::line(p(0.0, 0.0), p(50.0, 0.0)).unwrap()),
                "estimator",
            )
            .unwrap()
            .id();

        takeoff.delete_page(page_id).unwrap();
        assert!(takeoff.measurement(id).is_err());
        assert_eq!(takeoff.history(id).unwrap().len(), 1);
    }

    #[test]
    fn test_condition_locked_once_used() {
        let (mut takeoff, page_id, condition_id) = setup();
        takeoff
            .create_measurement(
                NewMeasurement::new(page_id, condition_id, Geometry::line(p(0.0, 0.0), p(50.0, 0.0)).unwrap()),
                "estimator",
            )
            .unwrap();

        let update = ConditionUpdate {
            unit: Some("LM".into()),
            ..Default::default()
        };
        assert_eq!(
            takeoff.update_condition(condition_id, update).unwrap_err(),
            TakeoffError::ConditionLocked(condition_id)
        );
    }

    #[test]
    fn test_snapshot_round_trip_keeps_history() {
        let (mut takeoff, page_id, condition_id) = setup();
        let id = takeoff
            .create_measurement(
                NewMeasurement::new(page_id, condition_id, Geometry::line(p(0.0, 0.0), p(50.0, 0.0)).unwrap()),
                "estimator",
            )
            .unwrap()
            .id();

        let json = serde_json::to_string(&takeoff.snapshot()).unwrap();
        let restored = Takeoff::from(serde_json::from_str::<TakeoffSnapshot>(&json).unwrap());

        assert_eq!(restored.measurement(id).unwrap(), takeoff.measurement(id).unwrap());
        assert_eq!(restored.history(id).unwrap().len(), 1);
    }
}
