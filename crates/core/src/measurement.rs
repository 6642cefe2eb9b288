//! Measurement storage and recalculation
//!
//! Measurements are drawn or detected shapes whose quantity is derived from
//! their geometry, their condition and the scale ratio of their page. The
//! store owns every measurement plus the audit log, and is the only place a
//! quantity is ever written.

use crate::autocount::DetectionId;
use crate::catalog::{Catalog, Condition, ConditionId, MeasurementType, Page, PageId, ProjectId};
use crate::error::{TakeoffError, TakeoffResult};
use crate::geometry::{self, Geometry, GeometryType};
use crate::history::{HistoryAction, HistoryEntry, HistoryLog, HistoryRecord};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;

/// Unique identifier for measurements
pub type MeasurementId = uuid::Uuid;

/// Trust state of a measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Unreviewed,
    Approved,
    Rejected,
    Modified,
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReviewStatus::Unreviewed => "unreviewed",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
            ReviewStatus::Modified => "modified",
        };
        f.write_str(name)
    }
}

/// A drawn or detected shape with its derived quantity
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Measurement {
    id: MeasurementId,
    /// Creation order, used for stable sequential review
    sequence: u64,
    page_id: PageId,
    condition_id: ConditionId,
    geometry: Geometry,
    pixel_length: Option<f64>,
    pixel_area: Option<f64>,
    /// Base quantity in the page unit (or its square/cube); 0 while uncalibrated
    quantity: f64,
    uncalibrated: bool,
    /// Page scale revision the quantity was computed against
    computed_revision: u64,
    quantity_computed_at: DateTime<Utc>,
    pub(crate) is_ai_generated: bool,
    pub(crate) ai_confidence: Option<f64>,
    source_detection_id: Option<DetectionId>,
    pub(crate) review_status: ReviewStatus,
    notes: Option<String>,
    /// Incremented on every user-visible write
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Measurement {
    pub fn id(&self) -> MeasurementId {
        self.id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn condition_id(&self) -> ConditionId {
        self.condition_id
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn geometry_type(&self) -> GeometryType {
        self.geometry.geometry_type()
    }

    pub fn pixel_length(&self) -> Option<f64> {
        self.pixel_length
    }

    pub fn pixel_area(&self) -> Option<f64> {
        self.pixel_area
    }

    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    /// Whether the quantity is a placeholder because the page had no scale
    pub fn is_uncalibrated(&self) -> bool {
        self.uncalibrated
    }

    pub fn computed_revision(&self) -> u64 {
        self.computed_revision
    }

    pub fn quantity_computed_at(&self) -> DateTime<Utc> {
        self.quantity_computed_at
    }

    /// Whether the page was recalibrated after the quantity was computed
    pub fn is_stale(&self, page: &Page) -> bool {
        page.scale_revision > self.computed_revision
    }

    pub fn is_ai_generated(&self) -> bool {
        self.is_ai_generated
    }

    /// Confidence of the detection this measurement came from
    pub fn ai_confidence(&self) -> Option<f64> {
        self.ai_confidence
    }

    pub fn source_detection_id(&self) -> Option<DetectionId> {
        self.source_detection_id
    }

    pub fn review_status(&self) -> ReviewStatus {
        self.review_status
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn apply_derived(&mut self, derived: Derived, revision: u64) {
        self.pixel_length = derived.pixel_length;
        self.pixel_area = derived.pixel_area;
        self.quantity = derived.quantity;
        self.uncalibrated = derived.uncalibrated;
        self.computed_revision = revision;
        self.quantity_computed_at = Utc::now();
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

/// Input for creating a measurement
#[derive(Debug, Clone)]
pub struct NewMeasurement {
    pub page_id: PageId,
    pub condition_id: ConditionId,
    pub geometry: Geometry,
    pub notes: Option<String>,
    pub is_ai_generated: bool,
    pub ai_confidence: Option<f64>,
    pub source_detection_id: Option<DetectionId>,
}

impl NewMeasurement {
    pub fn new(page_id: PageId, condition_id: ConditionId, geometry: Geometry) -> Self {
        Self {
            page_id,
            condition_id,
            geometry,
            notes: None,
            is_ai_generated: false,
            ai_confidence: None,
            source_detection_id: None,
        }
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }

    /// Mark as produced by a detector
    pub fn ai_generated(mut self, confidence: f64, detection_id: Option<DetectionId>) -> Self {
        self.is_ai_generated = true;
        self.ai_confidence = Some(confidence);
        self.source_detection_id = detection_id;
        self
    }
}

/// Partial update of a measurement
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct MeasurementUpdate {
    pub geometry: Option<Geometry>,
    pub notes: Option<String>,
    /// Reject the write if the measurement moved past this version
    pub expected_version: Option<u64>,
}

/// Result of a batch recalculation
///
/// `recalculated_count + failed_count` always equals the number of ids given.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BatchOutcome {
    pub recalculated_count: usize,
    pub failed_count: usize,
    pub failed_ids: Vec<MeasurementId>,
}

impl BatchOutcome {
    /// "success", "partial" or "failed"
    pub fn status(&self) -> &'static str {
        match (self.recalculated_count, self.failed_count) {
            (_, 0) => "success",
            (0, _) => "failed",
            _ => "partial",
        }
    }
}

/// Derived values written on (re)calculation
#[derive(Debug, Clone, Copy)]
struct Derived {
    pixel_length: Option<f64>,
    pixel_area: Option<f64>,
    quantity: f64,
    uncalibrated: bool,
}

/// Compute derived values, tolerating a missing scale
fn derive(page: &Page, condition: &Condition, geometry: &Geometry) -> TakeoffResult<Derived> {
    geometry::check_compatible(condition.measurement_type, geometry.geometry_type())?;
    if condition.measurement_type == MeasurementType::Volume && condition.depth_inches.is_none() {
        return Err(TakeoffError::MissingDepth(condition.id));
    }

    let metrics = geometry::pixel_metrics(geometry);
    let (quantity, uncalibrated) = match page.scale_ratio {
        Some(ratio) => (geometry::quantity(condition, geometry, ratio)?, false),
        // Count ignores the ratio
        None if !condition.measurement_type.requires_scale() => {
            (geometry::quantity(condition, geometry, 1.0)?, false)
        }
        None => (0.0, true),
    };

    Ok(Derived {
        pixel_length: metrics.pixel_length,
        pixel_area: metrics.pixel_area,
        quantity,
        uncalibrated,
    })
}

/// Owner of all measurements and their audit trail
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct MeasurementStore {
    measurements: HashMap<MeasurementId, Measurement>,
    /// Measurement ids per page in creation order
    by_page: HashMap<PageId, Vec<MeasurementId>>,
    history: HistoryLog,
    next_sequence: u64,
}

impl MeasurementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a measurement
    ///
    /// Validates the geometry against the condition, computes the quantity
    /// when the page is calibrated (otherwise stores 0 and flags it
    /// uncalibrated) and records a `created` history entry.
    pub fn create(
        &mut self,
        catalog: &Catalog,
        new: NewMeasurement,
        actor: &str,
    ) -> TakeoffResult<&Measurement> {
        let page = catalog.page(new.page_id)?;
        let condition = catalog.condition(new.condition_id)?;
        if condition.project_id != page.project_id {
            return Err(TakeoffError::invalid_parameter(
                "condition_id",
                format!(
                    "condition {} belongs to a different project than page {}",
                    condition.id, page.id
                ),
            ));
        }
        if let Some(confidence) = new.ai_confidence {
            check_unit_interval("ai_confidence", confidence)?;
        }

        let derived = derive(page, condition, &new.geometry)?;

        self.next_sequence += 1;
        let now = Utc::now();
        let mut measurement = Measurement {
            id: MeasurementId::new_v4(),
            sequence: self.next_sequence,
            page_id: page.id,
            condition_id: condition.id,
            geometry: new.geometry,
            pixel_length: None,
            pixel_area: None,
            quantity: 0.0,
            uncalibrated: true,
            computed_revision: 0,
            quantity_computed_at: now,
            is_ai_generated: new.is_ai_generated,
            ai_confidence: new.ai_confidence,
            source_detection_id: new.source_detection_id,
            review_status: ReviewStatus::Unreviewed,
            notes: new.notes,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        measurement.apply_derived(derived, page.scale_revision);

        let id = measurement.id;
        tracing::debug!(
            measurement_id = %id,
            page_id = %measurement.page_id,
            geometry_type = %measurement.geometry_type(),
            quantity = measurement.quantity,
            uncalibrated = measurement.uncalibrated,
            "measurement created"
        );

        self.history
            .append(HistoryRecord::new(id, actor, HistoryAction::Created));
        self.by_page.entry(page.id).or_default().push(id);
        self.measurements.insert(id, measurement);
        self.get(id)
    }

    /// Update geometry and/or notes
    pub fn update(
        &mut self,
        catalog: &Catalog,
        id: MeasurementId,
        update: MeasurementUpdate,
        actor: &str,
    ) -> TakeoffResult<&Measurement> {
        self.check_version(id, update.expected_version)?;

        let prior_geometry = match update.geometry {
            Some(geometry) => Some(self.apply_geometry(catalog, id, geometry)?),
            None => None,
        };

        let measurement = self.get_mut(id)?;
        if update.notes.is_some() {
            measurement.notes = update.notes;
        }
        if prior_geometry.is_none() {
            measurement.touch();
        }

        let mut record = HistoryRecord::new(id, actor, HistoryAction::Modified);
        if let Some(prior) = prior_geometry {
            record = record.with_prior_geometry(prior);
        }
        self.history.append(record);
        self.get(id)
    }

    /// Hard delete; history entries stay queryable by id
    pub fn delete(&mut self, id: MeasurementId) -> TakeoffResult<Measurement> {
        let measurement = self
            .measurements
            .remove(&id)
            .ok_or(TakeoffError::MeasurementNotFound(id))?;
        if let Some(ids) = self.by_page.get_mut(&measurement.page_id) {
            ids.retain(|&mid| mid != id);
        }
        Ok(measurement)
    }

    /// Re-derive the quantity from current geometry and page scale
    ///
    /// Idempotent: repeated calls give bitwise-equal quantities.
    pub fn recalculate(&mut self, catalog: &Catalog, id: MeasurementId) -> TakeoffResult<&Measurement> {
        let measurement = self.get(id)?;
        let page = catalog.page(measurement.page_id)?;
        let condition = catalog.condition(measurement.condition_id)?;

        if page.scale_ratio.is_none() && condition.measurement_type.requires_scale() {
            return Err(TakeoffError::MissingScale(page.id));
        }

        let derived = derive(page, condition, &measurement.geometry)?;
        let revision = page.scale_revision;
        self.get_mut(id)?.apply_derived(derived, revision);
        self.get(id)
    }

    /// Recalculate each id independently; failures never abort the batch
    pub fn recalculate_batch(&mut self, catalog: &Catalog, ids: &[MeasurementId]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for &id in ids {
            match self.recalculate(catalog, id) {
                Ok(_) => outcome.recalculated_count += 1,
                Err(error) => {
                    tracing::warn!(measurement_id = %id, error = %error, "recalculation failed");
                    outcome.failed_count += 1;
                    outcome.failed_ids.push(id);
                }
            }
        }

        tracing::info!(
            recalculated = outcome.recalculated_count,
            failed = outcome.failed_count,
            "batch recalculation finished"
        );
        outcome
    }

    /// Recalculate every measurement on a page
    pub fn recalculate_page(&mut self, catalog: &Catalog, page_id: PageId) -> TakeoffResult<BatchOutcome> {
        catalog.page(page_id)?;
        let ids = self.ids_for_page(page_id);
        Ok(self.recalculate_batch(catalog, &ids))
    }

    /// Recalculate every measurement of a condition
    pub fn recalculate_condition(
        &mut self,
        catalog: &Catalog,
        condition_id: ConditionId,
    ) -> TakeoffResult<BatchOutcome> {
        catalog.condition(condition_id)?;
        let ids: Vec<_> = self
            .for_condition(condition_id)
            .iter()
            .map(|m| m.id)
            .collect();
        Ok(self.recalculate_batch(catalog, &ids))
    }

    pub fn get(&self, id: MeasurementId) -> TakeoffResult<&Measurement> {
        self.measurements
            .get(&id)
            .ok_or(TakeoffError::MeasurementNotFound(id))
    }

    pub(crate) fn get_mut(&mut self, id: MeasurementId) -> TakeoffResult<&mut Measurement> {
        self.measurements
            .get_mut(&id)
            .ok_or(TakeoffError::MeasurementNotFound(id))
    }

    /// Measurements on a page in creation order
    pub fn for_page(&self, page_id: PageId) -> Vec<&Measurement> {
        self.by_page
            .get(&page_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.measurements.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn ids_for_page(&self, page_id: PageId) -> Vec<MeasurementId> {
        self.by_page.get(&page_id).cloned().unwrap_or_default()
    }

    /// Measurements of a condition in creation order
    pub fn for_condition(&self, condition_id: ConditionId) -> Vec<&Measurement> {
        let mut measurements: Vec<_> = self
            .measurements
            .values()
            .filter(|m| m.condition_id == condition_id)
            .collect();
        measurements.sort_by_key(|m| m.sequence);
        measurements
    }

    /// Measurements on every page of a project in creation order
    pub fn for_project(&self, catalog: &Catalog, project_id: ProjectId) -> Vec<&Measurement> {
        let mut measurements: Vec<_> = catalog
            .pages_for_project(project_id)
            .into_iter()
            .flat_map(|page| self.for_page(page.id))
            .collect();
        measurements.sort_by_key(|m| m.sequence);
        measurements
    }

    /// Measurements whose quantity predates the page's latest calibration
    pub fn stale_for_page(&self, page: &Page) -> Vec<&Measurement> {
        self.for_page(page.id)
            .into_iter()
            .filter(|m| m.is_stale(page))
            .collect()
    }

    pub fn is_condition_referenced(&self, condition_id: ConditionId) -> bool {
        self.measurements
            .values()
            .any(|m| m.condition_id == condition_id)
    }

    pub fn count(&self) -> usize {
        self.measurements.len()
    }

    /// Full audit trail for a measurement, oldest first
    ///
    /// Works for deleted measurements too.
    pub fn history(&self, id: MeasurementId) -> Vec<&HistoryEntry> {
        self.history.for_measurement(id)
    }

    pub(crate) fn append_history(&mut self, record: HistoryRecord) {
        self.history.append(record);
    }

    /// Fail with `VersionConflict` when the caller's version is outdated
    pub fn check_version(&self, id: MeasurementId, expected: Option<u64>) -> TakeoffResult<()> {
        let measurement = self.get(id)?;
        match expected {
            Some(expected) if expected != measurement.version => Err(TakeoffError::VersionConflict {
                id,
                expected,
                actual: measurement.version,
            }),
            _ => Ok(()),
        }
    }

    /// Replace geometry and recompute, returning the prior geometry
    ///
    /// The geometry type is fixed for the life of a measurement. Nothing is
    /// written if the new geometry cannot be measured under the condition.
    /// History is left to the caller.
    pub(crate) fn apply_geometry(
        &mut self,
        catalog: &Catalog,
        id: MeasurementId,
        geometry: Geometry,
    ) -> TakeoffResult<Geometry> {
        self.apply_geometry_with_status(catalog, id, geometry, None)
    }

    /// Replace geometry and optionally review status as one edit
    pub(crate) fn apply_geometry_with_status(
        &mut self,
        catalog: &Catalog,
        id: MeasurementId,
        geometry: Geometry,
        status: Option<ReviewStatus>,
    ) -> TakeoffResult<Geometry> {
        let measurement = self.get(id)?;
        if geometry.geometry_type() != measurement.geometry_type() {
            return Err(TakeoffError::IncompatibleGeometry(format!(
                "measurement {} is a {}, cannot become a {}",
                id,
                measurement.geometry_type(),
                geometry.geometry_type()
            )));
        }

        let page = catalog.page(measurement.page_id)?;
        let condition = catalog.condition(measurement.condition_id)?;
        let derived = derive(page, condition, &geometry)?;
        let revision = page.scale_revision;

        let measurement = self.get_mut(id)?;
        let prior = std::mem::replace(&mut measurement.geometry, geometry);
        measurement.apply_derived(derived, revision);
        if let Some(status) = status {
            measurement.review_status = status;
        }
        measurement.touch();
        Ok(prior)
    }

    pub(crate) fn set_review_status(&mut self, id: MeasurementId, status: ReviewStatus) -> TakeoffResult<()> {
        let measurement = self.get_mut(id)?;
        measurement.review_status = status;
        measurement.touch();
        Ok(())
    }

    /// Remove all measurements of a page (cascade)
    pub(crate) fn remove_for_page(&mut self, page_id: PageId) -> Vec<MeasurementId> {
        let ids = self.by_page.remove(&page_id).unwrap_or_default();
        for id in &ids {
            self.measurements.remove(id);
        }
        ids
    }

    /// Remove all measurements of a condition (cascade)
    pub(crate) fn remove_for_condition(&mut self, condition_id: ConditionId) -> Vec<MeasurementId> {
        let ids: Vec<_> = self
            .for_condition(condition_id)
            .iter()
            .map(|m| m.id)
            .collect();
        for &id in &ids {
            if let Err(error) = self.delete(id) {
                tracing::warn!(measurement_id = %id, error = %error, "cascade delete skipped");
            }
        }
        ids
    }
}

pub(crate) fn check_unit_interval(name: &str, value: f64) -> TakeoffResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(TakeoffError::invalid_parameter(
            name,
            format!("must be within [0, 1], got {}", value),
        ))
    }
}
