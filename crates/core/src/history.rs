//! Append-only measurement audit trail

use crate::geometry::Geometry;
use crate::measurement::{MeasurementId, ReviewStatus};
use chrono::{DateTime, Utc};

/// What happened to a measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Created,
    Modified,
    Approved,
    Rejected,
}

/// One audit record
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HistoryEntry {
    /// Position in the log, strictly increasing
    pub sequence: u64,
    pub measurement_id: MeasurementId,
    pub actor: String,
    pub action: HistoryAction,
    /// Geometry before the change, when the change touched geometry
    pub prior_geometry: Option<Geometry>,
    /// Review status before the change, when the change touched it
    pub prior_status: Option<ReviewStatus>,
    pub notes: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Fields describing a change, before it is stamped into the log
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub measurement_id: MeasurementId,
    pub actor: String,
    pub action: HistoryAction,
    pub prior_geometry: Option<Geometry>,
    pub prior_status: Option<ReviewStatus>,
    pub notes: Option<String>,
}

impl HistoryRecord {
    pub fn new(measurement_id: MeasurementId, actor: impl Into<String>, action: HistoryAction) -> Self {
        Self {
            measurement_id,
            actor: actor.into(),
            action,
            prior_geometry: None,
            prior_status: None,
            notes: None,
        }
    }

    pub fn with_prior_geometry(mut self, geometry: Geometry) -> Self {
        self.prior_geometry = Some(geometry);
        self
    }

    pub fn with_prior_status(mut self, status: ReviewStatus) -> Self {
        self.prior_status = Some(status);
        self
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }
}

/// Audit log
///
/// Entries are only ever appended. Deleting a measurement leaves its entries
/// in place so they stay queryable by id.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct HistoryLog {
    entries: Vec<HistoryEntry>,
}

impl HistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, record: HistoryRecord) -> &HistoryEntry {
        let sequence = self.entries.len() as u64 + 1;
        self.entries.push(HistoryEntry {
            sequence,
            measurement_id: record.measurement_id,
            actor: record.actor,
            action: record.action,
            prior_geometry: record.prior_geometry,
            prior_status: record.prior_status,
            notes: record.notes,
            timestamp: Utc::now(),
        });
        &self.entries[self.entries.len() - 1]
    }

    /// Entries for one measurement, oldest first
    pub fn for_measurement(&self, id: MeasurementId) -> Vec<&HistoryEntry> {
        self.entries
            .iter()
            .filter(|e| e.measurement_id == id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
