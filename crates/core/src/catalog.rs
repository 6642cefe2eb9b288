//! Projects, pages and conditions
//!
//! The plumbing entities measurements hang off. Pages carry the scale
//! calibration that [`crate::calibration`] maintains; conditions carry the
//! quantity definition the geometry engine reads.

use crate::calibration::{CalibrationRecord, CalibrationState, ScaleDetectionMethod};
use crate::error::{TakeoffError, TakeoffResult};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;

/// Unique identifier for projects
pub type ProjectId = uuid::Uuid;

/// Unique identifier for pages
pub type PageId = uuid::Uuid;

/// Unique identifier for conditions
pub type ConditionId = uuid::Uuid;

/// A takeoff project grouping pages and conditions
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// One drawing sheet
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Page {
    pub id: PageId,
    pub project_id: ProjectId,
    pub name: String,
    pub page_number: u32,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Pixels per paper inch of the rendered sheet
    pub dpi: f64,
    /// Real-world units per pixel, `None` until calibrated
    pub scale_ratio: Option<f64>,
    /// Unit of `scale_ratio` (e.g. "ft")
    pub scale_unit: Option<String>,
    pub scale_calibrated: bool,
    pub scale_detection_method: ScaleDetectionMethod,
    pub calibration_state: CalibrationState,
    pub calibration_record: Option<CalibrationRecord>,
    /// Bumped on every committed calibration; measurements computed at an
    /// older revision are stale
    pub scale_revision: u64,
    pub scale_updated_at: Option<DateTime<Utc>>,
    pub last_detection_error: Option<String>,
}

impl Page {
    /// Create an uncalibrated page
    pub fn new(
        project_id: ProjectId,
        name: impl Into<String>,
        page_number: u32,
        width: u32,
        height: u32,
        dpi: f64,
    ) -> Self {
        Self {
            id: PageId::new_v4(),
            project_id,
            name: name.into(),
            page_number,
            width,
            height,
            dpi,
            scale_ratio: None,
            scale_unit: None,
            scale_calibrated: false,
            scale_detection_method: ScaleDetectionMethod::None,
            calibration_state: CalibrationState::Uncalibrated,
            calibration_record: None,
            scale_revision: 0,
            scale_updated_at: None,
            last_detection_error: None,
        }
    }
}

/// How a condition's quantity is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementType {
    Linear,
    Area,
    Volume,
    Count,
}

impl MeasurementType {
    /// Whether a scale ratio is needed to compute the quantity
    pub fn requires_scale(&self) -> bool {
        !matches!(self, MeasurementType::Count)
    }
}

impl fmt::Display for MeasurementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MeasurementType::Linear => "linear",
            MeasurementType::Area => "area",
            MeasurementType::Volume => "volume",
            MeasurementType::Count => "count",
        };
        f.write_str(name)
    }
}

/// Display styling for a condition
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConditionStyle {
    pub color: String,
    pub line_width: f32,
    pub fill_opacity: f32,
}

impl Default for ConditionStyle {
    fn default() -> Self {
        Self {
            color: "#FF0000".to_string(),
            line_width: 2.0,
            fill_opacity: 0.3,
        }
    }
}

/// A takeoff line item (e.g. "4-inch slab")
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Condition {
    pub id: ConditionId,
    pub project_id: ProjectId,
    pub name: String,
    pub description: Option<String>,
    pub measurement_type: MeasurementType,
    /// Presentation unit (LF, SF, SY, CF, CY, EA)
    pub unit: String,
    /// Depth or thickness in inches, required for volume
    pub depth_inches: Option<f64>,
    pub style: ConditionStyle,
}

impl Condition {
    pub fn new(
        project_id: ProjectId,
        name: impl Into<String>,
        measurement_type: MeasurementType,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            id: ConditionId::new_v4(),
            project_id,
            name: name.into(),
            description: None,
            measurement_type,
            unit: unit.into(),
            depth_inches: None,
            style: ConditionStyle::default(),
        }
    }

    pub fn with_depth(mut self, depth_inches: f64) -> Self {
        self.depth_inches = Some(depth_inches);
        self
    }

    /// Convert a base quantity into this condition's presentation unit
    ///
    /// Base quantities are in the page's unit, its square or its cube.
    /// Square yards and cubic yards are derived from square and cubic feet.
    pub fn display_value(&self, quantity: f64) -> f64 {
        match (self.measurement_type, self.unit.to_ascii_uppercase().as_str()) {
            (MeasurementType::Volume, "CY") => quantity / 27.0,
            (MeasurementType::Area, "SY") => quantity / 9.0,
            _ => quantity,
        }
    }

    /// Rounded label for presentation
    pub fn format_quantity(&self, quantity: f64) -> String {
        format!("{:.2} {}", self.display_value(quantity), self.unit)
    }

    fn validate(&self) -> TakeoffResult<()> {
        if self.name.trim().is_empty() {
            return Err(TakeoffError::invalid_parameter("name", "must not be empty"));
        }
        if let Some(depth) = self.depth_inches {
            if !(depth.is_finite() && depth > 0.0) {
                return Err(TakeoffError::invalid_parameter(
                    "depth_inches",
                    format!("must be positive, got {}", depth),
                ));
            }
        }
        Ok(())
    }
}

/// Partial update of a condition
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ConditionUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub style: Option<ConditionStyle>,
    pub measurement_type: Option<MeasurementType>,
    pub unit: Option<String>,
    pub depth_inches: Option<f64>,
}

impl ConditionUpdate {
    fn touches_quantity(&self, condition: &Condition) -> bool {
        self.measurement_type
            .is_some_and(|t| t != condition.measurement_type)
            || self.unit.as_ref().is_some_and(|u| *u != condition.unit)
            || self
                .depth_inches
                .is_some_and(|d| Some(d) != condition.depth_inches)
    }
}

/// Registry of projects, pages and conditions
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct Catalog {
    projects: HashMap<ProjectId, Project>,
    pages: HashMap<PageId, Page>,
    conditions: HashMap<ConditionId, Condition>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_project(&mut self, name: impl Into<String>) -> ProjectId {
        let project = Project {
            id: ProjectId::new_v4(),
            name: name.into(),
            created_at: Utc::now(),
        };
        let id = project.id;
        self.projects.insert(id, project);
        id
    }

    pub fn project(&self, id: ProjectId) -> TakeoffResult<&Project> {
        self.projects
            .get(&id)
            .ok_or(TakeoffError::ProjectNotFound(id))
    }

    /// Register a page under an existing project
    pub fn add_page(&mut self, page: Page) -> TakeoffResult<PageId> {
        self.project(page.project_id)?;
        if !(page.dpi.is_finite() && page.dpi > 0.0) {
            return Err(TakeoffError::invalid_parameter(
                "dpi",
                format!("must be positive, got {}", page.dpi),
            ));
        }
        let id = page.id;
        self.pages.insert(id, page);
        Ok(id)
    }

    pub fn page(&self, id: PageId) -> TakeoffResult<&Page> {
        self.pages.get(&id).ok_or(TakeoffError::PageNotFound(id))
    }

    pub fn page_mut(&mut self, id: PageId) -> TakeoffResult<&mut Page> {
        self.pages.get_mut(&id).ok_or(TakeoffError::PageNotFound(id))
    }

    /// Pages of a project ordered by page number
    pub fn pages_for_project(&self, project_id: ProjectId) -> Vec<&Page> {
        let mut pages: Vec<_> = self
            .pages
            .values()
            .filter(|p| p.project_id == project_id)
            .collect();
        pages.sort_by_key(|p| p.page_number);
        pages
    }

    /// Every page id across projects, ordered by page number
    pub fn page_ids(&self) -> Vec<PageId> {
        let mut pages: Vec<_> = self.pages.values().collect();
        pages.sort_by_key(|p| (p.page_number, p.id));
        pages.into_iter().map(|p| p.id).collect()
    }

    pub fn remove_page(&mut self, id: PageId) -> TakeoffResult<Page> {
        self.pages.remove(&id).ok_or(TakeoffError::PageNotFound(id))
    }

    /// Register a condition under an existing project
    pub fn add_condition(&mut self, condition: Condition) -> TakeoffResult<ConditionId> {
        self.project(condition.project_id)?;
        condition.validate()?;
        let id = condition.id;
        self.conditions.insert(id, condition);
        Ok(id)
    }

    pub fn condition(&self, id: ConditionId) -> TakeoffResult<&Condition> {
        self.conditions
            .get(&id)
            .ok_or(TakeoffError::ConditionNotFound(id))
    }

    pub fn conditions_for_project(&self, project_id: ProjectId) -> Vec<&Condition> {
        let mut conditions: Vec<_> = self
            .conditions
            .values()
            .filter(|c| c.project_id == project_id)
            .collect();
        conditions.sort_by(|a, b| a.name.cmp(&b.name));
        conditions
    }

    /// Apply a condition update
    ///
    /// `referenced` tells whether measurements use the condition; if so only
    /// name, description and style may change.
    pub fn update_condition(
        &mut self,
        id: ConditionId,
        update: ConditionUpdate,
        referenced: bool,
    ) -> TakeoffResult<&Condition> {
        let current = self.condition(id)?;
        if referenced && update.touches_quantity(current) {
            return Err(TakeoffError::ConditionLocked(id));
        }

        let mut next = current.clone();
        if let Some(name) = update.name {
            next.name = name;
        }
        if let Some(description) = update.description {
            next.description = Some(description);
        }
        if let Some(style) = update.style {
            next.style = style;
        }
        if let Some(measurement_type) = update.measurement_type {
            next.measurement_type = measurement_type;
        }
        if let Some(unit) = update.unit {
            next.unit = unit;
        }
        if let Some(depth) = update.depth_inches {
            next.depth_inches = Some(depth);
        }
        next.validate()?;

        self.conditions.insert(id, next);
        self.condition(id)
    }

    pub fn remove_condition(&mut self, id: ConditionId) -> TakeoffResult<Condition> {
        self.conditions
            .remove(&id)
            .ok_or(TakeoffError::ConditionNotFound(id))
    }
}
