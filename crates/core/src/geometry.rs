//! Pixel geometry and quantity computation
//!
//! Pure functions turning pixel geometry, a page's scale ratio and a
//! condition's parameters into real-world quantities. Nothing here reads
//! ambient state: the scale ratio is always passed in by the caller.
//!
//! All values are `f64` and are never rounded here; rounding belongs to
//! presentation (see [`Condition::format_quantity`]).

use crate::catalog::{Condition, MeasurementType};
use crate::error::{TakeoffError, TakeoffResult};
use std::fmt;

/// Vertices closer than this are treated as the same point
const COINCIDENT_EPSILON: f64 = 1e-9;

/// Mitre joins longer than this multiple of the offset distance are clamped
const MITRE_LIMIT: f64 = 4.0;

/// A coordinate in image pixel space (origin top-left, y down)
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

impl PixelPoint {
    /// Create a new pixel point
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Calculate distance to another point
    pub fn distance_to(&self, other: &PixelPoint) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Translate by a pixel delta
    pub fn translated(&self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    pub(crate) fn coincides_with(&self, other: &PixelPoint) -> bool {
        self.distance_to(other) <= COINCIDENT_EPSILON
    }
}

/// Axis-aligned box in pixel space (top-left corner plus size)
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Whether the box has finite coordinates and a positive area
    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
            && self.width > 0.0
            && self.height > 0.0
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn center(&self) -> PixelPoint {
        PixelPoint::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Map a box measured on a resized image back to original pixel space
    ///
    /// `scale_factor` is the factor the original was multiplied by before it
    /// was sent to the detector (0.5 means the image was halved).
    pub fn rescaled(&self, scale_factor: f64) -> Self {
        Self::new(
            self.x / scale_factor,
            self.y / scale_factor,
            self.width / scale_factor,
            self.height / scale_factor,
        )
    }

    /// Intersection over union with another box
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.width).min(other.x + other.width);
        let bottom = (self.y + self.height).min(other.y + other.height);

        if right <= left || bottom <= top {
            return 0.0;
        }

        let intersection = (right - left) * (bottom - top);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

/// Shape of a measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryType {
    Point,
    Line,
    Polyline,
    Polygon,
}

impl fmt::Display for GeometryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GeometryType::Point => "point",
            GeometryType::Line => "line",
            GeometryType::Polyline => "polyline",
            GeometryType::Polygon => "polygon",
        };
        f.write_str(name)
    }
}

/// Wire form of a geometry: a type tag and its ordered vertices
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GeometryData {
    pub geometry_type: GeometryType,
    pub points: Vec<PixelPoint>,
}

/// Validated measurement geometry
///
/// A closed union over point, line, polyline and polygon whose vertex-count
/// invariants hold from construction onward. The only way to obtain one is
/// through [`Geometry::new`] (or deserialization, which goes through it).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "GeometryData", into = "GeometryData")]
pub struct Geometry {
    geometry_type: GeometryType,
    points: Vec<PixelPoint>,
}

impl TryFrom<GeometryData> for Geometry {
    type Error = TakeoffError;

    fn try_from(data: GeometryData) -> Result<Self, Self::Error> {
        Geometry::new(data.geometry_type, data.points)
    }
}

impl From<Geometry> for GeometryData {
    fn from(geometry: Geometry) -> Self {
        GeometryData {
            geometry_type: geometry.geometry_type,
            points: geometry.points,
        }
    }
}

impl Geometry {
    /// Validate and build a geometry
    pub fn new(geometry_type: GeometryType, mut points: Vec<PixelPoint>) -> TakeoffResult<Self> {
        if let Some(bad) = points.iter().find(|p| !p.is_finite()) {
            return Err(TakeoffError::InvalidGeometry(format!(
                "non-finite coordinate ({}, {})",
                bad.x, bad.y
            )));
        }

        match geometry_type {
            GeometryType::Point => {
                if points.len() != 1 {
                    return Err(TakeoffError::InvalidGeometry(format!(
                        "point needs exactly one vertex, got {}",
                        points.len()
                    )));
                }
            }
            GeometryType::Line => {
                if points.len() != 2 {
                    return Err(TakeoffError::InvalidGeometry(format!(
                        "line needs exactly two vertices, got {}",
                        points.len()
                    )));
                }
                if points[0].coincides_with(&points[1]) {
                    return Err(TakeoffError::InvalidGeometry(
                        "line endpoints coincide".to_string(),
                    ));
                }
            }
            GeometryType::Polyline => {
                if distinct_count(&points) < 2 {
                    return Err(TakeoffError::InvalidGeometry(
                        "polyline needs at least two distinct vertices".to_string(),
                    ));
                }
            }
            GeometryType::Polygon => {
                // A closing vertex equal to the first is implied, not stored
                if points.len() > 1 && points[0].coincides_with(&points[points.len() - 1]) {
                    points.pop();
                }
                if distinct_count(&points) < 3 {
                    return Err(TakeoffError::InvalidGeometry(
                        "polygon needs at least three distinct vertices".to_string(),
                    ));
                }
                if signed_area(&points).abs() <= COINCIDENT_EPSILON {
                    return Err(TakeoffError::InvalidGeometry(
                        "polygon has zero area".to_string(),
                    ));
                }
            }
        }

        Ok(Self {
            geometry_type,
            points,
        })
    }

    /// Shorthand for a point geometry
    pub fn point(point: PixelPoint) -> TakeoffResult<Self> {
        Self::new(GeometryType::Point, vec![point])
    }

    pub fn line(start: PixelPoint, end: PixelPoint) -> TakeoffResult<Self> {
        Self::new(GeometryType::Line, vec![start, end])
    }

    pub fn polyline(points: Vec<PixelPoint>) -> TakeoffResult<Self> {
        Self::new(GeometryType::Polyline, points)
    }

    pub fn polygon(points: Vec<PixelPoint>) -> TakeoffResult<Self> {
        Self::new(GeometryType::Polygon, points)
    }

    pub fn geometry_type(&self) -> GeometryType {
        self.geometry_type
    }

    /// Ordered vertices (polygons are implicitly closed)
    pub fn points(&self) -> &[PixelPoint] {
        &self.points
    }

    /// Rebuild with the same type and new vertices, re-validating
    pub fn with_points(&self, points: Vec<PixelPoint>) -> TakeoffResult<Self> {
        Self::new(self.geometry_type, points)
    }

    /// Segments in traversal order, including the closing edge for polygons
    fn segments(&self) -> Vec<(PixelPoint, PixelPoint)> {
        let mut segments: Vec<_> = self.points.windows(2).map(|w| (w[0], w[1])).collect();
        if self.geometry_type == GeometryType::Polygon {
            if let (Some(first), Some(last)) = (self.points.first(), self.points.last()) {
                segments.push((*last, *first));
            }
        }
        segments
    }

    /// Axis-aligned bounds of all vertices
    pub fn bounding_box(&self) -> BoundingBox {
        let min_x = self.points.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
        let min_y = self.points.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
        let max_x = self.points.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
        let max_y = self.points.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);
        BoundingBox::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    /// Where a quantity label should be drawn
    ///
    /// Paths use the midpoint along their length, polygons the vertex
    /// centroid and points the point itself.
    pub fn label_position(&self) -> PixelPoint {
        match self.geometry_type {
            GeometryType::Point => self.points[0],
            GeometryType::Line | GeometryType::Polyline => {
                let total: f64 = self.segments().iter().map(|(a, b)| a.distance_to(b)).sum();
                let half = total / 2.0;
                let mut accumulated = 0.0;
                for (a, b) in self.segments() {
                    let length = a.distance_to(&b);
                    if length > 0.0 && accumulated + length >= half {
                        let t = (half - accumulated) / length;
                        return PixelPoint::new(a.x + t * (b.x - a.x), a.y + t * (b.y - a.y));
                    }
                    accumulated += length;
                }
                self.points[self.points.len() - 1]
            }
            GeometryType::Polygon => {
                let n = self.points.len() as f64;
                let sum_x: f64 = self.points.iter().map(|p| p.x).sum();
                let sum_y: f64 = self.points.iter().map(|p| p.y).sum();
                PixelPoint::new(sum_x / n, sum_y / n)
            }
        }
    }
}

fn distinct_count(points: &[PixelPoint]) -> usize {
    let mut distinct: Vec<PixelPoint> = Vec::new();
    for p in points {
        if !distinct.iter().any(|d| d.coincides_with(p)) {
            distinct.push(*p);
        }
    }
    distinct.len()
}

/// Shoelace sum, positive for counter-clockwise vertex order in a y-up frame
fn signed_area(points: &[PixelPoint]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let mut area = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        area += points[i].x * points[j].y;
        area -= points[j].x * points[i].y;
    }
    area / 2.0
}

/// Path length in pixels
///
/// Sum of segment lengths for lines and polylines, perimeter for polygons.
pub fn pixel_length(geometry: &Geometry) -> TakeoffResult<f64> {
    match geometry.geometry_type() {
        GeometryType::Point => Err(TakeoffError::UnsupportedGeometry {
            measurement_type: "length".to_string(),
            geometry_type: GeometryType::Point.to_string(),
        }),
        _ => Ok(geometry
            .segments()
            .iter()
            .map(|(a, b)| a.distance_to(b))
            .sum()),
    }
}

/// Enclosed area in square pixels (polygons only)
pub fn pixel_area(geometry: &Geometry) -> TakeoffResult<f64> {
    match geometry.geometry_type() {
        GeometryType::Polygon => Ok(signed_area(geometry.points()).abs()),
        other => Err(TakeoffError::UnsupportedGeometry {
            measurement_type: "area".to_string(),
            geometry_type: other.to_string(),
        }),
    }
}

/// Check that a condition can be measured with a geometry type
pub fn check_compatible(
    measurement_type: MeasurementType,
    geometry_type: GeometryType,
) -> TakeoffResult<()> {
    let compatible = match measurement_type {
        MeasurementType::Count => geometry_type == GeometryType::Point,
        MeasurementType::Linear => matches!(
            geometry_type,
            GeometryType::Line | GeometryType::Polyline | GeometryType::Polygon
        ),
        MeasurementType::Area | MeasurementType::Volume => geometry_type == GeometryType::Polygon,
    };

    if compatible {
        Ok(())
    } else {
        Err(TakeoffError::UnsupportedGeometry {
            measurement_type: measurement_type.to_string(),
            geometry_type: geometry_type.to_string(),
        })
    }
}

/// Real-world quantity of a geometry under a condition
///
/// `scale_ratio` is real-world units per pixel. Count quantities ignore it.
/// Volume is `area * depth_inches / 12`, i.e. cubic units of the ratio's unit
/// when that unit is feet.
pub fn quantity(condition: &Condition, geometry: &Geometry, scale_ratio: f64) -> TakeoffResult<f64> {
    check_compatible(condition.measurement_type, geometry.geometry_type())?;

    if condition.measurement_type.requires_scale() && !(scale_ratio.is_finite() && scale_ratio > 0.0) {
        return Err(TakeoffError::invalid_parameter(
            "scale_ratio",
            format!("must be positive and finite, got {}", scale_ratio),
        ));
    }

    match condition.measurement_type {
        MeasurementType::Count => Ok(1.0),
        MeasurementType::Linear => Ok(pixel_length(geometry)? * scale_ratio),
        MeasurementType::Area => Ok(pixel_area(geometry)? * scale_ratio * scale_ratio),
        MeasurementType::Volume => {
            let depth = condition
                .depth_inches
                .ok_or(TakeoffError::MissingDepth(condition.id))?;
            Ok(pixel_area(geometry)? * scale_ratio * scale_ratio * (depth / 12.0))
        }
    }
}

/// Derived pixel measurements stored alongside a quantity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelMetrics {
    pub pixel_length: Option<f64>,
    pub pixel_area: Option<f64>,
}

/// Pixel length and area where the geometry type defines them
pub fn pixel_metrics(geometry: &Geometry) -> PixelMetrics {
    PixelMetrics {
        pixel_length: pixel_length(geometry).ok(),
        pixel_area: pixel_area(geometry).ok(),
    }
}

/// Closest point on a path to `target`
///
/// Returns the index of the segment's first vertex, the projected point and
/// its distance from `target`.
pub fn nearest_point_on_path(geometry: &Geometry, target: &PixelPoint) -> Option<(usize, PixelPoint, f64)> {
    let mut best: Option<(usize, PixelPoint, f64)> = None;

    for (index, (a, b)) in geometry.segments().into_iter().enumerate() {
        let projected = project_onto_segment(&a, &b, target);
        let distance = projected.distance_to(target);
        if best.map_or(true, |(_, _, d)| distance < d) {
            best = Some((index, projected, distance));
        }
    }

    best
}

fn project_onto_segment(a: &PixelPoint, b: &PixelPoint, target: &PixelPoint) -> PixelPoint {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let length_sq = dx * dx + dy * dy;
    if length_sq <= COINCIDENT_EPSILON {
        return *a;
    }
    let t = (((target.x - a.x) * dx + (target.y - a.y) * dy) / length_sq).clamp(0.0, 1.0);
    PixelPoint::new(a.x + t * dx, a.y + t * dy)
}

/// Round a point to the nearest grid intersection
pub fn snap_to_grid(point: &PixelPoint, grid_size: f64) -> PixelPoint {
    PixelPoint::new(
        (point.x / grid_size).round() * grid_size,
        (point.y / grid_size).round() * grid_size,
    )
}

/// Vertices of a parallel offset
///
/// Polygons move outward for positive distances, paths move to the left of
/// their travel direction. Corners use mitre joins clamped to
/// `MITRE_LIMIT * distance`.
pub fn offset_points(geometry: &Geometry, distance: f64) -> Vec<PixelPoint> {
    let mut points: Vec<PixelPoint> = Vec::with_capacity(geometry.points().len());
    for p in geometry.points() {
        if points.last().map_or(true, |last: &PixelPoint| !last.coincides_with(p)) {
            points.push(*p);
        }
    }

    let closed = geometry.geometry_type() == GeometryType::Polygon;
    if closed && points.len() > 1 && points[0].coincides_with(&points[points.len() - 1]) {
        points.pop();
    }

    // Outward normal for polygons, left normal for paths
    let outward_sign = if closed && signed_area(&points) < 0.0 {
        -1.0
    } else {
        1.0
    };
    let normal = |a: &PixelPoint, b: &PixelPoint| -> (f64, f64) {
        let length = a.distance_to(b);
        let (dx, dy) = ((b.x - a.x) / length, (b.y - a.y) / length);
        if closed {
            (dy * outward_sign, -dx * outward_sign)
        } else {
            (-dy, dx)
        }
    };

    let n = points.len();
    let mut result = Vec::with_capacity(n);
    for i in 0..n {
        let incoming = if i > 0 {
            Some(normal(&points[i - 1], &points[i]))
        } else if closed {
            Some(normal(&points[n - 1], &points[0]))
        } else {
            None
        };
        let outgoing = if i + 1 < n {
            Some(normal(&points[i], &points[i + 1]))
        } else if closed {
            Some(normal(&points[n - 1], &points[0]))
        } else {
            None
        };

        let (ox, oy) = match (incoming, outgoing) {
            (Some(n1), Some(n2)) => mitre(n1, n2),
            (Some(n1), None) => n1,
            (None, Some(n2)) => n2,
            (None, None) => (0.0, 0.0),
        };
        result.push(points[i].translated(ox * distance, oy * distance));
    }

    result
}

fn mitre(n1: (f64, f64), n2: (f64, f64)) -> (f64, f64) {
    let denom = 1.0 + n1.0 * n2.0 + n1.1 * n2.1;
    if denom <= COINCIDENT_EPSILON {
        return n1;
    }
    let (mx, my) = ((n1.0 + n2.0) / denom, (n1.1 + n2.1) / denom);
    let length = (mx * mx + my * my).sqrt();
    if length > MITRE_LIMIT {
        (mx / length * MITRE_LIMIT, my / length * MITRE_LIMIT)
    } else {
        (mx, my)
    }
}

/// Signed area of a vertex list, exposed for orientation checks after edits
pub(crate) fn orientation(points: &[PixelPoint]) -> f64 {
    signed_area(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Condition, MeasurementType};

    fn p(x: f64, y: f64) -> PixelPoint {
        PixelPoint::new(x, y)
    }

    fn square(size: f64) -> Geometry {
        Geometry::polygon(vec![p(0.0, 0.0), p(size, 0.0), p(size, size), p(0.0, size)])
            .expect("square is valid")
    }

    fn condition(measurement_type: MeasurementType, depth: Option<f64>) -> Condition {
        let mut condition = Condition::new(uuid::Uuid::new_v4(), "test", measurement_type, "u");
        condition.depth_inches = depth;
        condition
    }

    #[test]
    fn test_line_with_identical_points_rejected() {
        let result = Geometry::line(p(10.0, 10.0), p(10.0, 10.0));
        assert!(matches!(result, Err(TakeoffError::InvalidGeometry(_))));
    }

    #[test]
    fn test_polyline_needs_two_distinct_vertices() {
        let result = Geometry::polyline(vec![p(1.0, 1.0), p(1.0, 1.0), p(1.0, 1.0)]);
        assert!(matches!(result, Err(TakeoffError::InvalidGeometry(_))));

        let ok = Geometry::polyline(vec![p(1.0, 1.0), p(1.0, 1.0), p(4.0, 5.0)]);
        assert!(ok.is_ok());
    }

    #[test]
    fn test_polygon_degenerate_cases() {
        assert!(Geometry::polygon(vec![p(0.0, 0.0), p(1.0, 0.0)]).is_err());
        // Collinear vertices enclose nothing
        assert!(Geometry::polygon(vec![p(0.0, 0.0), p(1.0, 0.0), p(2.0, 0.0)]).is_err());
        assert!(Geometry::polygon(vec![p(0.0, 0.0), p(f64::NAN, 0.0), p(2.0, 2.0)]).is_err());
    }

    #[test]
    fn test_point_rejects_non_finite_coordinates() {
        assert!(matches!(
            Geometry::point(p(f64::INFINITY, 3.0)),
            Err(TakeoffError::InvalidGeometry(_))
        ));
        assert!(Geometry::point(p(2.0, f64::NAN)).is_err());
        assert!(Geometry::point(p(2.0, 3.0)).is_ok());
    }

    #[test]
    fn test_polygon_closing_vertex_dropped() {
        let geometry =
            Geometry::polygon(vec![p(0.0, 0.0), p(10.0, 0.0), p(10.0, 10.0), p(0.0, 0.0)])
                .expect("triangle is valid");
        assert_eq!(geometry.points().len(), 3);
    }

    #[test]
    fn test_pixel_length() {
        let polyline = Geometry::polyline(vec![p(0.0, 0.0), p(3.0, 4.0), p(3.0, 14.0)]).unwrap();
        assert_eq!(pixel_length(&polyline).unwrap(), 15.0);

        // Polygon length is its perimeter
        assert_eq!(pixel_length(&square(10.0)).unwrap(), 40.0);

        assert!(pixel_length(&Geometry::point(p(1.0, 1.0)).unwrap()).is_err());
    }

    #[test]
    fn test_pixel_area_shoelace() {
        let triangle = Geometry::polygon(vec![p(0.0, 0.0), p(10.0, 0.0), p(5.0, 10.0)]).unwrap();
        assert_eq!(pixel_area(&triangle).unwrap(), 50.0);

        // Orientation does not change the magnitude
        let reversed = Geometry::polygon(vec![p(5.0, 10.0), p(10.0, 0.0), p(0.0, 0.0)]).unwrap();
        assert_eq!(pixel_area(&reversed).unwrap(), 50.0);

        let line = Geometry::line(p(0.0, 0.0), p(1.0, 1.0)).unwrap();
        assert!(matches!(
            pixel_area(&line),
            Err(TakeoffError::UnsupportedGeometry { .. })
        ));
    }

    #[test]
    fn test_linear_quantity_scenario() {
        // 48 px reference line = 1 ft
        let ratio = 1.0 / 48.0;
        let polyline = Geometry::polyline(vec![p(0.0, 0.0), p(480.0, 0.0), p(480.0, 480.0)]).unwrap();
        let linear = condition(MeasurementType::Linear, None);

        let value = quantity(&linear, &polyline, ratio).unwrap();
        assert!((value - 20.0).abs() < 1e-9);

        let rounded_ratio = 0.02083;
        let value = quantity(&linear, &polyline, rounded_ratio).unwrap();
        assert!((value - 19.9968).abs() < 1e-9);
    }

    #[test]
    fn test_volume_quantity_scenario() {
        let ratio = 1.0 / 48.0;
        let slab = square(480.0); // 230400 px²
        let area = condition(MeasurementType::Area, None);
        let volume = condition(MeasurementType::Volume, Some(4.0));

        let square_feet = quantity(&area, &slab, ratio).unwrap();
        assert!((square_feet - 100.0).abs() < 1e-9);

        let cubic_feet = quantity(&volume, &slab, ratio).unwrap();
        assert!((cubic_feet - 33.333_333).abs() < 1e-5);
        assert!((cubic_feet / 27.0 - 1.2345).abs() < 1e-3);
    }

    #[test]
    fn test_volume_without_depth() {
        let volume = condition(MeasurementType::Volume, None);
        let result = quantity(&volume, &square(10.0), 1.0);
        assert_eq!(result, Err(TakeoffError::MissingDepth(volume.id)));
    }

    #[test]
    fn test_count_quantity() {
        let count = condition(MeasurementType::Count, None);
        assert_eq!(quantity(&count, &Geometry::point(p(5.0, 5.0)).unwrap(), 0.5).unwrap(), 1.0);

        let line = Geometry::line(p(0.0, 0.0), p(1.0, 0.0)).unwrap();
        assert!(matches!(
            quantity(&count, &line, 0.5),
            Err(TakeoffError::UnsupportedGeometry { .. })
        ));
    }

    #[test]
    fn test_quantity_is_bitwise_repeatable() {
        let ratio = 0.020_833_333_333;
        let geometry =
            Geometry::polygon(vec![p(0.1, 0.3), p(470.7, 12.2), p(455.9, 488.1), p(3.3, 470.4)])
                .unwrap();
        let volume = condition(MeasurementType::Volume, Some(4.0));

        let first = quantity(&volume, &geometry, ratio).unwrap();
        let second = quantity(&volume, &geometry, ratio).unwrap();
        assert_eq!(first.to_bits(), second.to_bits());
    }

    #[test]
    fn test_serde_validates_geometry() {
        let json = r#"{"geometry_type":"line","points":[{"x":1.0,"y":1.0},{"x":1.0,"y":1.0}]}"#;
        assert!(serde_json::from_str::<Geometry>(json).is_err());

        let json = r#"{"geometry_type":"line","points":[{"x":1.0,"y":1.0},{"x":4.0,"y":5.0}]}"#;
        let geometry: Geometry = serde_json::from_str(json).unwrap();
        assert_eq!(geometry.geometry_type(), GeometryType::Line);
        assert_eq!(pixel_length(&geometry).unwrap(), 5.0);
    }

    #[test]
    fn test_label_position() {
        let polyline = Geometry::polyline(vec![p(0.0, 0.0), p(100.0, 0.0), p(100.0, 100.0)]).unwrap();
        assert_eq!(polyline.label_position(), p(100.0, 0.0));
        assert_eq!(square(60.0).label_position(), p(30.0, 30.0));
    }

    #[test]
    fn test_nearest_point_on_path() {
        let polyline = Geometry::polyline(vec![p(0.0, 0.0), p(100.0, 0.0), p(100.0, 100.0)]).unwrap();
        let (segment, point, distance) = nearest_point_on_path(&polyline, &p(40.0, 7.0)).unwrap();
        assert_eq!(segment, 0);
        assert_eq!(point, p(40.0, 0.0));
        assert_eq!(distance, 7.0);

        let (segment, point, _) = nearest_point_on_path(&polyline, &p(130.0, 60.0)).unwrap();
        assert_eq!(segment, 1);
        assert_eq!(point, p(100.0, 60.0));
    }

    #[test]
    fn test_offset_polygon_outward() {
        let offset = offset_points(&square(10.0), 2.0);
        let grown = Geometry::polygon(offset).unwrap();
        assert!((pixel_area(&grown).unwrap() - 196.0).abs() < 1e-9);

        let shrunk = Geometry::polygon(offset_points(&square(10.0), -2.0)).unwrap();
        assert!((pixel_area(&shrunk).unwrap() - 36.0).abs() < 1e-9);
    }

    #[test]
    fn test_offset_polyline_left() {
        let line = Geometry::line(p(0.0, 0.0), p(10.0, 0.0)).unwrap();
        let offset = offset_points(&line, 3.0);
        assert_eq!(offset, vec![p(0.0, 3.0), p(10.0, 3.0)]);
    }

    #[test]
    fn test_bounding_box_iou_and_rescale() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-12);
        assert_eq!(a.iou(&BoundingBox::new(20.0, 20.0, 1.0, 1.0)), 0.0);

        let compressed = BoundingBox::new(50.0, 25.0, 10.0, 5.0);
        assert_eq!(compressed.rescaled(0.5), BoundingBox::new(100.0, 50.0, 20.0, 10.0));
    }

    #[test]
    fn test_snap_to_grid() {
        assert_eq!(snap_to_grid(&p(12.4, 17.6), 5.0), p(10.0, 20.0));
    }
}
