//! Geometry adjustments on existing measurements
//!
//! Every adjustment validates its result before touching the store: a
//! result that breaks a geometry invariant is rejected and the measurement
//! keeps its previous geometry and quantity.

use crate::catalog::Catalog;
use crate::config::TakeoffConfig;
use crate::error::{TakeoffError, TakeoffResult};
use crate::geometry::{self, Geometry, GeometryType, PixelPoint};
use crate::history::{HistoryAction, HistoryRecord};
use crate::measurement::{Measurement, MeasurementId, MeasurementStore, NewMeasurement, ReviewStatus};

/// A requested edit, in wire form `{"operation": ..., "params": {...}}`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "operation", content = "params", rename_all = "snake_case")]
pub enum Adjustment {
    /// Translate every vertex
    Nudge { dx: f64, dy: f64 },
    /// Round every vertex to a grid
    Snap { grid_size: f64 },
    /// Move an endpoint so the path gets longer
    Extend { vertex_index: usize, new_point: PixelPoint },
    /// Move an endpoint so the path gets shorter
    Trim { vertex_index: usize, new_point: PixelPoint },
    /// Parallel offset
    Offset { distance: f64 },
    /// Divide a path in two at the nearest point
    Split { at_point: PixelPoint },
    /// Merge another path onto this one
    Join { other_id: MeasurementId },
}

impl Adjustment {
    pub fn name(&self) -> &'static str {
        match self {
            Adjustment::Nudge { .. } => "nudge",
            Adjustment::Snap { .. } => "snap",
            Adjustment::Extend { .. } => "extend",
            Adjustment::Trim { .. } => "trim",
            Adjustment::Offset { .. } => "offset",
            Adjustment::Split { .. } => "split",
            Adjustment::Join { .. } => "join",
        }
    }
}

/// What an adjustment changed
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AdjustmentOutcome {
    pub measurement: Measurement,
    /// Second half of a split
    pub created: Option<Measurement>,
    /// Measurement absorbed by a join
    pub removed: Option<MeasurementId>,
}

/// Apply an adjustment to a measurement
pub fn adjust(
    store: &mut MeasurementStore,
    catalog: &Catalog,
    config: &TakeoffConfig,
    id: MeasurementId,
    adjustment: &Adjustment,
    actor: &str,
    expected_version: Option<u64>,
) -> TakeoffResult<AdjustmentOutcome> {
    store.check_version(id, expected_version)?;
    let current = store.get(id)?.geometry().clone();

    let (created, removed) = match adjustment {
        Adjustment::Nudge { dx, dy } => {
            let moved = nudged(&current, *dx, *dy)?;
            replace(store, catalog, id, moved, actor, adjustment)?;
            (None, None)
        }
        Adjustment::Snap { grid_size } => {
            let aligned = snapped(&current, *grid_size)?;
            replace(store, catalog, id, aligned, actor, adjustment)?;
            (None, None)
        }
        Adjustment::Extend {
            vertex_index,
            new_point,
        } => {
            let moved = moved_endpoint(&current, *vertex_index, *new_point, Direction::Longer)?;
            replace(store, catalog, id, moved, actor, adjustment)?;
            (None, None)
        }
        Adjustment::Trim {
            vertex_index,
            new_point,
        } => {
            let moved = moved_endpoint(&current, *vertex_index, *new_point, Direction::Shorter)?;
            replace(store, catalog, id, moved, actor, adjustment)?;
            (None, None)
        }
        Adjustment::Offset { distance } => {
            let shifted = offset(&current, *distance)?;
            replace(store, catalog, id, shifted, actor, adjustment)?;
            (None, None)
        }
        Adjustment::Split { at_point } => {
            let created = split(store, catalog, id, &current, *at_point, actor)?;
            (Some(created), None)
        }
        Adjustment::Join { other_id } => {
            join(store, catalog, config, id, &current, *other_id, actor)?;
            (None, Some(*other_id))
        }
    };

    tracing::debug!(measurement_id = %id, operation = adjustment.name(), "adjustment applied");

    let measurement = store.get(id)?.clone();
    let created = match created {
        Some(created_id) => Some(store.get(created_id)?.clone()),
        None => None,
    };
    Ok(AdjustmentOutcome {
        measurement,
        created,
        removed,
    })
}

fn replace(
    store: &mut MeasurementStore,
    catalog: &Catalog,
    id: MeasurementId,
    geometry: Geometry,
    actor: &str,
    adjustment: &Adjustment,
) -> TakeoffResult<()> {
    let prior = store.apply_geometry(catalog, id, geometry)?;
    store.append_history(
        HistoryRecord::new(id, actor, HistoryAction::Modified)
            .with_prior_geometry(prior)
            .with_notes(Some(adjustment.name().to_string())),
    );
    Ok(())
}

fn finite(name: &str, values: &[f64]) -> TakeoffResult<()> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(TakeoffError::invalid_parameter(name, "must be finite"))
    }
}

fn nudged(geometry: &Geometry, dx: f64, dy: f64) -> TakeoffResult<Geometry> {
    finite("dx/dy", &[dx, dy])?;
    let points = geometry
        .points()
        .iter()
        .map(|p| p.translated(dx, dy))
        .collect();
    geometry.with_points(points)
}

fn snapped(geometry: &Geometry, grid_size: f64) -> TakeoffResult<Geometry> {
    if !(grid_size.is_finite() && grid_size > 0.0) {
        return Err(TakeoffError::invalid_parameter(
            "grid_size",
            format!("must be positive, got {}", grid_size),
        ));
    }
    let points = geometry
        .points()
        .iter()
        .map(|p| geometry::snap_to_grid(p, grid_size))
        .collect();
    geometry.with_points(points)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Longer,
    Shorter,
}

fn require_path(geometry: &Geometry, operation: &str) -> TakeoffResult<()> {
    match geometry.geometry_type() {
        GeometryType::Line | GeometryType::Polyline => Ok(()),
        other => Err(TakeoffError::IncompatibleGeometry(format!(
            "{} applies to lines and polylines, not {}",
            operation, other
        ))),
    }
}

fn moved_endpoint(
    geometry: &Geometry,
    vertex_index: usize,
    new_point: PixelPoint,
    direction: Direction,
) -> TakeoffResult<Geometry> {
    let operation = match direction {
        Direction::Longer => "extend",
        Direction::Shorter => "trim",
    };
    require_path(geometry, operation)?;
    finite("new_point", &[new_point.x, new_point.y])?;

    let last = geometry.points().len() - 1;
    if vertex_index != 0 && vertex_index != last {
        return Err(TakeoffError::IncompatibleGeometry(format!(
            "{} moves an endpoint (0 or {}), got vertex {}",
            operation, last, vertex_index
        )));
    }

    let mut points = geometry.points().to_vec();
    points[vertex_index] = new_point;
    let moved = geometry.with_points(points)?;

    let before = geometry::pixel_length(geometry)?;
    let after = geometry::pixel_length(&moved)?;
    let wrong_way = match direction {
        Direction::Longer => after < before,
        Direction::Shorter => after > before,
    };
    if wrong_way {
        return Err(TakeoffError::IncompatibleGeometry(format!(
            "{} would change length from {:.2} px to {:.2} px",
            operation, before, after
        )));
    }
    Ok(moved)
}

fn offset(geometry: &Geometry, distance: f64) -> TakeoffResult<Geometry> {
    if geometry.geometry_type() == GeometryType::Point {
        return Err(TakeoffError::IncompatibleGeometry(
            "points cannot be offset".into(),
        ));
    }
    finite("distance", &[distance])?;

    let shifted = geometry.with_points(geometry::offset_points(geometry, distance))?;

    // An inward offset past the centre flips or re-inflates the polygon
    if geometry.geometry_type() == GeometryType::Polygon {
        let before = geometry::orientation(geometry.points());
        let after = geometry::orientation(shifted.points());
        let grew = after.abs() > before.abs();
        if before.signum() != after.signum() || (distance < 0.0 && grew) || (distance > 0.0 && !grew) {
            return Err(TakeoffError::InvalidAdjustment(format!(
                "offset of {} px collapses the polygon",
                distance
            )));
        }
    }
    Ok(shifted)
}

fn split(
    store: &mut MeasurementStore,
    catalog: &Catalog,
    id: MeasurementId,
    geometry: &Geometry,
    at_point: PixelPoint,
    actor: &str,
) -> TakeoffResult<MeasurementId> {
    require_path(geometry, "split")?;
    finite("at_point", &[at_point.x, at_point.y])?;

    let (segment, cut, _) = geometry::nearest_point_on_path(geometry, &at_point).ok_or_else(|| {
        TakeoffError::InvalidAdjustment("path has no segments to split".into())
    })?;

    // A cut on an existing vertex reuses it instead of doubling it
    let points = geometry.points();
    let mut head = points[..=segment].to_vec();
    if !points[segment].coincides_with(&cut) {
        head.push(cut);
    }
    let mut tail = vec![cut];
    let rest = &points[segment + 1..];
    match rest.split_first() {
        Some((next, after)) if next.coincides_with(&cut) => tail.extend_from_slice(after),
        _ => tail.extend_from_slice(rest),
    }

    let at_endpoint = |e: TakeoffError| match e {
        TakeoffError::InvalidGeometry(_) => {
            TakeoffError::InvalidAdjustment("split point falls on an endpoint".into())
        }
        other => other,
    };
    let head = geometry.with_points(head).map_err(at_endpoint)?;
    let tail = geometry.with_points(tail).map_err(at_endpoint)?;

    let original = store.get(id)?.clone();
    let prior = store.apply_geometry_with_status(catalog, id, head, Some(ReviewStatus::Unreviewed))?;
    store.append_history(
        HistoryRecord::new(id, actor, HistoryAction::Modified)
            .with_prior_geometry(prior)
            .with_prior_status(original.review_status())
            .with_notes(Some("split".into())),
    );

    let new = NewMeasurement {
        page_id: original.page_id(),
        condition_id: original.condition_id(),
        geometry: tail,
        notes: original.notes().map(str::to_string),
        is_ai_generated: original.is_ai_generated(),
        ai_confidence: original.ai_confidence(),
        source_detection_id: original.source_detection_id(),
    };
    let created = store.create(catalog, new, actor)?.id();
    Ok(created)
}

fn join(
    store: &mut MeasurementStore,
    catalog: &Catalog,
    config: &TakeoffConfig,
    id: MeasurementId,
    geometry: &Geometry,
    other_id: MeasurementId,
    actor: &str,
) -> TakeoffResult<()> {
    if other_id == id {
        return Err(TakeoffError::InvalidAdjustment(
            "a measurement cannot be joined to itself".into(),
        ));
    }
    let this = store.get(id)?;
    let other = store.get(other_id)?;

    if geometry.geometry_type() != GeometryType::Polyline
        || other.geometry_type() != GeometryType::Polyline
    {
        return Err(TakeoffError::IncompatibleGeometry(format!(
            "join needs two polylines, got {} and {}",
            geometry.geometry_type(),
            other.geometry_type()
        )));
    }
    if this.page_id() != other.page_id() || this.condition_id() != other.condition_id() {
        return Err(TakeoffError::IncompatibleGeometry(
            "joined measurements must share page and condition".into(),
        ));
    }

    let joined = joined_points(geometry.points(), other.geometry().points(), config.join_epsilon_px)
        .ok_or_else(|| {
            TakeoffError::IncompatibleGeometry(format!(
                "no endpoints within {} px",
                config.join_epsilon_px
            ))
        })?;
    let joined = geometry.with_points(joined)?;

    let prior = store.apply_geometry(catalog, id, joined)?;
    store.append_history(
        HistoryRecord::new(id, actor, HistoryAction::Modified)
            .with_prior_geometry(prior)
            .with_notes(Some(format!("join {}", other_id))),
    );
    store.delete(other_id)?;
    Ok(())
}

/// Concatenate two paths at their closest pair of endpoints
///
/// The first path keeps its vertex where the two meet.
fn joined_points(a: &[PixelPoint], b: &[PixelPoint], epsilon: f64) -> Option<Vec<PixelPoint>> {
    let (a_first, a_last) = (a[0], a[a.len() - 1]);
    let (b_first, b_last) = (b[0], b[b.len() - 1]);
    let reversed = |points: &[PixelPoint]| points.iter().rev().copied().collect::<Vec<_>>();

    let options = [
        (a_last.distance_to(&b_first), 0),
        (a_last.distance_to(&b_last), 1),
        (a_first.distance_to(&b_last), 2),
        (a_first.distance_to(&b_first), 3),
    ];
    let (distance, pairing) = options
        .iter()
        .copied()
        .min_by(|x, y| x.0.total_cmp(&y.0))?;
    if distance > epsilon {
        return None;
    }

    let joined = match pairing {
        0 => a.iter().chain(&b[1..]).copied().collect(),
        1 => a.iter().copied().chain(reversed(b).into_iter().skip(1)).collect(),
        2 => b[..b.len() - 1].iter().chain(a).copied().collect(),
        _ => reversed(b)
            .into_iter()
            .take(b.len() - 1)
            .chain(a.iter().copied())
            .collect(),
    };
    Some(joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::tests::{fixture, p, polyline_960, slab_230400};
    use crate::measurement::MeasurementUpdate;

    fn setup(geometry: Geometry) -> (crate::measurement::tests::Fixture, MeasurementStore, MeasurementId) {
        let f = fixture(Some(0.5));
        let mut store = MeasurementStore::new();
        let condition = match geometry.geometry_type() {
            GeometryType::Polygon => f.area,
            GeometryType::Point => f.count,
            _ => f.linear,
        };
        let id = store
            .create(&f.catalog, NewMeasurement::new(f.page_id, condition, geometry), "estimator")
            .unwrap()
            .id();
        (f, store, id)
    }

    fn run(
        f: &crate::measurement::tests::Fixture,
        store: &mut MeasurementStore,
        id: MeasurementId,
        adjustment: Adjustment,
    ) -> TakeoffResult<AdjustmentOutcome> {
        adjust(store, &f.catalog, &TakeoffConfig::default(), id, &adjustment, "estimator", None)
    }

    #[test]
    fn test_wire_form() {
        let adjustment: Adjustment =
            serde_json::from_str(r#"{"operation": "nudge", "params": {"dx": 5.0, "dy": -2.0}}"#).unwrap();
        assert_eq!(adjustment, Adjustment::Nudge { dx: 5.0, dy: -2.0 });
    }

    #[test]
    fn test_nudge_recomputes_and_audits() {
        let (f, mut store, id) = setup(polyline_960());
        let outcome = run(&f, &mut store, id, Adjustment::Nudge { dx: 10.0, dy: 5.0 }).unwrap();

        assert_eq!(outcome.measurement.geometry().points()[0], p(10.0, 5.0));
        assert_eq!(outcome.measurement.quantity(), 480.0);

        let history = store.history(id);
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].prior_geometry, Some(polyline_960()));
        assert_eq!(history[1].notes.as_deref(), Some("nudge"));
    }

    #[test]
    fn test_snap_requires_positive_grid() {
        let (f, mut store, id) = setup(polyline_960());
        assert!(matches!(
            run(&f, &mut store, id, Adjustment::Snap { grid_size: 0.0 }),
            Err(TakeoffError::InvalidParameter { .. })
        ));

        let outcome = run(&f, &mut store, id, Adjustment::Snap { grid_size: 100.0 }).unwrap();
        assert_eq!(outcome.measurement.geometry().points()[1], p(500.0, 0.0));
    }

    #[test]
    fn test_snap_collapsing_geometry_leaves_measurement_untouched() {
        let line = Geometry::line(p(1.0, 1.0), p(2.0, 2.0)).unwrap();
        let (f, mut store, id) = setup(line.clone());

        assert!(matches!(
            run(&f, &mut store, id, Adjustment::Snap { grid_size: 100.0 }),
            Err(TakeoffError::InvalidGeometry(_))
        ));
        assert_eq!(store.get(id).unwrap().geometry(), &line);
        assert_eq!(store.history(id).len(), 1);
    }

    #[test]
    fn test_extend_and_trim_endpoints() {
        let (f, mut store, id) = setup(polyline_960());

        let outcome = run(
            &f,
            &mut store,
            id,
            Adjustment::Extend {
                vertex_index: 2,
                new_point: p(480.0, 600.0),
            },
        )
        .unwrap();
        assert_eq!(outcome.measurement.pixel_length(), Some(1080.0));
        assert_eq!(outcome.measurement.geometry_type(), GeometryType::Polyline);

        // Extending toward the start shortens the path
        assert!(matches!(
            run(
                &f,
                &mut store,
                id,
                Adjustment::Extend {
                    vertex_index: 2,
                    new_point: p(480.0, 100.0),
                },
            ),
            Err(TakeoffError::IncompatibleGeometry(_))
        ));

        let outcome = run(
            &f,
            &mut store,
            id,
            Adjustment::Trim {
                vertex_index: 0,
                new_point: p(80.0, 0.0),
            },
        )
        .unwrap();
        assert_eq!(outcome.measurement.pixel_length(), Some(1000.0));

        assert!(matches!(
            run(
                &f,
                &mut store,
                id,
                Adjustment::Trim {
                    vertex_index: 1,
                    new_point: p(480.0, 10.0),
                },
            ),
            Err(TakeoffError::IncompatibleGeometry(_))
        ));
    }

    #[test]
    fn test_extend_trim_misuse_leaves_measurement_untouched() {
        let (f, mut store, id) = setup(polyline_960());
        let before = store.get(id).unwrap().clone();

        let misuses = [
            // Interior vertex
            Adjustment::Extend {
                vertex_index: 1,
                new_point: p(600.0, 0.0),
            },
            // Past the last vertex
            Adjustment::Trim {
                vertex_index: 3,
                new_point: p(480.0, 400.0),
            },
            // Trim that lengthens
            Adjustment::Trim {
                vertex_index: 2,
                new_point: p(480.0, 900.0),
            },
            // Extend that shortens
            Adjustment::Extend {
                vertex_index: 0,
                new_point: p(400.0, 0.0),
            },
        ];
        for misuse in misuses {
            assert!(
                matches!(
                    run(&f, &mut store, id, misuse.clone()),
                    Err(TakeoffError::IncompatibleGeometry(_))
                ),
                "{:?} should be incompatible",
                misuse
            );
        }
        assert_eq!(store.get(id).unwrap(), &before);
        assert_eq!(store.history(id).len(), 1);
    }

    #[test]
    fn test_extend_polygon_incompatible() {
        let (f, mut store, id) = setup(slab_230400());
        let before = store.get(id).unwrap().clone();

        assert!(matches!(
            run(
                &f,
                &mut store,
                id,
                Adjustment::Extend {
                    vertex_index: 0,
                    new_point: p(-10.0, -10.0),
                },
            ),
            Err(TakeoffError::IncompatibleGeometry(_))
        ));
        assert_eq!(store.get(id).unwrap(), &before);
    }

    #[test]
    fn test_offset_polygon_outward_and_collapse() {
        let square = Geometry::polygon(vec![p(0.0, 0.0), p(10.0, 0.0), p(10.0, 10.0), p(0.0, 10.0)]).unwrap();
        let (f, mut store, id) = setup(square);

        let outcome = run(&f, &mut store, id, Adjustment::Offset { distance: 1.0 }).unwrap();
        assert!((outcome.measurement.pixel_area().unwrap() - 144.0).abs() < 1e-9);

        assert!(run(&f, &mut store, id, Adjustment::Offset { distance: -20.0 }).is_err());
        assert!((store.get(id).unwrap().pixel_area().unwrap() - 144.0).abs() < 1e-9);
    }

    #[test]
    fn test_offset_point_incompatible() {
        let (f, mut store, id) = setup(Geometry::point(p(5.0, 5.0)).unwrap());
        assert!(matches!(
            run(&f, &mut store, id, Adjustment::Offset { distance: 2.0 }),
            Err(TakeoffError::IncompatibleGeometry(_))
        ));
    }

    #[test]
    fn test_split_polyline() {
        let (f, mut store, id) = setup(polyline_960());
        store
            .update(
                &f.catalog,
                id,
                MeasurementUpdate {
                    notes: Some("east run".into()),
                    ..Default::default()
                },
                "estimator",
            )
            .unwrap();

        let outcome = run(&f, &mut store, id, Adjustment::Split { at_point: p(482.0, 100.0) }).unwrap();
        let created = outcome.created.unwrap();

        assert_eq!(outcome.measurement.pixel_length(), Some(580.0));
        assert_eq!(created.pixel_length(), Some(380.0));
        assert_eq!(created.geometry().points()[0], p(480.0, 100.0));
        assert_eq!(created.condition_id(), outcome.measurement.condition_id());
        assert_eq!(created.notes(), Some("east run"));
        assert_eq!(created.review_status(), ReviewStatus::Unreviewed);
        assert_eq!(store.for_page(f.page_id).len(), 2);
    }

    #[test]
    fn test_split_on_interior_vertex() {
        let (f, mut store, id) = setup(polyline_960());
        let version = store.get(id).unwrap().version();

        let outcome = run(&f, &mut store, id, Adjustment::Split { at_point: p(480.0, 0.0) }).unwrap();
        let created = outcome.created.unwrap();

        assert_eq!(outcome.measurement.geometry().points(), &[p(0.0, 0.0), p(480.0, 0.0)]);
        assert_eq!(created.geometry().points(), &[p(480.0, 0.0), p(480.0, 480.0)]);
        assert_eq!(outcome.measurement.version(), version + 1);
        assert_eq!(outcome.measurement.review_status(), ReviewStatus::Unreviewed);
    }

    #[test]
    fn test_split_at_endpoint_rejected() {
        let (f, mut store, id) = setup(polyline_960());
        assert!(matches!(
            run(&f, &mut store, id, Adjustment::Split { at_point: p(-5.0, 0.0) }),
            Err(TakeoffError::InvalidAdjustment(_))
        ));
        assert_eq!(store.for_page(f.page_id).len(), 1);
    }

    #[test]
    fn test_join_within_epsilon() {
        let (f, mut store, id) = setup(polyline_960());
        let other = store
            .create(
                &f.catalog,
                NewMeasurement::new(
                    f.page_id,
                    f.linear,
                    Geometry::polyline(vec![p(0.0, 481.0), p(481.0, 481.0)]).unwrap(),
                ),
                "estimator",
            )
            .unwrap()
            .id();

        let outcome = run(&f, &mut store, id, Adjustment::Join { other_id: other }).unwrap();
        assert_eq!(outcome.removed, Some(other));
        assert_eq!(outcome.measurement.geometry().points().len(), 4);
        assert_eq!(outcome.measurement.geometry().points()[3], p(0.0, 481.0));
        assert!(store.get(other).is_err());
    }

    #[test]
    fn test_join_too_far_apart() {
        let (f, mut store, id) = setup(polyline_960());
        let other = store
            .create(
                &f.catalog,
                NewMeasurement::new(
                    f.page_id,
                    f.linear,
                    Geometry::polyline(vec![p(600.0, 600.0), p(700.0, 600.0)]).unwrap(),
                ),
                "estimator",
            )
            .unwrap()
            .id();

        assert!(matches!(
            run(&f, &mut store, id, Adjustment::Join { other_id: other }),
            Err(TakeoffError::IncompatibleGeometry(_))
        ));
        assert!(store.get(other).is_ok());
        assert_eq!(store.get(id).unwrap().geometry(), &polyline_960());
    }

    #[test]
    fn test_joined_points_orientations() {
        let a = [p(0.0, 0.0), p(10.0, 0.0)];
        let b = [p(20.0, 0.0), p(10.0, 0.0)];
        assert_eq!(
            joined_points(&a, &b, 0.5).unwrap(),
            vec![p(0.0, 0.0), p(10.0, 0.0), p(20.0, 0.0)]
        );

        let b = [p(-10.0, 0.0), p(0.0, 0.0)];
        assert_eq!(
            joined_points(&a, &b, 0.5).unwrap(),
            vec![p(-10.0, 0.0), p(0.0, 0.0), p(10.0, 0.0)]
        );
    }
}
