//! Review workflow
//!
//! Gates trust in measurements. Fresh measurements start `unreviewed`;
//! reviewers approve, reject or modify them. Approved and rejected
//! measurements only re-open through `modify`.

use crate::catalog::{Catalog, PageId, ProjectId};
use crate::config::TakeoffConfig;
use crate::error::{TakeoffError, TakeoffResult};
use crate::geometry::Geometry;
use crate::history::{HistoryAction, HistoryEntry, HistoryRecord};
use crate::measurement::{check_unit_interval, Measurement, MeasurementId, MeasurementStore, ReviewStatus};

/// Per-status counts for a page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReviewSummary {
    pub unreviewed: usize,
    pub approved: usize,
    pub rejected: usize,
    pub modified: usize,
}

impl ReviewSummary {
    pub fn total(&self) -> usize {
        self.unreviewed + self.approved + self.rejected + self.modified
    }
}

fn check_decidable(measurement: &Measurement, action: &str) -> TakeoffResult<()> {
    match measurement.review_status() {
        ReviewStatus::Unreviewed | ReviewStatus::Modified => Ok(()),
        status => Err(TakeoffError::InvalidReviewTransition {
            id: measurement.id(),
            action: action.to_string(),
            status: status.to_string(),
        }),
    }
}

fn decide(
    store: &mut MeasurementStore,
    id: MeasurementId,
    reviewer: &str,
    status: ReviewStatus,
    action: HistoryAction,
    notes: Option<String>,
) -> TakeoffResult<()> {
    let prior = store.get(id)?.review_status();
    store.set_review_status(id, status)?;
    store.append_history(
        HistoryRecord::new(id, reviewer, action)
            .with_prior_status(prior)
            .with_notes(notes),
    );
    tracing::debug!(measurement_id = %id, reviewer, from = %prior, to = %status, "review decision");
    Ok(())
}

pub fn approve<'a>(
    store: &'a mut MeasurementStore,
    id: MeasurementId,
    reviewer: &str,
    notes: Option<String>,
) -> TakeoffResult<&'a Measurement> {
    check_decidable(store.get(id)?, "approved")?;
    decide(store, id, reviewer, ReviewStatus::Approved, HistoryAction::Approved, notes)?;
    store.get(id)
}

/// Reject with a mandatory reason
pub fn reject<'a>(
    store: &'a mut MeasurementStore,
    id: MeasurementId,
    reviewer: &str,
    reason: &str,
) -> TakeoffResult<&'a Measurement> {
    let measurement = store.get(id)?;
    if reason.trim().is_empty() {
        return Err(TakeoffError::ReviewReasonRequired(id));
    }
    check_decidable(measurement, "rejected")?;
    decide(
        store,
        id,
        reviewer,
        ReviewStatus::Rejected,
        HistoryAction::Rejected,
        Some(reason.trim().to_string()),
    )?;
    store.get(id)
}

/// Replace geometry as part of review
///
/// Allowed from any status; the history entry keeps both the prior geometry
/// and the prior status.
pub fn modify<'a>(
    store: &'a mut MeasurementStore,
    catalog: &Catalog,
    id: MeasurementId,
    reviewer: &str,
    geometry: Geometry,
    notes: Option<String>,
    expected_version: Option<u64>,
) -> TakeoffResult<&'a Measurement> {
    store.check_version(id, expected_version)?;
    let prior_status = store.get(id)?.review_status();

    let prior_geometry = store.apply_geometry(catalog, id, geometry)?;
    store.set_review_status(id, ReviewStatus::Modified)?;
    store.append_history(
        HistoryRecord::new(id, reviewer, HistoryAction::Modified)
            .with_prior_geometry(prior_geometry)
            .with_prior_status(prior_status)
            .with_notes(notes),
    );
    store.get(id)
}

/// Approve every confident AI-generated, unreviewed measurement of a project
///
/// Returns the number approved. `threshold` and `reviewer` fall back to the
/// configured defaults.
pub fn auto_accept(
    store: &mut MeasurementStore,
    catalog: &Catalog,
    config: &TakeoffConfig,
    project_id: ProjectId,
    threshold: Option<f64>,
    reviewer: Option<&str>,
) -> TakeoffResult<usize> {
    catalog.project(project_id)?;
    let threshold = threshold.unwrap_or(config.auto_accept_threshold);
    check_unit_interval("threshold", threshold)?;
    let reviewer = reviewer.unwrap_or(config.auto_accept_actor.as_str());

    let eligible: Vec<MeasurementId> = store
        .for_project(catalog, project_id)
        .into_iter()
        .filter(|m| {
            m.is_ai_generated()
                && m.review_status() == ReviewStatus::Unreviewed
                && m.ai_confidence().is_some_and(|c| c >= threshold)
        })
        .map(|m| m.id())
        .collect();

    for &id in &eligible {
        decide(
            store,
            id,
            reviewer,
            ReviewStatus::Approved,
            HistoryAction::Approved,
            Some(format!("auto-accepted at threshold {}", threshold)),
        )?;
    }

    tracing::info!(
        project_id = %project_id,
        threshold,
        approved = eligible.len(),
        "auto-accept finished"
    );
    Ok(eligible.len())
}

/// Next unreviewed measurement on a page after `after_id`, by creation order
///
/// Does not wrap around. An unknown `after_id` starts from the beginning.
pub fn next_unreviewed(
    store: &MeasurementStore,
    page_id: PageId,
    after_id: Option<MeasurementId>,
) -> Option<&Measurement> {
    let measurements = store.for_page(page_id);
    let start = after_id
        .and_then(|after| measurements.iter().position(|m| m.id() == after))
        .map_or(0, |index| index + 1);

    measurements
        .into_iter()
        .skip(start)
        .find(|m| m.review_status() == ReviewStatus::Unreviewed)
}

/// Audit trail, oldest first
///
/// Deleted measurements keep their trail; an id with no trail at all is not found.
pub fn history(store: &MeasurementStore, id: MeasurementId) -> TakeoffResult<Vec<&HistoryEntry>> {
    let entries = store.history(id);
    if entries.is_empty() {
        store.get(id)?;
    }
    Ok(entries)
}

pub fn review_summary(store: &MeasurementStore, page_id: PageId) -> ReviewSummary {
    let mut summary = ReviewSummary::default();
    for measurement in store.for_page(page_id) {
        match measurement.review_status() {
            ReviewStatus::Unreviewed => summary.unreviewed += 1,
            ReviewStatus::Approved => summary.approved += 1,
            ReviewStatus::Rejected => summary.rejected += 1,
            ReviewStatus::Modified => summary.modified += 1,
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::tests::{fixture, p, Fixture};
    use crate::measurement::NewMeasurement;

    fn add_point(f: &Fixture, store: &mut MeasurementStore, confidence: Option<f64>) -> MeasurementId {
        let mut new = NewMeasurement::new(f.page_id, f.count, Geometry::point(p(1.0, 1.0)).unwrap());
        if let Some(confidence) = confidence {
            new = new.ai_generated(confidence, None);
        }
        store.create(&f.catalog, new, "estimator").unwrap().id()
    }

    #[test]
    fn test_approve_then_locked() {
        let f = fixture(Some(0.5));
        let mut store = MeasurementStore::new();
        let id = add_point(&f, &mut store, None);

        approve(&mut store, id, "reviewer", None).unwrap();
        assert_eq!(store.get(id).unwrap().review_status(), ReviewStatus::Approved);

        let err = reject(&mut store, id, "reviewer", "wrong symbol").unwrap_err();
        assert!(matches!(err, TakeoffError::InvalidReviewTransition { .. }));
        assert!(approve(&mut store, id, "reviewer", None).is_err());
    }

    #[test]
    fn test_reject_requires_reason() {
        let f = fixture(Some(0.5));
        let mut store = MeasurementStore::new();
        let id = add_point(&f, &mut store, None);

        assert_eq!(
            reject(&mut store, id, "reviewer", "   ").unwrap_err(),
            TakeoffError::ReviewReasonRequired(id)
        );
        let m = reject(&mut store, id, "reviewer", "duplicate").unwrap();
        assert_eq!(m.review_status(), ReviewStatus::Rejected);

        let trail = history(&store, id).unwrap();
        assert_eq!(trail.last().unwrap().notes.as_deref(), Some("duplicate"));
        assert_eq!(trail.last().unwrap().prior_status, Some(ReviewStatus::Unreviewed));
    }

    #[test]
    fn test_modify_reopens_approved() {
        let f = fixture(Some(0.5));
        let mut store = MeasurementStore::new();
        let id = add_point(&f, &mut store, None);
        approve(&mut store, id, "reviewer", None).unwrap();

        let m = modify(
            &mut store,
            &f.catalog,
            id,
            "reviewer",
            Geometry::point(p(2.0, 2.0)).unwrap(),
            Some("moved onto symbol".into()),
            None,
        )
        .unwrap();
        assert_eq!(m.review_status(), ReviewStatus::Modified);

        let trail = history(&store, id).unwrap();
        let last = trail.last().unwrap();
        assert_eq!(last.action, HistoryAction::Modified);
        assert_eq!(last.prior_status, Some(ReviewStatus::Approved));
        assert_eq!(last.prior_geometry, Some(Geometry::point(p(1.0, 1.0)).unwrap()));

        approve(&mut store, id, "reviewer", None).unwrap();
    }

    #[test]
    fn test_auto_accept_scenario() {
        let f = fixture(Some(0.5));
        let mut store = MeasurementStore::new();
        let high = add_point(&f, &mut store, Some(0.95));
        let low = add_point(&f, &mut store, Some(0.88));
        let mid = add_point(&f, &mut store, Some(0.92));
        let manual = add_point(&f, &mut store, None);

        let config = TakeoffConfig::default();
        let approved = auto_accept(&mut store, &f.catalog, &config, f.project_id, Some(0.9), None).unwrap();

        assert_eq!(approved, 2);
        assert_eq!(store.get(high).unwrap().review_status(), ReviewStatus::Approved);
        assert_eq!(store.get(mid).unwrap().review_status(), ReviewStatus::Approved);
        assert_eq!(store.get(low).unwrap().review_status(), ReviewStatus::Unreviewed);
        assert_eq!(store.get(manual).unwrap().review_status(), ReviewStatus::Unreviewed);
        assert_eq!(history(&store, high).unwrap()[1].actor, "auto-accept");
    }

    #[test]
    fn test_auto_accept_threshold_validated() {
        let f = fixture(Some(0.5));
        let mut store = MeasurementStore::new();
        let config = TakeoffConfig::default();
        assert!(matches!(
            auto_accept(&mut store, &f.catalog, &config, f.project_id, Some(1.5), None),
            Err(TakeoffError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_next_unreviewed_no_wrap() {
        let f = fixture(Some(0.5));
        let mut store = MeasurementStore::new();
        let first = add_point(&f, &mut store, None);
        let second = add_point(&f, &mut store, None);
        let third = add_point(&f, &mut store, None);
        approve(&mut store, second, "reviewer", None).unwrap();

        assert_eq!(next_unreviewed(&store, f.page_id, None).unwrap().id(), first);
        assert_eq!(next_unreviewed(&store, f.page_id, Some(first)).unwrap().id(), third);
        assert!(next_unreviewed(&store, f.page_id, Some(third)).is_none());
        assert_eq!(
            next_unreviewed(&store, f.page_id, Some(MeasurementId::new_v4())).unwrap().id(),
            first
        );
    }

    #[test]
    fn test_history_for_deleted_and_unknown() {
        let f = fixture(Some(0.5));
        let mut store = MeasurementStore::new();
        let id = add_point(&f, &mut store, None);
        store.delete(id).unwrap();

        assert_eq!(history(&store, id).unwrap().len(), 1);
        assert!(history(&store, MeasurementId::new_v4()).is_err());
    }

    #[test]
    fn test_review_summary() {
        let f = fixture(Some(0.5));
        let mut store = MeasurementStore::new();
        let a = add_point(&f, &mut store, None);
        let b = add_point(&f, &mut store, None);
        add_point(&f, &mut store, None);
        approve(&mut store, a, "reviewer", None).unwrap();
        reject(&mut store, b, "reviewer", "not an outlet").unwrap();

        let summary = review_summary(&store, f.page_id);
        assert_eq!(summary.approved, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.unreviewed, 1);
        assert_eq!(summary.total(), 3);
    }
}
