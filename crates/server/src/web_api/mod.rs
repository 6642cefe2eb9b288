//! REST API
//!
//! ## Responsibilities
//!
//! - HTTP routes over the takeoff services
//! - Background detection tasks for scale detection and auto-count
//! - Snapshot persistence after every mutation

mod autocount;
mod catalog;
mod measurements;
mod pages;
mod review;

use axum::{
    extract::State,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde_json::json;

use crate::state::AppState;

pub use pages::{BatchResponse, ScaleDetectionStatus};

/// Attribution used when a request names no actor
pub const DEFAULT_ACTOR: &str = "api";

fn actor_or_default(actor: &Option<String>) -> &str {
    actor.as_deref().unwrap_or(DEFAULT_ACTOR)
}

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // Catalog
        .route("/projects", post(catalog::create_project))
        .route("/projects/:id/pages", post(catalog::create_page))
        .route("/projects/:id/conditions", post(catalog::create_condition))
        .route("/pages/:id", get(catalog::get_page).delete(catalog::delete_page))
        .route("/pages/:id/image", put(catalog::upload_page_image))
        .route(
            "/conditions/:id",
            put(catalog::update_condition).delete(catalog::delete_condition),
        )
        // Calibration
        .route("/pages/:id/detect-scale", post(pages::detect_scale))
        .route("/pages/:id/scale-detection-status", get(pages::scale_detection_status))
        .route("/pages/:id/calibrate", post(pages::calibrate))
        .route("/pages/:id/calibration", delete(pages::reset_calibration))
        .route("/pages/:id/recalculate-all", post(pages::recalculate_page))
        // Measurements
        .route("/conditions/:id/measurements", post(measurements::create_measurement))
        .route(
            "/conditions/:id/recalculate-all",
            post(measurements::recalculate_condition),
        )
        .route(
            "/measurements/:id",
            get(measurements::get_measurement)
                .put(measurements::update_measurement)
                .delete(measurements::delete_measurement),
        )
        .route("/measurements/:id/recalculate", post(measurements::recalculate))
        .route("/measurements/:id/adjust", put(measurements::adjust))
        .route("/pages/:id/measurements", get(measurements::list_for_page))
        .route("/pages/:id/measurements/stale", get(measurements::list_stale))
        // Review
        .route("/measurements/:id/approve", post(review::approve))
        .route("/measurements/:id/reject", post(review::reject))
        .route("/measurements/:id/modify", post(review::modify))
        .route("/measurements/:id/history", get(review::history))
        .route("/projects/:id/measurements/auto-accept", post(review::auto_accept))
        .route(
            "/pages/:id/measurements/next-unreviewed",
            get(review::next_unreviewed),
        )
        .route("/pages/:id/review-summary", get(review::summary))
        // Auto-count
        .route("/pages/:id/auto-count", post(autocount::start))
        .route("/auto-count-sessions/:id", get(autocount::get_session))
        .route("/auto-count-sessions/:id/bulk-confirm", post(autocount::bulk_confirm))
        .route(
            "/auto-count-sessions/:id/create-measurements",
            post(autocount::create_measurements),
        )
        .route("/auto-count-detections/:id/confirm", post(autocount::confirm))
        .route("/auto-count-detections/:id/reject", post(autocount::reject))
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let takeoff = state.takeoff.read().await;
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "measurements": takeoff.measurements().count(),
        "persistent": state.storage.is_some(),
    }))
}
