//! Takeoff Server
//!
//! HTTP API over the takeoff core: calibration with background scale
//! detection, measurements, geometry adjustments, review and auto-count.

pub mod config;
pub mod detectors;
pub mod error;
pub mod state;
pub mod web_api;

pub use config::ServerConfig;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
pub use web_api::create_router;
