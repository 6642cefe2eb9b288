//! Tunables for the takeoff services

use std::time::Duration;

/// Configuration shared by the takeoff services
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TakeoffConfig {
    /// Maximum pixel distance between endpoints for a join
    pub join_epsilon_px: f64,

    /// Threshold used by auto-accept when the caller supplies none
    pub auto_accept_threshold: f64,

    /// Upper bound on a single external detector call
    #[serde(with = "duration_secs")]
    pub detection_timeout: Duration,

    /// Candidates overlapping a stronger one (or the template) above this IoU are dropped
    pub nms_iou_threshold: f64,

    /// Maximum number of detections kept per auto-count session
    pub max_candidates: usize,

    /// Render resolution assumed for pages created without one
    pub default_dpi: f64,

    /// Actor recorded when auto-accept runs without a reviewer
    pub auto_accept_actor: String,
}

impl Default for TakeoffConfig {
    fn default() -> Self {
        Self {
            join_epsilon_px: 2.0,
            auto_accept_threshold: 0.9,
            detection_timeout: Duration::from_secs(120),
            nms_iou_threshold: 0.5,
            max_candidates: 500,
            default_dpi: 150.0,
            auto_accept_actor: "auto-accept".to_string(),
        }
    }
}

impl TakeoffConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the join epsilon in pixels
    pub fn with_join_epsilon(mut self, epsilon: f64) -> Self {
        self.join_epsilon_px = epsilon;
        self
    }

    /// Set the default auto-accept threshold
    pub fn with_auto_accept_threshold(mut self, threshold: f64) -> Self {
        self.auto_accept_threshold = threshold;
        self
    }

    /// Set the detector timeout
    pub fn with_detection_timeout(mut self, timeout: Duration) -> Self {
        self.detection_timeout = timeout;
        self
    }

    /// Set the IoU above which overlapping candidates are suppressed
    pub fn with_nms_iou_threshold(mut self, threshold: f64) -> Self {
        self.nms_iou_threshold = threshold;
        self
    }

    /// Set the per-session candidate cap
    pub fn with_max_candidates(mut self, max: usize) -> Self {
        self.max_candidates = max;
        self
    }

    /// Set the DPI assumed for new pages
    pub fn with_default_dpi(mut self, dpi: f64) -> Self {
        self.default_dpi = dpi;
        self
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("timeout must be a non-negative number of seconds"));
        }
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TakeoffConfig::default();
        assert_eq!(config.join_epsilon_px, 2.0);
        assert_eq!(config.auto_accept_threshold, 0.9);
        assert_eq!(config.detection_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_builder() {
        let config = TakeoffConfig::new()
            .with_join_epsilon(5.0)
            .with_detection_timeout(Duration::from_secs(3))
            .with_max_candidates(10);

        assert_eq!(config.join_epsilon_px, 5.0);
        assert_eq!(config.detection_timeout, Duration::from_secs(3));
        assert_eq!(config.max_candidates, 10);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: TakeoffConfig =
            serde_json::from_str(r#"{"detection_timeout": 30, "join_epsilon_px": 4.0}"#)
                .expect("config should parse");

        assert_eq!(config.detection_timeout, Duration::from_secs(30));
        assert_eq!(config.join_epsilon_px, 4.0);
        assert_eq!(config.nms_iou_threshold, 0.5);
    }

    #[test]
    fn test_out_of_range_timeout_is_an_error() {
        assert!(serde_json::from_str::<TakeoffConfig>(r#"{"detection_timeout": 1e30}"#).is_err());
        assert!(serde_json::from_str::<TakeoffConfig>(r#"{"detection_timeout": -1}"#).is_err());
    }
}
