//! Server configuration
//!
//! Every flag has an environment fallback. Takeoff tunables live in an
//! optional JSON file so they can be shared with the CLI.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use takeoff_core::TakeoffConfig;

#[derive(Debug, Clone, Parser)]
#[command(name = "takeoff-server", version, about = "Takeoff HTTP API")]
pub struct ServerConfig {
    /// Address to bind
    #[arg(long, env = "TAKEOFF_HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, env = "TAKEOFF_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Directory holding the snapshot and page images
    #[arg(long, env = "TAKEOFF_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// JSON file with takeoff tunables
    #[arg(long, env = "TAKEOFF_CONFIG")]
    pub config_file: Option<PathBuf>,

    /// Endpoint of the OCR/vision scale detector
    #[arg(long, env = "TAKEOFF_SCALE_DETECTOR_URL")]
    pub scale_detector_url: Option<String>,

    /// Endpoint of the symbol count detector
    #[arg(long, env = "TAKEOFF_COUNT_DETECTOR_URL")]
    pub count_detector_url: Option<String>,

    /// Overrides the detection timeout from the config file, in seconds
    #[arg(long, env = "TAKEOFF_DETECTION_TIMEOUT_SECS")]
    pub detection_timeout_secs: Option<u64>,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Resolve the takeoff tunables from the config file and flags
    pub fn takeoff_config(&self) -> anyhow::Result<TakeoffConfig> {
        let mut config = match &self.config_file {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("invalid config file {}", path.display()))?
            }
            None => TakeoffConfig::default(),
        };

        if let Some(secs) = self.detection_timeout_secs {
            config = config.with_detection_timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::parse_from(["takeoff-server"]);
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
        assert_eq!(config.takeoff_config().unwrap(), TakeoffConfig::default());
    }

    #[test]
    fn test_config_file_and_timeout_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"join_epsilon_px": 4.0, "detection_timeout": 30}}"#).unwrap();

        let config = ServerConfig::parse_from([
            "takeoff-server",
            "--config-file",
            file.path().to_str().unwrap(),
            "--detection-timeout-secs",
            "5",
        ]);
        let takeoff = config.takeoff_config().unwrap();
        assert_eq!(takeoff.join_epsilon_px, 4.0);
        assert_eq!(takeoff.detection_timeout, Duration::from_secs(5));
        assert_eq!(takeoff.max_candidates, TakeoffConfig::default().max_candidates);
    }

    #[test]
    fn test_invalid_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let config = ServerConfig::parse_from([
            "takeoff-server",
            "--config-file",
            file.path().to_str().unwrap(),
        ]);
        let error = config.takeoff_config().unwrap_err();
        assert!(format!("{error:#}").contains("invalid config file"));
    }
}
