//! Device configuration applied at initialization
//!
//! Loaded from a JSON file; missing fields take the module's factory values.

use crate::error::SensorError;
use crate::settings::{check_gate, check_sensitivities, DistanceResolution};
use ld2410_protocol::GATE_COUNT;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

/// Initial configuration of one LD2410
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub motion_sensitivity: [u8; GATE_COUNT],
    pub stationary_sensitivity: [u8; GATE_COUNT],
    pub max_motion_gate: u8,
    pub max_stationary_gate: u8,
    /// Seconds, at least 1 at initialization
    pub presence_timeout: u16,
    pub engineering_mode: bool,
    pub distance_resolution: DistanceResolution,
    /// Bound on every frame wait
    pub response_timeout_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            motion_sensitivity: [50, 50, 40, 30, 20, 15, 15, 15, 15],
            stationary_sensitivity: [0, 0, 40, 40, 30, 30, 20, 20, 20],
            max_motion_gate: 8,
            max_stationary_gate: 8,
            presence_timeout: 5,
            engineering_mode: false,
            distance_resolution: DistanceResolution::Cm75,
            response_timeout_ms: 200,
        }
    }
}

impl DeviceConfig {
    /// Check every value against the module's limits
    pub fn validate(&self) -> Result<(), SensorError> {
        check_sensitivities("motion sensitivity", &self.motion_sensitivity)?;
        check_sensitivities("stationary sensitivity", &self.stationary_sensitivity)?;
        check_gate("max motion gate", self.max_motion_gate)?;
        check_gate("max stationary gate", self.max_stationary_gate)?;
        if self.presence_timeout == 0 {
            return Err(SensorError::InvalidArgument(
                "presence timeout must be at least 1 s".to_string(),
            ));
        }
        if self.response_timeout_ms == 0 {
            return Err(SensorError::InvalidArgument(
                "response timeout must be nonzero".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Load a configuration from a JSON file
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// `Config` for malformed JSON, `InvalidArgument` for out-of-range values.
    pub async fn load(path: &Path) -> Result<Self, SensorError> {
        let config = match fs::read_to_string(path).await {
            Ok(contents) => {
                let config: Self = serde_json::from_str(&contents).map_err(|e| {
                    SensorError::Config(format!("{}: {}", path.display(), e))
                })?;
                tracing::info!("Loaded device configuration from {:?}", path);
                config
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No configuration file at {:?}, using defaults", path);
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir()
            .join(format!("ld2410-sensor-{}-{}", std::process::id(), name))
            .join("device.json")
    }

    #[test]
    fn test_default_is_valid() {
        assert!(DeviceConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut config = DeviceConfig {
            max_motion_gate: 1,
            ..DeviceConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SensorError::InvalidArgument(_))
        ));

        config.max_motion_gate = 8;
        config.presence_timeout = 0;
        assert!(config.validate().is_err());

        config.presence_timeout = 1;
        config.stationary_sensitivity[8] = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: DeviceConfig =
            serde_json::from_str(r#"{"max_motion_gate": 6, "distance_resolution": "20cm"}"#)
                .unwrap();
        assert_eq!(config.max_motion_gate, 6);
        assert_eq!(config.distance_resolution, DistanceResolution::Cm20);
        assert_eq!(config.presence_timeout, 5);
    }

    #[tokio::test]
    async fn test_load_missing_file_gives_defaults() {
        let path = temp_path("missing");
        let config = DeviceConfig::load(&path).await.unwrap();
        assert_eq!(config, DeviceConfig::default());
    }

    fn write_config(name: &str, contents: &str) -> std::path::PathBuf {
        let path = temp_path(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test]
    async fn test_load_file() {
        let config = DeviceConfig {
            presence_timeout: 30,
            engineering_mode: true,
            ..DeviceConfig::default()
        };
        let path = write_config("load", &serde_json::to_string(&config).unwrap());
        let loaded = DeviceConfig::load(&path).await.unwrap();
        assert_eq!(loaded, config);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_load_malformed_json_is_config_error() {
        let path = write_config("malformed", r#"{"max_motion_gate": "eight"#);
        match DeviceConfig::load(&path).await {
            Err(SensorError::Config(msg)) => assert!(msg.contains("device.json")),
            other => panic!("unexpected result: {:?}", other),
        }
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_values() {
        let path = write_config("invalid", r#"{"max_stationary_gate": 12}"#);
        assert!(matches!(
            DeviceConfig::load(&path).await,
            Err(SensorError::InvalidArgument(_))
        ));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
