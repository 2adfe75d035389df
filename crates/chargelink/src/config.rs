use std::fs;
use std::path::Path;

use chargelink_detect::{DetectError, DetectorConfig};
use chargelink_link::LinkConfig;
use serde::Deserialize;

/// Errors raised while loading a [`ChargelinkConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid configuration JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] DetectError),
}

/// Everything a chargelink process needs, as one JSON document.
///
/// Missing sections and fields keep their defaults:
///
/// ```
/// use chargelink::ChargelinkConfig;
///
/// let config = ChargelinkConfig::from_json(r#"{"link": {"serial": {"port": "/dev/ttyUSB0"}}}"#)
///     .unwrap();
/// assert_eq!(config.link.serial.port.as_deref(), Some("/dev/ttyUSB0"));
/// assert_eq!(config.link.serial.baud_rate, 115_200);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ChargelinkConfig {
    pub link: LinkConfig,
    pub detector: DetectorConfig,
}

impl ChargelinkConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.detector.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_all_defaults() {
        let config = ChargelinkConfig::from_json("{}").unwrap();
        assert_eq!(config, ChargelinkConfig::default());
    }

    #[test]
    fn partial_sections_override_only_named_fields() {
        let config = ChargelinkConfig::from_json(
            r#"{
                "link": {"reconnect": {"max_retries": 7}},
                "detector": {"resume": {"min_power_kw": 2.5}}
            }"#,
        )
        .unwrap();
        assert_eq!(config.link.reconnect.max_retries, 7);
        assert_eq!(config.link.reconnect.initial_delay_ms, 1_000);
        assert_eq!(config.detector.resume.min_power_kw, 2.5);
        assert_eq!(config.detector.resume.required_consecutive_samples, 3);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            ChargelinkConfig::from_json("{\"link\":"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn rejects_invalid_resume_settings() {
        let err = ChargelinkConfig::from_json(
            r#"{"detector": {"resume": {"sample_interval_seconds": -1}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = ChargelinkConfig::load(Path::new("/nonexistent/chargelink.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/chargelink.json"));
    }
}
