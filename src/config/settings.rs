use crate::aggregator::DEFAULT_WINDOW_SIZE;
use crate::alerts::rules::{DEFAULT_HEART_RATE_MAX, DEFAULT_SPO2_MIN, DEFAULT_TEMPERATURE_MAX};
use crate::alerts::{TemperatureRule, VitalsRule};
use crate::cipher::PayloadCipher;
use crate::error::ConfigError;
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application configuration
///
/// Every section is optional in the TOML file; missing sections and fields
/// take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub polling: PollingConfig,
    pub thresholds: ThresholdConfig,
    pub report: ReportConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

/// Telemetry store connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Full `_all_docs?include_docs=true` URL
    pub url: String,
    pub username: String,
    pub password: String,
    pub timeout_seconds: u64,
    /// Hex AES-128 key for encrypted SpO2 values; set together with `spo2_iv`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spo2_key: Option<String>,
    /// Hex CBC initialization vector for encrypted SpO2 values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spo2_iv: Option<String>,
}

/// Live polling settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_ms: u64,
    pub window_size: usize,
}

/// Alert thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThresholdConfig {
    pub heart_rate_max: f64,
    pub spo2_min: f64,
    pub temperature_max: f64,
}

/// Reporting timezone as a fixed offset from UTC
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReportConfig {
    pub utc_offset_minutes: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:5984/mychannel_asset-transfer/_all_docs?include_docs=true"
                .to_string(),
            username: "admin".to_string(),
            password: "admin".to_string(),
            timeout_seconds: 10,
            spo2_key: None,
            spo2_iv: None,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            heart_rate_max: DEFAULT_HEART_RATE_MAX,
            spo2_min: DEFAULT_SPO2_MIN,
            temperature_max: DEFAULT_TEMPERATURE_MAX,
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read,
    /// `ConfigError::TomlError` if it is not valid TOML for this schema and
    /// `ConfigError::ValidationError` if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that all values are usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "server.port must be non-zero".to_string(),
            ));
        }
        if self.telemetry.url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "telemetry.url must not be empty".to_string(),
            ));
        }
        if self.telemetry.timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "telemetry.timeout_seconds must be greater than 0".to_string(),
            ));
        }
        self.spo2_cipher()?;
        if self.polling.interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "polling.interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.polling.window_size == 0 {
            return Err(ConfigError::ValidationError(
                "polling.window_size must be at least 1".to_string(),
            ));
        }
        let thresholds = [
            ("thresholds.heart_rate_max", self.thresholds.heart_rate_max),
            ("thresholds.spo2_min", self.thresholds.spo2_min),
            ("thresholds.temperature_max", self.thresholds.temperature_max),
        ];
        for (name, value) in thresholds {
            if !value.is_finite() {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be a finite number",
                    name
                )));
            }
        }
        if self.report.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(ConfigError::ValidationError(format!(
                "report.utc_offset_minutes must be within ±1439, got {}",
                self.report.utc_offset_minutes
            )));
        }
        Ok(())
    }

    /// Address the HTTP server binds to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.polling.interval_ms)
    }

    pub fn telemetry_timeout(&self) -> Duration {
        Duration::from_secs(self.telemetry.timeout_seconds)
    }

    /// Reporting offset; UTC if the configured value is out of range
    pub fn report_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.report.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    /// Cipher for encrypted SpO2 values, `None` when no key is configured
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if only one of `spo2_key` and
    /// `spo2_iv` is set, and `ConfigError::CipherError` if either is not
    /// 16 bytes of hex.
    pub fn spo2_cipher(&self) -> Result<Option<PayloadCipher>, ConfigError> {
        match (&self.telemetry.spo2_key, &self.telemetry.spo2_iv) {
            (None, None) => Ok(None),
            (Some(key), Some(iv)) => Ok(Some(PayloadCipher::from_hex(key, iv)?)),
            _ => Err(ConfigError::ValidationError(
                "telemetry.spo2_key and telemetry.spo2_iv must be set together".to_string(),
            )),
        }
    }

    pub fn vitals_rule(&self) -> VitalsRule {
        VitalsRule::new(self.thresholds.heart_rate_max, self.thresholds.spo2_min)
    }

    pub fn temperature_rule(&self) -> TemperatureRule {
        TemperatureRule::new(self.thresholds.temperature_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.polling.interval_ms, 1000);
        assert_eq!(config.polling.window_size, 20);
        assert_eq!(config.thresholds.heart_rate_max, 100.0);
        assert_eq!(config.thresholds.spo2_min, 94.0);
        assert_eq!(config.thresholds.temperature_max, 28.0);
        assert_eq!(config.report_offset(), FixedOffset::east_opt(0).unwrap());
        assert_eq!(config.bind_address(), "0.0.0.0:5000");
        assert!(config.validate().is_ok());
        assert!(config.spo2_cipher().unwrap().is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [polling]
            interval_ms = 250

            [report]
            utc_offset_minutes = 330
            "#,
        )
        .unwrap();

        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.polling.window_size, 20);
        assert_eq!(config.server.port, 5000);
        assert_eq!(
            config.report_offset(),
            FixedOffset::east_opt(330 * 60).unwrap()
        );
    }

    #[test]
    fn test_full_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [server]
            bind = "127.0.0.1"
            port = 8080

            [telemetry]
            url = "http://db:5984/vitals/_all_docs?include_docs=true"
            username = "reader"
            password = "secret"
            timeout_seconds = 3

            [thresholds]
            heart_rate_max = 120.0
            spo2_min = 90.0
            temperature_max = 38.0
            "#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
        assert_eq!(config.telemetry.username, "reader");
        assert_eq!(config.telemetry_timeout(), Duration::from_secs(3));
        assert_eq!(config.vitals_rule(), VitalsRule::new(120.0, 90.0));
        assert_eq!(config.temperature_rule(), TemperatureRule::new(38.0));
    }

    #[test]
    fn test_spo2_cipher_settings() {
        let config = Config::from_toml_str(
            r#"
            [telemetry]
            spo2_key = "000102030405060708090a0b0c0d0e0f"
            spo2_iv = "00000000000000000000000000000000"
            "#,
        )
        .unwrap();

        let cipher = config.spo2_cipher().unwrap().unwrap();
        assert_eq!(cipher.decrypt("eZkUGhmfEli3M6fDWDxSKA==").unwrap(), "97");

        let half = Config::from_toml_str(
            "[telemetry]\nspo2_key = \"000102030405060708090a0b0c0d0e0f\"",
        );
        assert!(matches!(half, Err(ConfigError::ValidationError(_))));

        let short = Config::from_toml_str("[telemetry]\nspo2_key = \"0001\"\nspo2_iv = \"0001\"");
        assert!(matches!(short, Err(ConfigError::CipherError(_))));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let result = Config::from_file(Path::new("/nonexistent/vitals.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError(_))));
    }

    #[test]
    fn test_malformed_toml() {
        let result = Config::from_toml_str("[polling\ninterval_ms = 1");
        assert!(matches!(result, Err(ConfigError::TomlError(_))));

        let result = Config::from_toml_str("[polling]\ninterval_ms = \"fast\"");
        assert!(matches!(result, Err(ConfigError::TomlError(_))));
    }

    #[test]
    fn test_validation_errors() {
        for contents in [
            "[server]\nport = 0",
            "[polling]\ninterval_ms = 0",
            "[polling]\nwindow_size = 0",
            "[telemetry]\nurl = \"  \"",
            "[telemetry]\ntimeout_seconds = 0",
            "[thresholds]\nspo2_min = nan",
            "[report]\nutc_offset_minutes = 1440",
        ] {
            let result = Config::from_toml_str(contents);
            assert!(
                matches!(result, Err(ConfigError::ValidationError(_))),
                "expected validation error for {:?}",
                contents
            );
        }
    }
}
