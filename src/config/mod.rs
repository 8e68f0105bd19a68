/// TOML-backed settings with per-section defaults
pub mod settings;

pub use settings::{
    Config, PollingConfig, ReportConfig, ServerConfig, TelemetryConfig, ThresholdConfig,
};
