/// Threshold alert rules
pub mod rules;

pub use rules::{detect_alerts, filter_alerts, AlertRule, TemperatureRule, VitalsRule};
