//! Threshold alert rules
//!
//! Two independent rules exist: one on heart rate and SpO2, one on body
//! temperature. They back separate endpoints.

use crate::readings::Reading;

/// Default upper heart-rate bound in bpm; readings above it alert
pub const DEFAULT_HEART_RATE_MAX: f64 = 100.0;
/// Default lower SpO2 bound in percent; readings below it alert
pub const DEFAULT_SPO2_MIN: f64 = 94.0;
/// Default upper temperature bound in °C; readings above it alert
pub const DEFAULT_TEMPERATURE_MAX: f64 = 28.0;

/// A predicate that flags a single reading
pub trait AlertRule: Send + Sync {
    /// Whether this reading breaches the rule
    fn matches(&self, reading: &Reading) -> bool;

    /// Human-readable rule name
    fn name(&self) -> &str;
}

/// Flags readings with a high heart rate or low oxygen saturation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VitalsRule {
    /// Heart rates strictly above this value alert
    pub heart_rate_max: f64,
    /// SpO2 values strictly below this value alert
    pub spo2_min: f64,
}

impl VitalsRule {
    pub fn new(heart_rate_max: f64, spo2_min: f64) -> Self {
        Self {
            heart_rate_max,
            spo2_min,
        }
    }

    /// Heart rate above 100 bpm or SpO2 below 94%
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_HEART_RATE_MAX, DEFAULT_SPO2_MIN)
    }

    pub fn heart_rate_high(&self, reading: &Reading) -> bool {
        reading.heart_rate > self.heart_rate_max
    }

    pub fn spo2_low(&self, reading: &Reading) -> bool {
        reading.spo2 < self.spo2_min
    }
}

impl Default for VitalsRule {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl AlertRule for VitalsRule {
    fn matches(&self, reading: &Reading) -> bool {
        self.heart_rate_high(reading) || self.spo2_low(reading)
    }

    fn name(&self) -> &str {
        "VitalsRule"
    }
}

/// Flags readings with a high body temperature
///
/// Readings without a temperature never match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureRule {
    /// Temperatures strictly above this value alert
    pub temperature_max: f64,
}

impl TemperatureRule {
    pub fn new(temperature_max: f64) -> Self {
        Self { temperature_max }
    }

    /// Temperature above 28 °C
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_TEMPERATURE_MAX)
    }
}

impl Default for TemperatureRule {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl AlertRule for TemperatureRule {
    fn matches(&self, reading: &Reading) -> bool {
        reading
            .temperature
            .is_some_and(|temperature| temperature > self.temperature_max)
    }

    fn name(&self) -> &str {
        "TemperatureRule"
    }
}

/// Readings matched by `rule`, in input order, duplicates kept
pub fn filter_alerts<R: AlertRule + ?Sized>(rule: &R, readings: &[Reading]) -> Vec<Reading> {
    readings
        .iter()
        .filter(|reading| rule.matches(reading))
        .cloned()
        .collect()
}

/// Readings with heart rate above 100 or SpO2 below 94
pub fn detect_alerts(readings: &[Reading]) -> Vec<Reading> {
    filter_alerts(&VitalsRule::with_defaults(), readings)
}
