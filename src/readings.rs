//! Core reading type for the vitals monitor
//!
//! A `Reading` is one sensor sample as stored in the telemetry document store.
//! Documents are decoded leniently: a document that lacks a usable timestamp,
//! heart rate or SpO2 value is rejected and skipped instead of failing the
//! whole batch. With a `PayloadCipher`, an SpO2 value sent as an encrypted
//! string is decrypted before it is parsed.

use crate::cipher::PayloadCipher;
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// A single vitals sample from the telemetry source
///
/// Field names on the wire follow the store documents (`Timestamp`,
/// `HeartRate`, `SpO2`, `Temperature`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    /// When the sensor captured the sample
    #[serde(rename = "Timestamp")]
    pub timestamp: Timestamp,
    /// Heart rate in beats per minute
    #[serde(rename = "HeartRate")]
    pub heart_rate: f64,
    /// Blood oxygen saturation in percent
    #[serde(rename = "SpO2")]
    pub spo2: f64,
    /// Body temperature in °C, absent when the sensor did not report one
    #[serde(
        rename = "Temperature",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub temperature: Option<f64>,
}

/// Why a store document could not be turned into a `Reading`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The field is absent or null
    MissingField(&'static str),
    /// The field is present but not a usable value
    InvalidField(&'static str),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::MissingField(field) => write!(f, "missing field {}", field),
            RejectReason::InvalidField(field) => write!(f, "invalid field {}", field),
        }
    }
}

const TIMESTAMP: &str = "Timestamp";
const HEART_RATE: &str = "HeartRate";
const SPO2: &str = "SpO2";
const TEMPERATURE: &str = "Temperature";

impl Reading {
    /// Create a reading without a temperature value
    pub fn new(timestamp: Timestamp, heart_rate: f64, spo2: f64) -> Self {
        Self {
            timestamp,
            heart_rate,
            spo2,
            temperature: None,
        }
    }

    /// Attach a temperature value
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Decode a raw store document
    ///
    /// `Timestamp` may be an RFC 3339 string or epoch milliseconds. Numeric
    /// fields may be JSON numbers or numeric strings and must be finite.
    /// An unusable `Temperature` is dropped rather than rejecting the reading.
    pub fn from_document(doc: &Value) -> Result<Self, RejectReason> {
        Self::decode(doc, None)
    }

    /// Decode a raw store document, decrypting an encrypted `SpO2` string
    /// when a cipher is given
    pub fn decode(doc: &Value, cipher: Option<&PayloadCipher>) -> Result<Self, RejectReason> {
        let timestamp = timestamp_field(doc, TIMESTAMP)?;
        let heart_rate = number_field(doc, HEART_RATE)?;
        let spo2 = match (number_field(doc, SPO2), cipher) {
            (Err(RejectReason::InvalidField(_)), Some(cipher)) => {
                encrypted_number_field(doc, SPO2, cipher)?
            }
            (result, _) => result?,
        };

        let temperature = match number_field(doc, TEMPERATURE) {
            Ok(value) => Some(value),
            Err(RejectReason::MissingField(_)) => None,
            Err(reason) => {
                debug!("Ignoring temperature of reading at {}: {}", timestamp, reason);
                None
            }
        };

        Ok(Self {
            timestamp,
            heart_rate,
            spo2,
            temperature,
        })
    }
}

/// Decode a batch of store documents, skipping malformed ones
///
/// Order of the surviving readings follows the input order.
pub fn decode_documents(docs: &[Value], cipher: Option<&PayloadCipher>) -> Vec<Reading> {
    let mut rejected = 0;
    let readings: Vec<Reading> = docs
        .iter()
        .filter_map(|doc| match Reading::decode(doc, cipher) {
            Ok(reading) => Some(reading),
            Err(reason) => {
                rejected += 1;
                debug!("Skipping malformed telemetry document: {}", reason);
                None
            }
        })
        .collect();

    if rejected > 0 {
        warn!(
            "Excluded {} malformed of {} telemetry documents",
            rejected,
            docs.len()
        );
    }

    readings
}

fn timestamp_field(doc: &Value, key: &'static str) -> Result<Timestamp, RejectReason> {
    match doc.get(key) {
        None | Some(Value::Null) => Err(RejectReason::MissingField(key)),
        Some(Value::String(text)) => DateTime::parse_from_rfc3339(text.trim())
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(|_| RejectReason::InvalidField(key)),
        Some(Value::Number(number)) => number
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
            .ok_or(RejectReason::InvalidField(key)),
        Some(_) => Err(RejectReason::InvalidField(key)),
    }
}

fn number_field(doc: &Value, key: &'static str) -> Result<f64, RejectReason> {
    let value = match doc.get(key) {
        None | Some(Value::Null) => return Err(RejectReason::MissingField(key)),
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        Some(_) => None,
    };

    value
        .filter(|v| v.is_finite())
        .ok_or(RejectReason::InvalidField(key))
}

fn encrypted_number_field(
    doc: &Value,
    key: &'static str,
    cipher: &PayloadCipher,
) -> Result<f64, RejectReason> {
    let payload = doc
        .get(key)
        .and_then(Value::as_str)
        .ok_or(RejectReason::InvalidField(key))?;

    let plaintext = cipher.decrypt(payload).map_err(|e| {
        debug!("Cannot decrypt {}: {}", key, e);
        RejectReason::InvalidField(key)
    })?;

    plaintext
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or(RejectReason::InvalidField(key))
}
