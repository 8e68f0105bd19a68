use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::error;
use serde_json::json;
use thiserror::Error;

/// Errors that can occur while reading from the telemetry store
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Telemetry store returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Telemetry source unavailable: {0}")]
    Unavailable(String),
}

/// Errors that can occur while decrypting a sensor payload
#[derive(Error, Debug)]
pub enum CipherError {
    #[error("Invalid Base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Ciphertext length {0} is not a whole number of blocks")]
    BlockLength(usize),

    #[error("Invalid PKCS7 padding")]
    Padding,

    #[error("Decrypted payload is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Invalid {name}: {reason}")]
    InvalidKey { name: &'static str, reason: String },
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid SpO2 cipher settings: {0}")]
    CipherError(#[from] CipherError),
}

/// Errors that can occur when writing a CSV export
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors that can occur while running the HTTP server
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Errors returned by HTTP handlers
///
/// The display text is what clients see; the underlying cause is only logged.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Failed to fetch data")]
    FetchData(#[source] TelemetryError),

    #[error("Failed to fetch alerts")]
    FetchAlerts(#[source] TelemetryError),

    #[error("Failed to fetch vitals alerts")]
    FetchVitalsAlerts(#[source] TelemetryError),
}

impl ApiError {
    pub fn cause(&self) -> &TelemetryError {
        match self {
            ApiError::FetchData(e) | ApiError::FetchAlerts(e) | ApiError::FetchVitalsAlerts(e) => e,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("{}: {}", self, self.cause());

        let body = Json(json!({ "error": self.to_string() }));
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}
