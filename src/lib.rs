/// Error types for the vitals monitor
pub mod error;

/// AES-128-CBC decryption of encrypted sensor payloads
pub mod cipher;

/// Reading type and telemetry document decoding
pub mod readings;

/// Telemetry sources (CouchDB and scripted mock)
pub mod telemetry;

/// Daily summaries and the rolling live window
pub mod aggregator;

/// Threshold alert rules
pub mod alerts;

/// CSV export
pub mod export;

/// Periodic poller feeding the live window
pub mod poller;

/// HTTP API
pub mod server;

/// Configuration management
pub mod config;

// Re-export commonly used types
pub use error::{ApiError, CipherError, ConfigError, ExportError, ServerError, TelemetryError};
pub use readings::Reading;
