use crate::cipher::PayloadCipher;
use crate::error::TelemetryError;
use crate::readings::{decode_documents, Reading};
use crate::telemetry::TelemetrySource;
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Telemetry source backed by a CouchDB database
///
/// Issues `GET <url>` with basic-auth credentials, where `url` points at an
/// `_all_docs?include_docs=true` view, and decodes the embedded documents.
pub struct CouchDbSource {
    client: Client,
    url: String,
    username: String,
    password: String,
    cipher: Option<PayloadCipher>,
}

/// Response format of `_all_docs`
#[derive(Debug, Deserialize)]
struct AllDocsResponse {
    rows: Vec<AllDocsRow>,
}

/// One row of `_all_docs`; `doc` is only present with `include_docs=true`
#[derive(Debug, Deserialize)]
struct AllDocsRow {
    #[serde(default)]
    doc: Option<Value>,
}

impl CouchDbSource {
    /// Create a new CouchDB source
    ///
    /// # Arguments
    /// * `url` - Full `_all_docs` URL including `include_docs=true`
    /// * `username` - Basic-auth user
    /// * `password` - Basic-auth password
    /// * `timeout` - Per-request timeout
    ///
    /// # Errors
    ///
    /// Returns `TelemetryError::HttpError` if the HTTP client cannot be built.
    pub fn new(
        url: String,
        username: String,
        password: String,
        timeout: Duration,
    ) -> Result<Self, TelemetryError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url,
            username,
            password,
            cipher: None,
        })
    }

    /// Decrypt encrypted SpO2 values with the given cipher
    pub fn with_cipher(mut self, cipher: PayloadCipher) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn decrypts_spo2(&self) -> bool {
        self.cipher.is_some()
    }

    /// Extract the documents from an `_all_docs` body
    ///
    /// Rows without an embedded document are skipped.
    fn parse_all_docs(body: &str) -> Result<Vec<Value>, TelemetryError> {
        let response: AllDocsResponse = serde_json::from_str(body).map_err(|e| {
            TelemetryError::InvalidResponse(format!("Failed to parse _all_docs response: {}", e))
        })?;

        Ok(response.rows.into_iter().filter_map(|row| row.doc).collect())
    }
}

impl TelemetrySource for CouchDbSource {
    fn fetch<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Reading>, TelemetryError>> + Send + 'a>> {
        Box::pin(async move {
            let response = self
                .client
                .get(&self.url)
                .basic_auth(&self.username, Some(&self.password))
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(TelemetryError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            let body = response.text().await?;
            let docs = Self::parse_all_docs(&body)?;
            debug!("Fetched {} documents from {}", docs.len(), self.url);

            Ok(decode_documents(&docs, self.cipher.as_ref()))
        })
    }

    fn name(&self) -> &str {
        "couchdb"
    }
}
