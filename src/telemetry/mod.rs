use crate::error::TelemetryError;
use crate::readings::Reading;
use std::future::Future;
use std::pin::Pin;

/// CouchDB `_all_docs` reader
pub mod couchdb;

/// Scripted source for tests and offline runs
pub mod mock;

pub use couchdb::CouchDbSource;
pub use mock::MockSource;

/// A read-only feed of vitals readings
///
/// Each call fetches one full batch. Malformed documents are already
/// excluded from the returned readings.
pub trait TelemetrySource: Send + Sync {
    fn fetch<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Reading>, TelemetryError>> + Send + 'a>>;

    /// Short name used in log lines
    fn name(&self) -> &str;
}
