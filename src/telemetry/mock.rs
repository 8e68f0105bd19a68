use crate::error::TelemetryError;
use crate::readings::Reading;
use crate::telemetry::TelemetrySource;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted telemetry source
///
/// Responses are returned in order and cycle after the last one. An `Err`
/// entry produces `TelemetryError::Unavailable` with that message. Optional
/// per-call delays cycle the same way and let tests control completion order.
#[derive(Clone)]
pub struct MockSource {
    responses: Arc<Vec<Result<Vec<Reading>, String>>>,
    delays: Arc<Vec<Duration>>,
    call_count: Arc<Mutex<usize>>,
}

impl MockSource {
    /// Always return the same batch
    ///
    /// # Example
    /// ```
    /// use vitals::telemetry::MockSource;
    ///
    /// let source = MockSource::with_batch(Vec::new());
    /// assert_eq!(source.call_count(), 0);
    /// ```
    pub fn with_batch(batch: Vec<Reading>) -> Self {
        Self::with_responses(vec![Ok(batch)])
    }

    /// Return the given responses in order, cycling after the last
    pub fn with_responses(responses: Vec<Result<Vec<Reading>, String>>) -> Self {
        Self {
            responses: Arc::new(responses),
            delays: Arc::new(Vec::new()),
            call_count: Arc::new(Mutex::new(0)),
        }
    }

    /// Always fail with the given message
    pub fn failing(message: &str) -> Self {
        Self::with_responses(vec![Err(message.to_string())])
    }

    /// Delay every response by the same amount
    pub fn with_delay(self, delay: Duration) -> Self {
        self.with_delays(vec![delay])
    }

    /// Delay the n-th call by `delays[n % delays.len()]`
    pub fn with_delays(mut self, delays: Vec<Duration>) -> Self {
        self.delays = Arc::new(delays);
        self
    }

    /// Number of times `fetch` has been called
    pub fn call_count(&self) -> usize {
        self.call_count.lock().map(|count| *count).unwrap_or(0)
    }

    fn next_call(&self) -> usize {
        match self.call_count.lock() {
            Ok(mut count) => {
                let call = *count;
                *count += 1;
                call
            }
            Err(_) => 0,
        }
    }
}

impl TelemetrySource for MockSource {
    fn fetch<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Reading>, TelemetryError>> + Send + 'a>> {
        let call = self.next_call();

        Box::pin(async move {
            if !self.delays.is_empty() {
                tokio::time::sleep(self.delays[call % self.delays.len()]).await;
            }

            if self.responses.is_empty() {
                return Ok(Vec::new());
            }

            match &self.responses[call % self.responses.len()] {
                Ok(batch) => Ok(batch.clone()),
                Err(message) => Err(TelemetryError::Unavailable(message.clone())),
            }
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}
