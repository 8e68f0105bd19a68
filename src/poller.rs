//! Polling client that keeps a live window of recent readings
//!
//! While polling, a ticker fires every `interval` and each tick issues one
//! fetch against the telemetry source. Fetches are never awaited by the
//! ticker, so slow responses may overlap. Every fetch carries a sequence
//! number and a response is applied only if it is newer than the last applied
//! one, so overlapping responses can never land out of order.

use crate::aggregator::{FieldStats, RecentWindow};
use crate::readings::Reading;
use crate::telemetry::TelemetrySource;
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Default polling period
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Lifecycle state of the poller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollState {
    /// No ticker running
    Idle,
    /// Ticker scheduled
    Polling,
}

/// What happened to the response of one fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Batch appended to the window
    Applied { added: usize, evicted: usize },
    /// A newer response was already applied, or the poller was stopped
    Stale,
    /// The fetch failed; the window is unchanged
    Failed,
}

/// Counters over the poller's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollStats {
    pub applied: u64,
    pub failed: u64,
    pub discarded: u64,
}

/// Window contents and live statistics for display
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveView {
    pub state: PollState,
    pub capacity: usize,
    pub readings: Vec<Reading>,
    pub heart_rate: Option<FieldStats>,
    pub spo2: Option<FieldStats>,
}

/// Window plus the sequence number of the last applied response
struct WindowState {
    window: RecentWindow,
    applied_seq: u64,
}

/// State shared between the poller handle, its ticker and fetch tasks
struct PollCore {
    source: Arc<dyn TelemetrySource>,
    state: Mutex<WindowState>,
    next_seq: AtomicU64,
    applied: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
}

impl PollCore {
    fn lock_state(&self) -> MutexGuard<'_, WindowState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reserve the sequence number for a new fetch
    fn begin(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Reserve a sequence number, then fetch and apply
    async fn poll_once(&self) -> PollOutcome {
        let seq = self.begin();
        self.fetch_and_apply(seq).await
    }

    /// Fetch under an already reserved sequence number and apply the result
    async fn fetch_and_apply(&self, seq: u64) -> PollOutcome {
        let result = self.source.fetch().await;

        match result {
            Ok(batch) => self.apply(seq, batch),
            Err(e) => {
                warn!("Polling {} failed, skipping tick: {}", self.source.name(), e);
                self.failed.fetch_add(1, Ordering::Relaxed);
                PollOutcome::Failed
            }
        }
    }

    fn apply(&self, seq: u64, batch: Vec<Reading>) -> PollOutcome {
        // Check and update under one lock so two responses cannot both pass
        let mut state = self.lock_state();

        if seq <= state.applied_seq {
            debug!(
                "Discarding stale response #{} (already applied #{})",
                seq, state.applied_seq
            );
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return PollOutcome::Stale;
        }

        state.applied_seq = seq;
        let added = batch.len();
        let evicted = state.window.push_batch(batch);
        self.applied.fetch_add(1, Ordering::Relaxed);

        debug!(
            "Applied response #{}: {} readings added, {} evicted, window holds {}",
            seq,
            added,
            evicted,
            state.window.len()
        );
        PollOutcome::Applied { added, evicted }
    }

    /// Make every fetch issued so far stale
    fn invalidate_in_flight(&self) {
        let issued = self.next_seq.load(Ordering::SeqCst);
        let mut state = self.lock_state();
        state.applied_seq = state.applied_seq.max(issued);
    }
}

/// Running ticker task and the channel that stops it
struct Ticker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Periodic telemetry poller feeding a `RecentWindow`
///
/// The poller starts `Idle`. `start` schedules the ticker (the first fetch
/// fires immediately) and `stop` cancels it. Stopping does not abort a fetch
/// that is already in flight, but its response is discarded.
pub struct Poller {
    core: Arc<PollCore>,
    interval: Duration,
    ticker: Mutex<Option<Ticker>>,
}

impl Poller {
    /// Create an idle poller
    ///
    /// # Arguments
    ///
    /// * `source` - Telemetry source to fetch from
    /// * `interval` - Period between fetches
    /// * `window_size` - Number of recent readings to keep
    pub fn new(source: Arc<dyn TelemetrySource>, interval: Duration, window_size: usize) -> Self {
        Self {
            core: Arc::new(PollCore {
                source,
                state: Mutex::new(WindowState {
                    window: RecentWindow::new(window_size),
                    applied_seq: 0,
                }),
                next_seq: AtomicU64::new(0),
                applied: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
            }),
            interval,
            ticker: Mutex::new(None),
        }
    }

    fn lock_ticker(&self) -> MutexGuard<'_, Option<Ticker>> {
        self.ticker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move from `Idle` to `Polling`
    ///
    /// Must be called from within a tokio runtime. Returns `false` if the
    /// poller was already polling.
    pub fn start(&self) -> bool {
        let mut ticker = self.lock_ticker();
        if ticker.is_some() {
            debug!("Poller already running, skipping start");
            return false;
        }

        // Create the shutdown channel and hand the ticker its own core handle
        let (shutdown, shutdown_rx) = watch::channel(false);
        let core = Arc::clone(&self.core);
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            Self::ticker_loop(core, interval, shutdown_rx).await;
        });

        *ticker = Some(Ticker { shutdown, handle });
        info!(
            "Poller started: source={}, interval={:?}",
            self.core.source.name(),
            self.interval
        );
        true
    }

    /// Move from `Polling` to `Idle`
    ///
    /// Waits for the ticker to exit. Returns `false` if the poller was idle.
    pub async fn stop(&self) -> bool {
        let ticker = self.lock_ticker().take();

        let Some(ticker) = ticker else {
            debug!("Poller already stopped");
            return false;
        };

        // Signal the ticker and wait until it can no longer issue fetches
        let _ = ticker.shutdown.send(true);
        if let Err(e) = ticker.handle.await {
            warn!("Poller ticker task ended abnormally: {}", e);
        }

        // Every sequence the ticker issued is now known; none of them may apply
        self.core.invalidate_in_flight();

        info!("Poller stopped");
        true
    }

    pub fn state(&self) -> PollState {
        if self.lock_ticker().is_some() {
            PollState::Polling
        } else {
            PollState::Idle
        }
    }

    /// Perform a single fetch and apply it, independent of the ticker
    pub async fn tick(&self) -> PollOutcome {
        self.core.poll_once().await
    }

    /// Readings currently in the window, oldest first
    pub fn readings(&self) -> Vec<Reading> {
        self.core.lock_state().window.readings()
    }

    /// Window contents with live heart rate and SpO2 statistics
    pub fn snapshot(&self) -> LiveView {
        let state = self.state();
        let guard = self.core.lock_state();

        LiveView {
            state,
            capacity: guard.window.capacity(),
            readings: guard.window.readings(),
            heart_rate: guard.window.heart_rate_stats(),
            spo2: guard.window.spo2_stats(),
        }
    }

    pub fn stats(&self) -> PollStats {
        PollStats {
            applied: self.core.applied.load(Ordering::Relaxed),
            failed: self.core.failed.load(Ordering::Relaxed),
            discarded: self.core.discarded.load(Ordering::Relaxed),
        }
    }

    async fn ticker_loop(core: Arc<PollCore>, period: Duration, mut shutdown: watch::Receiver<bool>) {
        // First tick completes immediately
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    // Reserve the sequence here, not in the task, so stop() sees it
                    let seq = core.begin();
                    let core = Arc::clone(&core);

                    // Fire and forget; slow fetches may overlap
                    tokio::spawn(async move {
                        core.fetch_and_apply(seq).await;
                    });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("Poller ticker exited");
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if let Some(ticker) = self.lock_ticker().take() {
            let _ = ticker.shutdown.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::MockSource;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    fn batch(start: i64, len: i64) -> Vec<Reading> {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (start..start + len)
            .map(|n| Reading::new(base + ChronoDuration::seconds(n), 60.0 + n as f64, 97.0))
            .collect()
    }

    fn poller_with(source: MockSource, interval_ms: u64, window_size: usize) -> Poller {
        Poller::new(Arc::new(source), Duration::from_millis(interval_ms), window_size)
    }

    #[tokio::test]
    async fn test_tick_appends_and_bounds_window() {
        let source = MockSource::with_responses(vec![
            Ok(batch(0, 15)),
            Ok(batch(15, 15)),
            Ok(batch(30, 15)),
        ]);
        let poller = poller_with(source, 1000, 20);

        assert_eq!(
            poller.tick().await,
            PollOutcome::Applied { added: 15, evicted: 0 }
        );
        assert_eq!(
            poller.tick().await,
            PollOutcome::Applied { added: 15, evicted: 10 }
        );
        poller.tick().await;

        let readings = poller.readings();
        assert_eq!(readings.len(), 20);
        assert_eq!(readings, batch(25, 20));
        assert_eq!(poller.stats().applied, 3);
    }

    #[tokio::test]
    async fn test_failed_tick_leaves_window_unchanged() {
        let source = MockSource::with_responses(vec![
            Ok(batch(0, 3)),
            Err("connection refused".to_string()),
            Ok(batch(3, 2)),
        ]);
        let poller = poller_with(source, 1000, 20);

        poller.tick().await;
        assert_eq!(poller.tick().await, PollOutcome::Failed);
        assert_eq!(poller.readings(), batch(0, 3));

        poller.tick().await;
        assert_eq!(poller.readings(), batch(0, 5));

        let stats = poller.stats();
        assert_eq!(stats.applied, 2);
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn test_older_response_is_discarded() {
        let poller = poller_with(MockSource::with_batch(Vec::new()), 1000, 20);

        let first = poller.core.begin();
        let second = poller.core.begin();

        assert_eq!(
            poller.core.apply(second, batch(10, 2)),
            PollOutcome::Applied { added: 2, evicted: 0 }
        );
        assert_eq!(poller.core.apply(first, batch(0, 2)), PollOutcome::Stale);

        assert_eq!(poller.readings(), batch(10, 2));
        assert_eq!(poller.stats().discarded, 1);
    }

    #[tokio::test]
    async fn test_overlapping_fetches_apply_in_order() {
        // The first fetch is slow and completes after the second one
        let source = MockSource::with_responses(vec![Ok(batch(0, 2)), Ok(batch(2, 2))])
            .with_delays(vec![Duration::from_millis(100), Duration::from_millis(10)]);
        let poller = poller_with(source, 1000, 20);

        let (slow, fast) = tokio::join!(poller.tick(), poller.tick());

        assert_eq!(slow, PollOutcome::Stale);
        assert_eq!(fast, PollOutcome::Applied { added: 2, evicted: 0 });
        assert_eq!(poller.readings(), batch(2, 2));
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let source = MockSource::with_batch(batch(0, 1));
        let calls = source.clone();
        let poller = poller_with(source, 20, 20);

        assert_eq!(poller.state(), PollState::Idle);
        assert!(poller.start());
        assert!(!poller.start());
        assert_eq!(poller.state(), PollState::Polling);

        tokio::time::sleep(Duration::from_millis(110)).await;
        assert!(poller.stop().await);
        assert!(!poller.stop().await);
        assert_eq!(poller.state(), PollState::Idle);

        // Let a fetch spawned by the last tick settle
        tokio::time::sleep(Duration::from_millis(20)).await;
        let calls_at_stop = calls.call_count();
        assert!(calls_at_stop >= 2, "expected several ticks, got {}", calls_at_stop);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(calls.call_count(), calls_at_stop);
        assert!(poller.readings().len() <= 20);
    }

    #[tokio::test]
    async fn test_first_fetch_fires_immediately() {
        let source = MockSource::with_batch(batch(0, 1));
        let calls = source.clone();
        let poller = poller_with(source, 10_000, 20);

        poller.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.call_count(), 1);
        assert_eq!(poller.readings().len(), 1);
        poller.stop().await;
    }

    #[tokio::test]
    async fn test_in_flight_response_discarded_after_stop() {
        let source = MockSource::with_batch(batch(0, 3)).with_delay(Duration::from_millis(100));
        let poller = poller_with(source, 10_000, 20);

        poller.start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        poller.stop().await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(poller.readings().is_empty());
        assert_eq!(poller.stats().discarded, 1);
    }

    #[tokio::test]
    async fn test_fetch_spawned_just_before_stop_is_discarded() {
        let source = MockSource::with_batch(batch(0, 3)).with_delay(Duration::from_millis(30));
        let calls = source.clone();
        let poller = poller_with(source, 10_000, 20);

        poller.start();
        // Let the ticker fire its first tick without running the fetch task
        tokio::task::yield_now().await;
        poller.stop().await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(poller.readings().is_empty());
        assert_eq!(poller.stats().applied, 0);
        assert_eq!(poller.stats().discarded as usize, calls.call_count());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_nothing_applies_after_stop_returns() {
        let mut late_applies = 0;

        for _ in 0..200 {
            let source = MockSource::with_batch(batch(0, 1))
                .with_delays(vec![Duration::ZERO, Duration::from_millis(2)]);
            let poller = poller_with(source, 1, 20);

            poller.start();
            tokio::time::sleep(Duration::from_millis(3)).await;
            poller.stop().await;

            let applied_at_stop = poller.stats().applied;
            tokio::time::sleep(Duration::from_millis(5)).await;
            if poller.stats().applied != applied_at_stop {
                late_applies += 1;
            }
        }

        assert_eq!(late_applies, 0);
    }

    #[tokio::test]
    async fn test_restart_after_stop_applies_again() {
        let poller = poller_with(MockSource::with_batch(batch(0, 2)), 10_000, 20);

        poller.start();
        tokio::time::sleep(Duration::from_millis(30)).await;
        poller.stop().await;
        let applied = poller.stats().applied;

        poller.start();
        tokio::time::sleep(Duration::from_millis(30)).await;
        poller.stop().await;
        assert_eq!(poller.stats().applied, applied + 1);
    }

    #[tokio::test]
    async fn test_snapshot() {
        let poller = poller_with(MockSource::with_batch(batch(0, 3)), 1000, 20);

        let empty = poller.snapshot();
        assert_eq!(empty.state, PollState::Idle);
        assert!(empty.readings.is_empty());
        assert_eq!(empty.heart_rate, None);

        poller.tick().await;
        let view = poller.snapshot();
        assert_eq!(view.capacity, 20);
        assert_eq!(view.readings.len(), 3);
        assert_eq!(view.heart_rate.unwrap().avg, 61.0);
        assert_eq!(view.spo2.unwrap().min, 97.0);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["state"], "idle");
        assert_eq!(json["heartRate"]["max"], 62.0);
    }
}
