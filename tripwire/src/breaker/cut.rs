//! Three-state cut breaker.
//!
//! Closed until the windowed error rate crosses the threshold, then
//! open for the sleep window, then half-open: exactly one probe call
//! is admitted, and its outcome decides between closing the breaker
//! (with a fresh window) and re-opening it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use twr_core::{DEFAULT_TIME_WINDOW, Metric, MetricConfig, MetricSummary, Result, TripwireError};

use super::{BreakerSummary, CLOSED, HALF_OPEN, OPEN};

/// Tuning for a [`CutBreaker`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CutBreakerConfig {
    /// Sliding-window size; whole seconds in `[1s, 60s]`.
    #[serde(default = "default_time_window")]
    pub time_window: Duration,
    /// Calls required in the window before the error rate is consulted.
    #[serde(default = "default_min_request_threshold")]
    pub min_request_threshold: u64,
    /// Error percentage (0-100) at which the breaker trips.
    #[serde(default = "default_error_threshold_percentage")]
    pub error_threshold_percentage: f64,
    /// How long the breaker stays open before admitting a probe.
    #[serde(default = "default_sleep_window")]
    pub sleep_window: Duration,
    /// Optional external shutdown signal for the owned metric.
    #[serde(skip)]
    pub shutdown: Option<broadcast::Sender<()>>,
}

fn default_time_window() -> Duration {
    DEFAULT_TIME_WINDOW
}

fn default_min_request_threshold() -> u64 {
    20
}

fn default_error_threshold_percentage() -> f64 {
    50.0
}

fn default_sleep_window() -> Duration {
    Duration::from_secs(5)
}

impl Default for CutBreakerConfig {
    fn default() -> Self {
        Self {
            time_window: default_time_window(),
            min_request_threshold: default_min_request_threshold(),
            error_threshold_percentage: default_error_threshold_percentage(),
            sleep_window: default_sleep_window(),
            shutdown: None,
        }
    }
}

/// State-machine breaker over an atomic status word.
///
/// Every transition goes through compare-and-swap on the word, so
/// racing callers collapse to a single winner and the half-open state
/// admits exactly one probe.
pub struct CutBreaker {
    name: String,
    metric: Metric,
    /// 0 = closed, 1 = open, 2 = half-open.
    status: AtomicU32,

    min_request_threshold: u64,
    error_threshold_percentage: f64,
    sleep_window: Duration,
}

impl CutBreaker {
    /// Build the breaker and start its metric. Must be called inside a
    /// Tokio runtime.
    pub fn new(name: impl Into<String>, config: CutBreakerConfig) -> Result<Self> {
        if !(0.0..=100.0).contains(&config.error_threshold_percentage) {
            return Err(TripwireError::Config(format!(
                "error threshold percentage must be within 0-100, got {}",
                config.error_threshold_percentage
            )));
        }
        let metric = Metric::new(MetricConfig {
            time_window: config.time_window,
            shutdown: config.shutdown,
        })?;

        Ok(Self {
            name: name.into(),
            metric,
            status: AtomicU32::new(CLOSED),
            min_request_threshold: config.min_request_threshold,
            error_threshold_percentage: config.error_threshold_percentage,
            sleep_window: config.sleep_window,
        })
    }

    /// Whether the next call may proceed, plus a status text.
    pub async fn allow(&self) -> (bool, String) {
        let summary = self.metric.summary().await;
        let (admit, status) = self.decide(&summary);
        (admit, status.to_string())
    }

    /// Decision over a summary. Separate from [`CutBreaker::allow`] so
    /// the table tests below can drive it with synthetic summaries.
    fn decide(&self, summary: &MetricSummary) -> (bool, &'static str) {
        match self.status.load(Ordering::Acquire) {
            CLOSED => {
                if summary.total < self.min_request_threshold
                    || summary.error_percentage < self.error_threshold_percentage
                {
                    return (true, "closed");
                }
                if self
                    .status
                    .compare_exchange(CLOSED, OPEN, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    warn!(
                        target: "tripwire::breaker",
                        breaker = %self.name,
                        total = summary.total,
                        error_percentage = summary.error_percentage,
                        "breaker tripped open"
                    );
                }
                (false, "open")
            }
            // One probe is already in flight; everybody else waits.
            HALF_OPEN => (false, "half-open"),
            OPEN => {
                if !self.sleep_elapsed(summary) {
                    return (false, "open");
                }
                // Racing callers collapse here: the CAS winner is the probe.
                let admitted = self
                    .status
                    .compare_exchange(OPEN, HALF_OPEN, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok();
                if admitted {
                    info!(
                        target: "tripwire::breaker",
                        breaker = %self.name,
                        "half-open probe admitted"
                    );
                }
                (admitted, "half-open")
            }
            _ => (true, "closed"),
        }
    }

    fn sleep_elapsed(&self, summary: &MetricSummary) -> bool {
        match summary.last_execute {
            None => true,
            Some(last) => SystemTime::now()
                .duration_since(last)
                .is_ok_and(|since| since >= self.sleep_window),
        }
    }

    /// Record a successful call. A success while half-open closes the
    /// breaker; the window is reset first so a caller admitted right
    /// after the close cannot observe the poisoned counts.
    pub async fn success(&self) {
        if self.status.load(Ordering::Acquire) == HALF_OPEN {
            self.metric.reset().await;
            if self
                .status
                .compare_exchange(HALF_OPEN, CLOSED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                info!(
                    target: "tripwire::breaker",
                    breaker = %self.name,
                    "breaker closed after successful probe"
                );
            }
        }
        self.metric.success().await;
    }

    /// Record a failed call. A failure while half-open re-opens.
    pub async fn failure(&self) {
        self.reopen_on_probe_failure();
        self.metric.failure().await;
    }

    /// Record a timed-out call. A timeout while half-open re-opens.
    pub async fn timeout(&self) {
        self.reopen_on_probe_failure();
        self.metric.timeout().await;
    }

    fn reopen_on_probe_failure(&self) {
        if self
            .status
            .compare_exchange(HALF_OPEN, OPEN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            warn!(
                target: "tripwire::breaker",
                breaker = %self.name,
                "breaker re-opened after failed probe"
            );
        }
    }

    /// Record a fallback that produced a value. Never transitions.
    pub async fn fallback_success(&self) {
        self.metric.fallback_success().await;
    }

    /// Record a fallback that failed in turn. Never transitions.
    pub async fn fallback_failure(&self) {
        self.metric.fallback_failure().await;
    }

    /// Snapshot of the breaker. Reporting never transitions the state.
    pub async fn summary(&self) -> BreakerSummary {
        let summary = self.metric.summary().await;
        BreakerSummary::from_metric(
            self.status_name().to_string(),
            self.metric.time_window(),
            &summary,
        )
    }

    fn status_name(&self) -> &'static str {
        match self.status.load(Ordering::Acquire) {
            OPEN => "open",
            HALF_OPEN => "half-open",
            _ => "closed",
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the owned metric's aggregator. Idempotent.
    pub fn close(&self) {
        self.metric.close();
    }
}
