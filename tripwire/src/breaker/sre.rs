//! Adaptive throttling after the Google SRE book.
//!
//! No state machine: every call is rejected with probability
//! `max(0, (total - k * success) / (total + 1))`, so throttling ramps
//! up smoothly as failures accumulate and backs off as successes
//! re-enter the window.
//!
//! Reference: <https://sre.google/sre-book/handling-overload/#eq2101>

use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use twr_core::{MAX_TIME_WINDOW, Metric, MetricConfig, MetricSummary, Result, TripwireError};

use super::BreakerSummary;

/// Tuning for an [`SreBreaker`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SreBreakerConfig {
    /// Sliding-window size; whole seconds in `[1s, 60s]`.
    #[serde(default = "default_time_window")]
    pub time_window: Duration,
    /// Throttling coefficient; must exceed 1. Larger is more permissive.
    #[serde(default = "default_k")]
    pub k: f64,
    /// Optional external shutdown signal for the owned metric.
    #[serde(skip)]
    pub shutdown: Option<broadcast::Sender<()>>,
}

fn default_time_window() -> Duration {
    MAX_TIME_WINDOW
}

fn default_k() -> f64 {
    1.5
}

impl Default for SreBreakerConfig {
    fn default() -> Self {
        Self {
            time_window: default_time_window(),
            k: default_k(),
            shutdown: None,
        }
    }
}

/// Probabilistic breaker. The RNG draw is the only synchronized piece
/// of an `allow`; everything else is a metric snapshot and arithmetic.
pub struct SreBreaker {
    name: String,
    metric: Metric,
    k: f64,
    rng: Mutex<SmallRng>,
}

impl SreBreaker {
    /// Build the breaker and start its metric. Must be called inside a
    /// Tokio runtime.
    pub fn new(name: impl Into<String>, config: SreBreakerConfig) -> Result<Self> {
        if config.k <= 1.0 {
            return Err(TripwireError::Config(format!(
                "throttling coefficient k must exceed 1, got {}",
                config.k
            )));
        }
        let metric = Metric::new(MetricConfig {
            time_window: config.time_window,
            shutdown: config.shutdown,
        })?;

        Ok(Self {
            name: name.into(),
            metric,
            k: config.k,
            rng: Mutex::new(SmallRng::from_entropy()),
        })
    }

    /// Whether the next call may proceed, plus a status text carrying
    /// the rejection probability and this call's draw.
    pub async fn allow(&self) -> (bool, String) {
        let summary = self.metric.summary().await;
        self.decide(&summary)
    }

    /// Decision over a summary. Separate from [`SreBreaker::allow`] so
    /// the convergence test below can drive it with a fixed summary.
    fn decide(&self, summary: &MetricSummary) -> (bool, String) {
        let draw = self.draw();
        let reject_probability = self.rejection_probability(summary);
        (
            draw > reject_probability,
            format!("rejection probability = {reject_probability:.3}, this time = {draw:.3}"),
        )
    }

    fn draw(&self) -> f64 {
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        rng.gen_range(0.0..1.0)
    }

    #[allow(clippy::cast_precision_loss)]
    fn rejection_probability(&self, summary: &MetricSummary) -> f64 {
        let total = summary.total as f64;
        let success = summary.success as f64;
        ((total - self.k * success) / (total + 1.0)).max(0.0)
    }

    /// Record a successful call.
    pub async fn success(&self) {
        self.metric.success().await;
    }

    /// Record a failed call.
    pub async fn failure(&self) {
        self.metric.failure().await;
    }

    /// Record a timed-out call.
    pub async fn timeout(&self) {
        self.metric.timeout().await;
    }

    /// Record a fallback that produced a value.
    pub async fn fallback_success(&self) {
        self.metric.fallback_success().await;
    }

    /// Record a fallback that failed in turn.
    pub async fn fallback_failure(&self) {
        self.metric.fallback_failure().await;
    }

    /// Snapshot of the breaker and its window totals.
    pub async fn summary(&self) -> BreakerSummary {
        let summary = self.metric.summary().await;
        let status = format!(
            "current rejection probability: {:.3}",
            self.rejection_probability(&summary)
        );
        BreakerSummary::from_metric(status, self.metric.time_window(), &summary)
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
