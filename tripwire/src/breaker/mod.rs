//! Breaker decision engines.
//!
//! Two interchangeable implementations: [`CutBreaker`] trips hard and
//! recovers through a single probe; [`SreBreaker`] throttles
//! probabilistically and recovers gradually. The command layer works
//! against the [`Breaker`] enum and never cares which one it holds.

mod cut;
mod sre;

pub use cut::{CutBreaker, CutBreakerConfig};
pub use sre::{SreBreaker, SreBreakerConfig};

use std::time::{Duration, SystemTime};

use twr_core::MetricSummary;

/// Status-word values for state-machine breakers.
pub(crate) const CLOSED: u32 = 0;
pub(crate) const OPEN: u32 = 1;
pub(crate) const HALF_OPEN: u32 = 2;

/// Point-in-time view of a breaker: status text plus the window totals.
#[derive(Debug, Clone)]
pub struct BreakerSummary {
    /// Stable status text: `"closed"` / `"open"` / `"half-open"` for
    /// the cut breaker, a formatted probability for the SRE breaker.
    pub status: String,
    /// Sliding-window size of the owned metric.
    pub time_window: Duration,

    pub success: u64,
    pub timeout: u64,
    pub failure: u64,
    pub fallback_success: u64,
    pub fallback_failure: u64,

    pub total: u64,
    pub error_percentage: f64,

    pub last_execute: Option<SystemTime>,
    pub last_success: Option<SystemTime>,
    pub last_timeout: Option<SystemTime>,
    pub last_failure: Option<SystemTime>,
}

impl BreakerSummary {
    pub(crate) fn from_metric(
        status: String,
        time_window: Duration,
        summary: &MetricSummary,
    ) -> Self {
        Self {
            status,
            time_window,
            success: summary.success,
            timeout: summary.timeout,
            failure: summary.failure,
            fallback_success: summary.fallback_success,
            fallback_failure: summary.fallback_failure,
            total: summary.total,
            error_percentage: summary.error_percentage,
            last_execute: summary.last_execute,
            last_success: summary.last_success,
            last_timeout: summary.last_timeout,
            last_failure: summary.last_failure,
        }
    }
}

/// A breaker admits or rejects calls based on the health of its
/// sliding window.
pub enum Breaker {
    /// Three-state cut breaker: trip hard, recover through one probe.
    Cut(CutBreaker),
    /// Probabilistic adaptive throttling after the Google SRE book.
    Sre(SreBreaker),
}

impl Breaker {
    /// Whether the next call may proceed, plus a status text.
    pub async fn allow(&self) -> (bool, String) {
        match self {
            Self::Cut(breaker) => breaker.allow().await,
            Self::Sre(breaker) => breaker.allow().await,
        }
    }

    /// Record a successful call.
    pub async fn success(&self) {
        match self {
            Self::Cut(breaker) => breaker.success().await,
            Self::Sre(breaker) => breaker.success().await,
        }
    }

    /// Record a failed call.
    pub async fn failure(&self) {
        match self {
            Self::Cut(breaker) => breaker.failure().await,
            Self::Sre(breaker) => breaker.failure().await,
        }
    }

    /// Record a timed-out call.
    pub async fn timeout(&self) {
        match self {
            Self::Cut(breaker) => breaker.timeout().await,
            Self::Sre(breaker) => breaker.timeout().await,
        }
    }

    /// Record a fallback that produced a value.
    pub async fn fallback_success(&self) {
        match self {
            Self::Cut(breaker) => breaker.fallback_success().await,
            Self::Sre(breaker) => breaker.fallback_success().await,
        }
    }

    /// Record a fallback that failed in turn.
    pub async fn fallback_failure(&self) {
        match self {
            Self::Cut(breaker) => breaker.fallback_failure().await,
            Self::Sre(breaker) => breaker.fallback_failure().await,
        }
    }

    /// Snapshot of the breaker status and its window totals.
    pub async fn summary(&self) -> BreakerSummary {
        match self {
            Self::Cut(breaker) => breaker.summary().await,
            Self::Sre(breaker) => breaker.summary().await,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Cut(breaker) => breaker.name(),
            Self::Sre(breaker) => breaker.name(),
        }
    }

    /// Stop the owned metric's aggregator. Idempotent.
    pub fn close(&self) {
        match self {
            Self::Cut(breaker) => breaker.close(),
            Self::Sre(breaker) => breaker.close(),
        }
    }
}
