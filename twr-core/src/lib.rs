#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Sliding-window health accounting for the tripwire breakers.
//!
//! A [`Metric`] counts success / failure / timeout / fallback events
//! over a configurable window of one-second buckets. Producers push
//! timestamped events into small bounded queues; a single aggregator
//! task per metric owns the counters, so the hot path takes no locks.

mod error;
mod metric;
mod window;

pub use error::{Result, TripwireError};
pub use metric::{Metric, MetricConfig};
pub use window::MetricSummary;

use std::time::Duration;

/// Smallest accepted sliding-window size.
pub const MIN_TIME_WINDOW: Duration = Duration::from_secs(1);

/// Largest accepted sliding-window size.
pub const MAX_TIME_WINDOW: Duration = Duration::from_secs(60);

/// Window applied when a config does not override it.
pub const DEFAULT_TIME_WINDOW: Duration = Duration::from_secs(5);
