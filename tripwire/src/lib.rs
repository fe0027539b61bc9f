#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Circuit breaking for async operations.
//!
//! Wrap a target operation in a [`Command`] and every call is routed
//! through a breaker: healthy traffic passes, failing traffic is cut
//! over to a fallback (or failed fast), and recovery is probed without
//! hammering the struggling dependency. Health lives in a sliding
//! window maintained by one aggregator task per breaker (`twr-core`),
//! so recording events takes no locks.
//!
//! Two breakers are available: [`CutBreaker`] (three-state machine
//! with a single half-open probe) and [`SreBreaker`] (probabilistic
//! adaptive throttling after the Google SRE book).
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tripwire::{BoxError, Command, CommandOptions};
//!
//! # async fn lookup(id: u64) -> Result<String, BoxError> { Ok(id.to_string()) }
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let command = Command::new(
//!     "lookup",
//!     |id: u64| async move { lookup(id).await },
//!     CommandOptions::default()
//!         .timeout(Duration::from_secs(2))
//!         .fallback(|id: u64, _cause| async move { Ok(format!("cached-{id}")) }),
//! )?;
//!
//! match command.execute(42).await {
//!     Ok(value) => println!("{value}"),
//!     Err(err) if err.is_unavailable() => println!("short-circuited: {err}"),
//!     Err(err) => println!("failed: {err}"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod breaker;
mod command;

pub use breaker::{
    Breaker, BreakerSummary, CutBreaker, CutBreakerConfig, SreBreaker, SreBreakerConfig,
};
pub use command::{BoxError, Command, CommandOptions, DEFAULT_TIMEOUT, ExecuteError};
pub use twr_core::{
    DEFAULT_TIME_WINDOW, MAX_TIME_WINDOW, MIN_TIME_WINDOW, Metric, MetricConfig, MetricSummary,
    Result, TripwireError,
};
